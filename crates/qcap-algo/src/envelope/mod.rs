//! # Capability Envelope Engine
//!
//! Derives a control group's boundary operating points against the solved
//! case: maximum lagging and leading reactive output, and the two
//! 0.95-power-factor compliance points. Each case is a short state machine
//! over shared primitives:
//!
//! 1. push the group's voltage schedules to a band edge (or bisect them
//!    onto a reactive target for the power-factor cases),
//! 2. check machine saturation and the bus-voltage band,
//! 3. if unmet, walk every transformer tap one position per pass until the
//!    checks pass or the taps run out.
//!
//! Tap exhaustion is *not* an error: the case is still measured and
//! snapshot, flagged "constraints may not be met" in the study log, and the
//! run carries on. Only an unusable engine aborts.
//!
//! Leading cases force the listed capacitor banks out of service first;
//! with the banks in, the leading boundary would be understated.

pub mod taps;

use crate::bisection::{TuningOptions, TuningSession};
use crate::envelope::taps::{step_all, StepDirection};
use crate::{measure, snapshot, voltage};
use qcap_core::oracle::MachineOutput;
use qcap_core::{
    ControlGroup, Megavars, Megawatts, MonitoredInterface, OperatingPointSnapshot, PerUnit,
    PointMeasurement, PowerFlowOracle, QcapResult, ReportPoint, ShuntRef, StudyLog, TapDevice,
    VoltageConstraint,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Saturation slack when comparing machine Q to its limit.
const Q_SATURATION_EPS: f64 = 1e-6;
/// Acceptance band on the leading power-factor point right after bisection.
const Q_LEAD_ACCEPT_EPS: f64 = 1e-2;

/// The four boundary cases of a reactive-capability study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnvelopeCase {
    MaxLag,
    MaxLead,
    Pf095Lagging,
    Pf095Leading,
}

impl EnvelopeCase {
    pub fn display_name(&self) -> &'static str {
        match self {
            EnvelopeCase::MaxLag => "Max Lag",
            EnvelopeCase::MaxLead => "Max Lead",
            EnvelopeCase::Pf095Lagging => "0.95 Lagging",
            EnvelopeCase::Pf095Leading => "0.95 Leading",
        }
    }

    /// Suffix for the persisted `<base>_<Suffix>` case file.
    pub fn file_suffix(&self) -> &'static str {
        match self {
            EnvelopeCase::MaxLag => "MaxLag",
            EnvelopeCase::MaxLead => "MaxLead",
            EnvelopeCase::Pf095Lagging => "095Lag",
            EnvelopeCase::Pf095Leading => "095Lead",
        }
    }

    /// Study order: lagging cases first, each leading case after its
    /// lagging sibling.
    pub fn all() -> [EnvelopeCase; 4] {
        [
            EnvelopeCase::MaxLag,
            EnvelopeCase::Pf095Lagging,
            EnvelopeCase::MaxLead,
            EnvelopeCase::Pf095Leading,
        ]
    }
}

/// Everything one envelope study needs besides the engine itself.
#[derive(Debug, Clone)]
pub struct EnvelopeStudy {
    pub group: ControlGroup,
    pub interface: MonitoredInterface,
    pub taps: Vec<TapDevice>,
    pub shunts: Vec<ShuntRef>,
    /// Net plant output the power-factor targets are computed from.
    pub p_net: Megawatts,
    pub v_upper: PerUnit,
    pub v_lower: PerUnit,
    /// Bisection settings for the power-factor voltage tuning.
    pub options: TuningOptions,
}

impl EnvelopeStudy {
    pub fn new(group: ControlGroup, interface: MonitoredInterface, p_net: Megawatts) -> Self {
        Self {
            group,
            interface,
            taps: Vec::new(),
            shunts: Vec::new(),
            p_net,
            v_upper: PerUnit(1.1),
            v_lower: PerUnit(0.9),
            // The Mvar target only needs to land within engine noise, so
            // the envelope tuner runs looser and longer than dispatch.
            options: TuningOptions {
                tolerance: 1e-4,
                max_iterations: 40,
            },
        }
    }

    pub fn with_taps(mut self, taps: Vec<TapDevice>) -> Self {
        self.taps = taps;
        self
    }

    pub fn with_shunts(mut self, shunts: Vec<ShuntRef>) -> Self {
        self.shunts = shunts;
        self
    }
}

/// Structured result of one envelope case.
#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeOutcome {
    pub case: EnvelopeCase,
    /// Whether the saturation/target and voltage checks were actually met;
    /// false means the snapshot is best-effort.
    pub achieved: bool,
    pub message: String,
    pub measurements: Vec<PointMeasurement>,
    pub snapshot: OperatingPointSnapshot,
}

fn read_group(
    oracle: &mut dyn PowerFlowOracle,
    group: &ControlGroup,
) -> QcapResult<Vec<MachineOutput>> {
    group
        .units()
        .iter()
        .map(|unit| oracle.get_machine_output(unit.bus, &unit.unit))
        .collect()
}

fn fmt_mvar(outputs: &[MachineOutput], pick: impl Fn(&MachineOutput) -> f64) -> String {
    outputs
        .iter()
        .map(|m| format!("{:.3}", pick(m)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Every unit sitting on its upper reactive limit.
fn all_at_qmax(outputs: &[MachineOutput]) -> bool {
    outputs
        .iter()
        .all(|m| (m.q.value() - m.qmax.value()).abs() < Q_SATURATION_EPS)
}

/// Saturated or pushed past the limit by tap action.
fn all_at_or_beyond_qmax(outputs: &[MachineOutput]) -> bool {
    outputs.iter().all(|m| {
        (m.q.value() - m.qmax.value()).abs() < Q_SATURATION_EPS || m.q.value() > m.qmax.value()
    })
}

fn all_at_qmin(outputs: &[MachineOutput]) -> bool {
    outputs
        .iter()
        .all(|m| (m.q.value() - m.qmin.value()).abs() < Q_SATURATION_EPS)
}

fn all_at_or_beyond_qmin(outputs: &[MachineOutput]) -> bool {
    outputs.iter().all(|m| {
        (m.q.value() - m.qmin.value()).abs() < Q_SATURATION_EPS || m.q.value() < m.qmin.value()
    })
}

/// Scan solved bus voltages against the band; violations go to the log
/// (first five spelled out, the rest counted).
fn scan_voltages(
    oracle: &mut dyn PowerFlowOracle,
    constraint: &VoltageConstraint,
    log: &mut StudyLog,
) -> QcapResult<bool> {
    let voltages = oracle.get_bus_voltages()?;
    let check = constraint.check(&voltages);
    if !check.passed {
        log.warn(
            "envelope",
            format!(
                "{} bus(es) violating voltage limit ({} pu)",
                check.violations.len(),
                constraint.limit.value()
            ),
        );
        for (bus, v) in check.violations.iter().take(5) {
            log.warn("envelope", format!("  bus {}: {:.4} pu", bus, v.value()));
        }
        if check.violations.len() > 5 {
            log.warn(
                "envelope",
                format!("  ... and {} more", check.violations.len() - 5),
            );
        }
    }
    Ok(check.passed)
}

fn disconnect_shunts(
    oracle: &mut dyn PowerFlowOracle,
    shunts: &[ShuntRef],
    log: &mut StudyLog,
) -> QcapResult<()> {
    if shunts.is_empty() {
        return Ok(());
    }
    log.info("envelope", "disconnecting listed shunts (capacitor banks)");
    for shunt in shunts {
        oracle.disconnect_shunt(shunt.bus, &shunt.id)?;
        log.info(
            "envelope",
            format!("  disconnected shunt {} at bus {}", shunt.id, shunt.bus),
        );
    }
    Ok(())
}

fn last_measured(session: &TuningSession) -> f64 {
    session.history.last().map(|s| s.measured_value).unwrap_or(0.0)
}

fn check_max_lag(
    oracle: &mut dyn PowerFlowOracle,
    study: &EnvelopeStudy,
    taps: &mut [TapDevice],
    log: &mut StudyLog,
) -> QcapResult<(bool, String)> {
    voltage::apply_schedule(oracle, &study.group, study.v_upper)?;
    if !oracle.solve()? {
        log.warn("envelope", "solve diverged at the upper schedule");
    }
    let outputs = read_group(oracle, &study.group)?;
    log.info(
        "envelope",
        format!("unit Q: [{}]", fmt_mvar(&outputs, |m| m.q.value())),
    );
    log.info(
        "envelope",
        format!("unit Qmax: [{}]", fmt_mvar(&outputs, |m| m.qmax.value())),
    );

    let constraint = VoltageConstraint::upper(study.v_upper.value());
    if all_at_qmax(&outputs) && scan_voltages(oracle, &constraint, log)? {
        return Ok((
            true,
            "all units at Qmax within the voltage band; no adjustment needed".into(),
        ));
    }
    if taps.is_empty() {
        log.warn("envelope", "no tap devices to adjust");
        return Ok((false, "no tap devices available; constraints may not be met".into()));
    }

    log.info("envelope", "stepping taps up to meet Q and voltage requirements");
    loop {
        if !step_all(oracle, taps, StepDirection::TowardMax, log)? {
            log.warn("envelope", "all taps reached rmax; constraints may not be met");
            return Ok((false, "taps exhausted at rmax; constraints may not be met".into()));
        }
        if !oracle.solve()? {
            log.warn("envelope", "solve diverged while stepping taps, stopping");
            return Ok((false, "solve diverged during tap stepping".into()));
        }
        let outputs = read_group(oracle, &study.group)?;
        if all_at_or_beyond_qmax(&outputs) && scan_voltages(oracle, &constraint, log)? {
            return Ok((true, "requirements met after tap adjustment".into()));
        }
    }
}

fn check_max_lead(
    oracle: &mut dyn PowerFlowOracle,
    study: &EnvelopeStudy,
    taps: &mut [TapDevice],
    log: &mut StudyLog,
) -> QcapResult<(bool, String)> {
    disconnect_shunts(oracle, &study.shunts, log)?;
    voltage::apply_schedule(oracle, &study.group, study.v_lower)?;
    if !oracle.solve()? {
        log.warn("envelope", "solve diverged at the lower schedule");
    }
    let outputs = read_group(oracle, &study.group)?;
    log.info(
        "envelope",
        format!("unit Q: [{}]", fmt_mvar(&outputs, |m| m.q.value())),
    );
    log.info(
        "envelope",
        format!("unit Qmin: [{}]", fmt_mvar(&outputs, |m| m.qmin.value())),
    );

    let constraint = VoltageConstraint::lower(study.v_lower.value());
    if all_at_qmin(&outputs) && scan_voltages(oracle, &constraint, log)? {
        return Ok((
            true,
            "all units at Qmin within the voltage band; no adjustment needed".into(),
        ));
    }
    if taps.is_empty() {
        log.warn("envelope", "no tap devices to adjust");
        return Ok((false, "no tap devices available; constraints may not be met".into()));
    }

    log.info("envelope", "stepping taps down to meet Q and voltage requirements");
    loop {
        if !step_all(oracle, taps, StepDirection::TowardMin, log)? {
            log.warn("envelope", "all taps reached rmin; constraints may not be met");
            return Ok((false, "taps exhausted at rmin; constraints may not be met".into()));
        }
        if !oracle.solve()? {
            log.warn("envelope", "solve diverged while stepping taps, stopping");
            return Ok((false, "solve diverged during tap stepping".into()));
        }
        let outputs = read_group(oracle, &study.group)?;
        if all_at_or_beyond_qmin(&outputs) && scan_voltages(oracle, &constraint, log)? {
            return Ok((true, "requirements met after tap adjustment".into()));
        }
    }
}

/// Reactive target for a 0.95 power factor at net output `p_net` (MW to
/// one decimal, matching how interconnection studies quote it).
fn pf095_target(p_net: Megawatts) -> f64 {
    let p = (p_net.value() * 10.0).round() / 10.0;
    p * 0.95_f64.acos().tan()
}

fn check_pf095_lagging(
    oracle: &mut dyn PowerFlowOracle,
    study: &EnvelopeStudy,
    taps: &mut [TapDevice],
    log: &mut StudyLog,
) -> QcapResult<(bool, String)> {
    let q_target = pf095_target(study.p_net);
    log.info(
        "envelope",
        format!(
            "P_net={:.1} MW, 0.95 lagging target Q={:.2} Mvar",
            study.p_net.value(),
            q_target
        ),
    );

    let session = voltage::tune_q(
        oracle,
        &study.group,
        &study.interface,
        Megavars(q_target),
        study.options,
        log,
        None,
    )?;
    let mut q_now = last_measured(&session);

    let constraint = VoltageConstraint::upper(study.v_upper.value());
    if q_now >= q_target && scan_voltages(oracle, &constraint, log)? {
        return Ok((
            true,
            format!("Q={q_now:.2} Mvar meets the 0.95 lagging target within the voltage band"),
        ));
    }
    if taps.is_empty() {
        log.warn("envelope", "no tap devices to adjust");
        return Ok((false, "no tap devices available; constraints may not be met".into()));
    }

    log.info("envelope", "stepping taps up to meet Q and voltage requirements");
    loop {
        if !step_all(oracle, taps, StepDirection::TowardMax, log)? {
            log.warn("envelope", "all taps reached rmax; constraints may not be met");
            return Ok((false, "taps exhausted at rmax; constraints may not be met".into()));
        }
        if !oracle.solve()? {
            log.warn("envelope", "solve diverged while stepping taps, stopping");
            return Ok((false, "solve diverged during tap stepping".into()));
        }
        q_now = measure::interface_flow(oracle, &study.interface)?.im;
        if q_now >= q_target && scan_voltages(oracle, &constraint, log)? {
            return Ok((
                true,
                format!("Q={q_now:.2} Mvar meets the 0.95 lagging target after tap adjustment"),
            ));
        }
    }
}

fn check_pf095_leading(
    oracle: &mut dyn PowerFlowOracle,
    study: &EnvelopeStudy,
    taps: &mut [TapDevice],
    log: &mut StudyLog,
) -> QcapResult<(bool, String)> {
    let q_target = -pf095_target(study.p_net);
    log.info(
        "envelope",
        format!(
            "P_net={:.1} MW, 0.95 leading target Q={:.2} Mvar",
            study.p_net.value(),
            q_target
        ),
    );

    disconnect_shunts(oracle, &study.shunts, log)?;
    let session = voltage::tune_q(
        oracle,
        &study.group,
        &study.interface,
        Megavars(q_target),
        study.options,
        log,
        None,
    )?;
    let mut q_now = last_measured(&session);

    let constraint = VoltageConstraint::lower(study.v_lower.value());
    if (q_now - q_target).abs() < Q_LEAD_ACCEPT_EPS && scan_voltages(oracle, &constraint, log)? {
        return Ok((
            true,
            format!("Q={q_now:.2} Mvar meets the 0.95 leading target within the voltage band"),
        ));
    }
    if taps.is_empty() {
        log.warn("envelope", "no tap devices to adjust");
        return Ok((false, "no tap devices available; constraints may not be met".into()));
    }

    log.info("envelope", "stepping taps down to meet Q and voltage requirements");
    loop {
        if !step_all(oracle, taps, StepDirection::TowardMin, log)? {
            log.warn("envelope", "all taps reached rmin; constraints may not be met");
            return Ok((false, "taps exhausted at rmin; constraints may not be met".into()));
        }
        if !oracle.solve()? {
            log.warn("envelope", "solve diverged while stepping taps, stopping");
            return Ok((false, "solve diverged during tap stepping".into()));
        }
        q_now = measure::interface_flow(oracle, &study.interface)?.im;
        if q_now <= q_target && scan_voltages(oracle, &constraint, log)? {
            return Ok((
                true,
                format!("Q={q_now:.2} Mvar meets the 0.95 leading target after tap adjustment"),
            ));
        }
    }
}

/// Run one envelope case against the currently loaded base state.
///
/// The snapshot is produced even when the checks are not met; `achieved`
/// and the study log carry the best-effort flag.
pub fn run_case(
    oracle: &mut dyn PowerFlowOracle,
    case: EnvelopeCase,
    study: &EnvelopeStudy,
    report_points: &[ReportPoint],
    log: &mut StudyLog,
) -> QcapResult<EnvelopeOutcome> {
    let mut taps = study.taps.clone();
    // Align the engine with the configured starting ratios.
    for tap in &taps {
        oracle.set_tap_ratio(&tap.reference, tap.current_ratio)?;
    }

    let (achieved, message) = match case {
        EnvelopeCase::MaxLag => check_max_lag(oracle, study, &mut taps, log)?,
        EnvelopeCase::MaxLead => check_max_lead(oracle, study, &mut taps, log)?,
        EnvelopeCase::Pf095Lagging => check_pf095_lagging(oracle, study, &mut taps, log)?,
        EnvelopeCase::Pf095Leading => check_pf095_leading(oracle, study, &mut taps, log)?,
    };
    log.info(
        "envelope",
        format!("{}: {}", case.display_name(), message),
    );

    let measurements = measure::measure_points(oracle, report_points)?;
    let mut snap = snapshot::capture(oracle, &study.group, &taps, case.display_name())?;
    snap.measurements = measurements.clone();
    Ok(EnvelopeOutcome {
        case,
        achieved,
        message,
        measurements,
        snapshot: snap,
    })
}

/// Run all four cases, reloading the base case before each so the cases
/// never contaminate one another, and persist `<base>_<Suffix>` plus a
/// diagram per case.
pub fn run_all(
    oracle: &mut dyn PowerFlowOracle,
    base_case: &Path,
    study: &EnvelopeStudy,
    report_points: &[ReportPoint],
    log: &mut StudyLog,
) -> QcapResult<Vec<EnvelopeOutcome>> {
    let mut outcomes = Vec::with_capacity(4);
    for case in EnvelopeCase::all() {
        log.info("envelope", format!("=== running {} ===", case.display_name()));
        oracle.load_case(base_case)?;
        let mut outcome = run_case(oracle, case, study, report_points, log)?;

        let path = variant_case_path(base_case, case.file_suffix());
        oracle.save_case(&path)?;
        oracle.export_diagram(&path.with_extension("png"))?;
        log.info(
            "envelope",
            format!("saved {} case: {}", case.display_name(), path.display()),
        );
        outcome.snapshot.persisted_path = Some(path);
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

/// `<base>_<Suffix>` naming for persisted variant cases.
pub fn variant_case_path(base: &Path, suffix: &str) -> PathBuf {
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("case");
    let name = match base.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{suffix}.{ext}"),
        None => format!("{stem}_{suffix}"),
    };
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimOracle;
    use qcap_core::{BusId, TapDeviceRef};

    fn bess_group() -> ControlGroup {
        ControlGroup::from_parallel_lists(
            "BESS",
            &[101, 102],
            &["1", "1"],
            &[150.0, 150.0],
            &[],
        )
        .unwrap()
    }

    fn plant_tap_ref() -> TapDeviceRef {
        TapDeviceRef::TwoWinding {
            from: BusId::new(1),
            to: BusId::new(3),
            circuit: "1".into(),
        }
    }

    fn plant_tap() -> TapDevice {
        TapDevice::new(plant_tap_ref(), 0.9, 1.1, 21, 1.0).unwrap()
    }

    /// Two 150-MVA units, each clamped at `qmax` Mvar, with a tap feeding
    /// `tap_q_slope` Mvar per unit of ratio deviation into every machine.
    fn plant_with_limits(qmax: f64, qmin: f64, tap_q_slope: f64) -> SimOracle {
        let mut sim = SimOracle::two_unit_plant();
        for bus in [101, 102] {
            let unit = sim.unit_mut(bus, "1").unwrap();
            unit.qmax = qmax;
            unit.qmin = qmin;
            unit.tap_q_slope = tap_q_slope;
        }
        sim.add_tap(plant_tap_ref(), 1.0);
        sim.commit_base();
        sim
    }

    fn study(sim: &SimOracle, taps: Vec<TapDevice>) -> EnvelopeStudy {
        EnvelopeStudy::new(bess_group(), sim.interface(), Megawatts(100.0)).with_taps(taps)
    }

    #[test]
    fn test_max_lag_achieved_without_taps() {
        // Upper schedule drives 50 Mvar raw per unit; a 40 Mvar limit
        // saturates immediately.
        let mut sim = plant_with_limits(40.0, -75.0, 0.0);
        let study = study(&sim, vec![]);
        let mut log = StudyLog::new();
        let outcome = run_case(&mut sim, EnvelopeCase::MaxLag, &study, &[], &mut log).unwrap();
        assert!(outcome.achieved);
        assert!(outcome.message.contains("no adjustment needed"));
        // Snapshot shows every unit on its limit.
        for d in &outcome.snapshot.dispatch {
            assert!((d.q.value() - 40.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_max_lag_achieved_after_tap_stepping() {
        // 50 Mvar raw against a 60 Mvar limit: five 0.01 tap steps at
        // 200 Mvar/unit close the gap.
        let mut sim = plant_with_limits(60.0, -75.0, 200.0);
        let study = study(&sim, vec![plant_tap()]);
        let mut log = StudyLog::new();
        let outcome = run_case(&mut sim, EnvelopeCase::MaxLag, &study, &[], &mut log).unwrap();
        assert!(outcome.achieved);
        assert!(outcome.message.contains("after tap adjustment"));
        let (_, ratio) = &outcome.snapshot.tap_ratios[0];
        assert!((ratio - 1.05).abs() < 1e-9);
    }

    #[test]
    fn test_max_lag_taps_exhausted_still_snapshots() {
        // 80 Mvar limit is out of reach: 50 raw + at most 20 from taps.
        let mut sim = plant_with_limits(80.0, -75.0, 200.0);
        let study = study(&sim, vec![plant_tap()]);
        let mut log = StudyLog::new();
        let outcome = run_case(&mut sim, EnvelopeCase::MaxLag, &study, &[], &mut log).unwrap();
        assert!(!outcome.achieved);
        assert!(outcome.message.contains("may not be met"));
        assert!(log.warning_count() >= 1);
        // Best-effort snapshot still captured, taps parked at rmax.
        let (_, ratio) = &outcome.snapshot.tap_ratios[0];
        assert!((ratio - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_max_lead_disconnects_shunts_and_saturates() {
        let mut sim = plant_with_limits(75.0, -45.0, 0.0);
        sim.add_shunt(1, "1", 30.0);
        sim.commit_base();
        let study = study(&sim, vec![]).with_shunts(vec![ShuntRef {
            bus: BusId::new(1),
            id: "1".into(),
        }]);
        let mut log = StudyLog::new();
        let outcome = run_case(&mut sim, EnvelopeCase::MaxLead, &study, &[], &mut log).unwrap();
        assert!(outcome.achieved);
        // Lower schedule drives -50 raw, clamped at -45 on every unit, and
        // the disconnected bank no longer props up the interface Q.
        let flow = sim
            .get_branch_flow(BusId::new(1), BusId::new(2), "1")
            .unwrap();
        assert!((flow.im - (-90.0)).abs() < 1e-9);
    }

    #[test]
    fn test_pf095_lagging_meets_target() {
        let mut sim = plant_with_limits(75.0, -75.0, 0.0);
        sim.tap_poi_gain = 100.0;
        let study = study(&sim, vec![plant_tap()]);
        let mut log = StudyLog::new();
        let outcome =
            run_case(&mut sim, EnvelopeCase::Pf095Lagging, &study, &[], &mut log).unwrap();
        assert!(outcome.achieved);
        let q_target = 100.0 * 0.95_f64.acos().tan();
        let flow = sim
            .get_branch_flow(BusId::new(1), BusId::new(2), "1")
            .unwrap();
        assert!(flow.im >= q_target - 1e-9);
    }

    #[test]
    fn test_pf095_leading_accepts_within_band() {
        let mut sim = plant_with_limits(75.0, -75.0, 0.0);
        sim.add_shunt(1, "1", 20.0);
        sim.commit_base();
        let study = study(&sim, vec![]).with_shunts(vec![ShuntRef {
            bus: BusId::new(1),
            id: "1".into(),
        }]);
        let mut log = StudyLog::new();
        let outcome =
            run_case(&mut sim, EnvelopeCase::Pf095Leading, &study, &[], &mut log).unwrap();
        assert!(outcome.achieved);
        let q_target = -100.0 * 0.95_f64.acos().tan();
        let flow = sim
            .get_branch_flow(BusId::new(1), BusId::new(2), "1")
            .unwrap();
        assert!((flow.im - q_target).abs() < Q_LEAD_ACCEPT_EPS);
    }

    #[test]
    fn test_run_all_persists_four_named_cases() {
        let mut sim = plant_with_limits(40.0, -40.0, 0.0);
        let study = study(&sim, vec![]);
        let mut log = StudyLog::new();
        let outcomes = run_all(
            &mut sim,
            Path::new("/tmp/plant.sav"),
            &study,
            &[],
            &mut log,
        )
        .unwrap();
        assert_eq!(outcomes.len(), 4);

        let saved: Vec<String> = sim
            .saved_cases()
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            saved,
            vec![
                "plant_MaxLag.sav",
                "plant_095Lag.sav",
                "plant_MaxLead.sav",
                "plant_095Lead.sav",
            ]
        );
        assert_eq!(sim.exported_diagrams().len(), 4);
        for outcome in &outcomes {
            assert!(outcome.snapshot.persisted_path.is_some());
        }
    }

    #[test]
    fn test_variant_case_path_naming() {
        assert_eq!(
            variant_case_path(Path::new("/a/b/model.sav"), "MaxLag"),
            PathBuf::from("/a/b/model_MaxLag.sav")
        );
        assert_eq!(
            variant_case_path(Path::new("model"), "095Lead"),
            PathBuf::from("model_095Lead")
        );
    }
}
