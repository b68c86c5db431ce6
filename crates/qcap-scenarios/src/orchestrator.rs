//! Scenario orchestration: drive a plant through its named operating
//! points and persist each one as a saved case plus snapshot.
//!
//! Every stage follows the same shape: tune P to the stage target, tune
//! the voltage schedules onto the reactive target, re-tune P (the schedule
//! change shifts losses), then record the solved setpoints. Storage stages
//! additionally derive shared `[Pmin, Pmax]` and `[Qmin, Qmax]` machine
//! limits from the recorded extremes so both persisted cases carry the
//! same capability window.
//!
//! Numeric non-convergence never aborts a scenario; the tuner keeps its
//! last control value, logs a warning, and the stage carries on. Only an
//! unusable engine (load failure, bad reference) propagates as an error.

use qcap_algo::bisection::{Bisection, DirectionRule, DEFAULT_P_BRACKET};
use qcap_algo::envelope::variant_case_path;
use qcap_algo::{dispatch, measure, snapshot, voltage, TuningOptions, TuningSession};
use qcap_core::oracle::DispatchLimits;
use qcap_core::{
    BusId, ControlGroup, MegavoltAmperes, Megavars, Megawatts, MonitoredInterface,
    OperatingPointSnapshot, PerUnit, PowerFlowOracle, QcapError, QcapResult, ReportPoint,
    StudyLog, UnitId,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Project type: which stages run and how dispatch signs apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Discharge and charge boundary points with a shared capability window.
    Storage,
    /// Single full-output point, `Pmin = 0`.
    Generation,
    /// Two technologies, one of them storage; five operating points.
    Hybrid,
}

/// One technology's units plus its role in charge stages.
#[derive(Debug, Clone)]
pub struct TechnologyGroup {
    pub group: ControlGroup,
    /// Storage dispatches negative in charge stages.
    pub storage: bool,
}

/// Complete scenario request.
#[derive(Debug, Clone)]
pub struct ScenarioStudy {
    pub kind: ScenarioKind,
    pub technologies: Vec<TechnologyGroup>,
    pub interface: MonitoredInterface,
    /// Net plant output target at the interface.
    pub p_net: Megawatts,
    /// Interface reactive target held during every stage (usually 0).
    pub q_target: Megavars,
    pub report_points: Vec<ReportPoint>,
    pub options: TuningOptions,
}

/// What a finished scenario hands back to the caller.
#[derive(Debug)]
pub struct ScenarioOutcome {
    /// False when any tuning pass ran out of iterations; the snapshots are
    /// then best-effort.
    pub success: bool,
    pub message: String,
    pub log: StudyLog,
    pub snapshots: Vec<OperatingPointSnapshot>,
}

/// Recorded solved setpoint of one unit after a stage.
#[derive(Debug, Clone)]
struct UnitSetpoint {
    bus: BusId,
    unit: UnitId,
    regulated_bus: BusId,
    nameplate: MegavoltAmperes,
    p: f64,
    vsched: f64,
}

/// Reactive limit at rated MVA for a recorded dispatch extreme. A dispatch
/// beyond nameplate leaves no reactive margin; the limit collapses to zero
/// with a warning instead of a NaN. Dispatch exactly at nameplate is a
/// legitimate zero-margin point, not a warning.
pub fn derive_q_limit(
    nameplate: MegavoltAmperes,
    p: Megawatts,
    unit_label: &str,
    log: &mut StudyLog,
) -> Megavars {
    let margin = nameplate.value().powi(2) - p.value().powi(2);
    if margin >= 0.0 {
        Megavars(margin.sqrt())
    } else {
        log.warn(
            "scenario",
            format!(
                "{unit_label}: |P|={:.2} MW exceeds nameplate {:.2} MVA, Qmax set to 0",
                p.value().abs(),
                nameplate.value()
            ),
        );
        Megavars(0.0)
    }
}

struct Orchestrator<'a> {
    oracle: &'a mut dyn PowerFlowOracle,
    base_case: &'a Path,
    interface: MonitoredInterface,
    p_net: Megawatts,
    q_target: Megavars,
    report_points: Vec<ReportPoint>,
    options: TuningOptions,
    all_converged: bool,
    log: StudyLog,
    snapshots: Vec<OperatingPointSnapshot>,
}

impl<'a> Orchestrator<'a> {
    fn note(&mut self, session: &TuningSession) {
        if !session.converged() {
            self.all_converged = false;
        }
    }

    /// tune P, tune the schedules onto the reactive target, re-tune P.
    fn drive(&mut self, group: &ControlGroup, p_target: Megawatts) -> QcapResult<()> {
        let iface = self.interface.clone();
        let s = dispatch::tune_p(
            self.oracle, group, &iface, p_target, self.options, &mut self.log, None,
        )?;
        self.note(&s);
        let s = voltage::tune_q(
            self.oracle, group, &iface, self.q_target, self.options, &mut self.log, None,
        )?;
        self.note(&s);
        let s = dispatch::tune_p(
            self.oracle, group, &iface, p_target, self.options, &mut self.log, None,
        )?;
        self.note(&s);
        Ok(())
    }

    /// Like [`drive`], but only `tuned` moves; the rest of the plant keeps
    /// whatever dispatch it already has. Voltage tuning still spans
    /// `scheduled` so the whole plant shares one schedule.
    fn drive_partial(
        &mut self,
        tuned: &ControlGroup,
        scheduled: &ControlGroup,
        p_target: Megawatts,
    ) -> QcapResult<()> {
        let iface = self.interface.clone();
        let s = self.tune_p_only(tuned, p_target)?;
        self.note(&s);
        let s = voltage::tune_q(
            self.oracle, scheduled, &iface, self.q_target, self.options, &mut self.log, None,
        )?;
        self.note(&s);
        let s = self.tune_p_only(tuned, p_target)?;
        self.note(&s);
        Ok(())
    }

    fn tune_p_only(
        &mut self,
        group: &ControlGroup,
        target: Megawatts,
    ) -> QcapResult<TuningSession> {
        let iface = self.interface.clone();
        self.log.info(
            "scenario",
            format!(
                "tuning {} dispatch until {} carries {:.4} MW",
                group.label,
                iface,
                target.value()
            ),
        );
        Bisection::new(target.value(), DEFAULT_P_BRACKET, DirectionRule::Direct)
            .with_options(self.options)
            .run(
                self.oracle,
                |o, k| dispatch::apply_p_ratio(o, group, k),
                |o| measure::interface_flow(o, &iface).map(|flow| flow.re),
                &mut self.log,
                None,
            )
    }

    /// Read each unit's solved dispatch and regulated-bus voltage.
    fn read_setpoints(&mut self, group: &ControlGroup) -> QcapResult<Vec<UnitSetpoint>> {
        let voltages = self.oracle.get_bus_voltages()?;
        let mut setpoints = Vec::with_capacity(group.len());
        for unit in group.units() {
            let machine = self.oracle.get_machine_output(unit.bus, &unit.unit)?;
            let vsched = voltages
                .iter()
                .find(|(bus, _)| *bus == unit.regulated_bus)
                .map(|(_, v)| v.value())
                .unwrap_or(1.0);
            setpoints.push(UnitSetpoint {
                bus: unit.bus,
                unit: unit.unit.clone(),
                regulated_bus: unit.regulated_bus,
                nameplate: unit.nameplate,
                p: machine.p.value(),
                vsched,
            });
        }
        Ok(setpoints)
    }

    fn apply_setpoints(
        &mut self,
        setpoints: &[UnitSetpoint],
        limits: &[DispatchLimits],
    ) -> QcapResult<()> {
        for (sp, lim) in setpoints.iter().zip(limits) {
            self.oracle
                .set_generator_output(sp.bus, &sp.unit, Megawatts(sp.p), Some(*lim))?;
            self.oracle
                .set_voltage_schedule(sp.bus, sp.regulated_bus, PerUnit(sp.vsched))?;
        }
        Ok(())
    }

    /// Solve, measure, snapshot and save the engine's current operating
    /// point as `<base>_<suffix>`.
    fn persist(
        &mut self,
        group: &ControlGroup,
        name: &str,
        suffix: &str,
    ) -> QcapResult<OperatingPointSnapshot> {
        if !self.oracle.solve()? {
            self.log
                .warn("scenario", format!("{name}: solve diverged while persisting"));
        }
        let points = self.report_points.clone();
        let measurements = measure::measure_points(self.oracle, &points)?;
        let mut snap = snapshot::capture(self.oracle, group, &[], name)?;
        snap.measurements = measurements;

        let path = variant_case_path(self.base_case, suffix);
        self.oracle.save_case(&path)?;
        self.oracle.export_diagram(&path.with_extension("png"))?;
        self.log
            .info("scenario", format!("saved {name}: {}", path.display()));
        snap.persisted_path = Some(path);
        Ok(snap)
    }

    fn force_out(&mut self, group: &ControlGroup) -> QcapResult<()> {
        for unit in group.units() {
            self.oracle.set_unit_status(unit.bus, &unit.unit, false)?;
        }
        self.log.info(
            "scenario",
            format!("{}: units forced out of service", group.label),
        );
        Ok(())
    }

    fn run_storage(&mut self, group: &ControlGroup) -> QcapResult<()> {
        self.oracle.load_case(self.base_case)?;
        let group = group.with_nameplates_from(self.oracle)?;

        self.log.info(
            "scenario",
            format!("--- tuning for discharge (P = +{:.1} MW) ---", self.p_net.value()),
        );
        self.drive(&group, self.p_net)?;
        let discharge = self.read_setpoints(&group)?;
        for sp in &discharge {
            self.log.info(
                "scenario",
                format!(
                    "unit {}-{}: Pmax = {:.4}, Vsched = {:.4}",
                    sp.bus, sp.unit, sp.p, sp.vsched
                ),
            );
        }

        self.log.info(
            "scenario",
            format!("--- tuning for charge (P = -{:.1} MW) ---", self.p_net.value()),
        );
        self.drive(&group, -self.p_net)?;
        let charge = self.read_setpoints(&group)?;
        for sp in &charge {
            self.log.info(
                "scenario",
                format!(
                    "unit {}-{}: Pmin = {:.4}, Vsched = {:.4}",
                    sp.bus, sp.unit, sp.p, sp.vsched
                ),
            );
        }

        // Shared capability window from the two extremes.
        let limits: Vec<DispatchLimits> = discharge
            .iter()
            .zip(&charge)
            .map(|(d, c)| {
                let label = format!("unit {}-{}", d.bus, d.unit);
                let qmax = derive_q_limit(d.nameplate, Megawatts(d.p), &label, &mut self.log);
                DispatchLimits {
                    pmax: Some(Megawatts(d.p)),
                    pmin: Some(Megawatts(c.p)),
                    qmax: Some(qmax),
                    qmin: Some(-qmax),
                }
            })
            .collect();

        self.apply_setpoints(&discharge, &limits)?;
        let snap = self.persist(&group, "Discharge", &format!("{}_Discharge", group.label))?;
        self.snapshots.push(snap);

        self.apply_setpoints(&charge, &limits)?;
        let snap = self.persist(&group, "Charge", &format!("{}_Charge", group.label))?;
        self.snapshots.push(snap);
        Ok(())
    }

    fn run_generation(&mut self, group: &ControlGroup) -> QcapResult<()> {
        self.oracle.load_case(self.base_case)?;
        let group = group.with_nameplates_from(self.oracle)?;

        self.log.info(
            "scenario",
            format!("--- tuning for full output (P = +{:.1} MW) ---", self.p_net.value()),
        );
        self.drive(&group, self.p_net)?;
        let setpoints = self.read_setpoints(&group)?;

        let limits: Vec<DispatchLimits> = setpoints
            .iter()
            .map(|sp| {
                let label = format!("unit {}-{}", sp.bus, sp.unit);
                let qmax = derive_q_limit(sp.nameplate, Megawatts(sp.p), &label, &mut self.log);
                DispatchLimits {
                    pmax: Some(Megawatts(sp.p)),
                    pmin: Some(Megawatts(0.0)),
                    qmax: Some(qmax),
                    qmin: Some(-qmax),
                }
            })
            .collect();

        self.apply_setpoints(&setpoints, &limits)?;
        let snap = self.persist(&group, "Generation", &format!("{}_Generation", group.label))?;
        self.snapshots.push(snap);
        Ok(())
    }

    fn run_hybrid(&mut self, gen: &ControlGroup, storage: &ControlGroup) -> QcapResult<()> {
        self.oracle.load_case(self.base_case)?;
        let gen = gen.with_nameplates_from(self.oracle)?;
        let storage = storage.with_nameplates_from(self.oracle)?;
        let combined = ControlGroup::new(
            "Hybrid",
            gen.units().iter().chain(storage.units()).cloned().collect(),
        )?;

        // Combined discharge: everything exporting.
        self.log.info("scenario", "--- hybrid: combined discharge ---");
        self.drive(&combined, self.p_net)?;
        let snap = self.persist(&combined, "Hybrid Discharge", "Hybrid_Discharge")?;
        self.snapshots.push(snap);

        // Combined charge: generation holds its dispatch, storage swings
        // negative until the interface absorbs the target.
        self.log.info("scenario", "--- hybrid: combined charge ---");
        self.drive_partial(&storage, &combined, -self.p_net)?;
        let snap = self.persist(&combined, "Hybrid Charge", "Hybrid_Charge")?;
        self.snapshots.push(snap);

        // Generation technology alone, storage out of service.
        self.log
            .info("scenario", format!("--- hybrid: {} alone ---", gen.label));
        self.oracle.load_case(self.base_case)?;
        self.force_out(&storage)?;
        self.drive(&gen, self.p_net)?;
        let snap = self.persist(&gen, &format!("{} Alone", gen.label), &format!("{}_Alone", gen.label))?;
        self.snapshots.push(snap);

        // Storage alone, both directions, generation out of service.
        self.log.info(
            "scenario",
            format!("--- hybrid: {} discharge only ---", storage.label),
        );
        self.oracle.load_case(self.base_case)?;
        self.force_out(&gen)?;
        self.drive(&storage, self.p_net)?;
        let snap = self.persist(
            &storage,
            &format!("{} Discharge", storage.label),
            &format!("{}_Discharge", storage.label),
        )?;
        self.snapshots.push(snap);

        self.log.info(
            "scenario",
            format!("--- hybrid: {} charge only ---", storage.label),
        );
        self.drive(&storage, -self.p_net)?;
        let snap = self.persist(
            &storage,
            &format!("{} Charge", storage.label),
            &format!("{}_Charge", storage.label),
        )?;
        self.snapshots.push(snap);
        Ok(())
    }
}

fn storage_split(
    technologies: &[TechnologyGroup],
) -> QcapResult<(Vec<&ControlGroup>, Vec<&ControlGroup>)> {
    let storage: Vec<&ControlGroup> = technologies
        .iter()
        .filter(|t| t.storage)
        .map(|t| &t.group)
        .collect();
    let other: Vec<&ControlGroup> = technologies
        .iter()
        .filter(|t| !t.storage)
        .map(|t| &t.group)
        .collect();
    Ok((storage, other))
}

/// Run a scenario against the base case and return everything it produced.
pub fn run(
    oracle: &mut dyn PowerFlowOracle,
    base_case: &Path,
    study: &ScenarioStudy,
) -> QcapResult<ScenarioOutcome> {
    let (storage, other) = storage_split(&study.technologies)?;
    let mut orch = Orchestrator {
        oracle,
        base_case,
        interface: study.interface.clone(),
        p_net: study.p_net,
        q_target: study.q_target,
        report_points: study.report_points.clone(),
        options: study.options,
        all_converged: true,
        log: StudyLog::new(),
        snapshots: Vec::new(),
    };

    match study.kind {
        ScenarioKind::Storage => {
            let group = storage.first().copied().or_else(|| other.first().copied());
            let group = group
                .ok_or_else(|| QcapError::Config("storage scenario has no control group".into()))?;
            orch.run_storage(group)?;
        }
        ScenarioKind::Generation => {
            let group = other.first().copied().or_else(|| storage.first().copied());
            let group = group.ok_or_else(|| {
                QcapError::Config("generation scenario has no control group".into())
            })?;
            orch.run_generation(group)?;
        }
        ScenarioKind::Hybrid => {
            if storage.len() != 1 || other.len() != 1 {
                return Err(QcapError::Config(format!(
                    "hybrid scenario needs one storage and one non-storage group, got {} and {}",
                    storage.len(),
                    other.len()
                )));
            }
            orch.run_hybrid(other[0], storage[0])?;
        }
    }

    let message = if orch.all_converged {
        format!("{} operating point(s) persisted", orch.snapshots.len())
    } else {
        format!(
            "{} operating point(s) persisted; some tuning passes did not converge ({} warnings)",
            orch.snapshots.len(),
            orch.log.warning_count()
        )
    };
    Ok(ScenarioOutcome {
        success: orch.all_converged,
        message,
        log: orch.log,
        snapshots: orch.snapshots,
    })
}
