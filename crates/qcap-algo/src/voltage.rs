//! Uniform voltage-schedule control across a control group.
//!
//! Unlike dispatch, the schedule is not nameplate-weighted: every unit's
//! plant is told to hold the same per-unit setpoint at its regulated bus.
//! Reactive export rises with the schedule, so the tuner's direction rule
//! is reversed relative to P tuning.

use crate::bisection::{Bisection, DirectionRule, TuningOptions, TuningSession, DEFAULT_V_BRACKET};
use crate::measure;
use crate::trace::TraceWriter;
use qcap_core::{ControlGroup, Megavars, MonitoredInterface, PerUnit, PowerFlowOracle, QcapResult, StudyLog};

/// Set every unit's regulated-bus schedule to `v` (uniform).
pub fn apply_schedule(
    oracle: &mut dyn PowerFlowOracle,
    group: &ControlGroup,
    v: PerUnit,
) -> QcapResult<()> {
    for unit in group.units() {
        oracle.set_voltage_schedule(unit.bus, unit.regulated_bus, v)?;
    }
    Ok(())
}

/// Bisect the group schedule until the interface reactive-power flow meets
/// `target`.
pub fn tune_q(
    oracle: &mut dyn PowerFlowOracle,
    group: &ControlGroup,
    interface: &MonitoredInterface,
    target: Megavars,
    options: TuningOptions,
    log: &mut StudyLog,
    mut trace: Option<&mut TraceWriter>,
) -> QcapResult<TuningSession> {
    if let Some(writer) = trace.as_deref_mut() {
        writer.begin_table("VSched", "Q_POI")?;
    }
    log.info(
        "tuning",
        format!("tuning Q at {} to {:.4} Mvar", interface, target.value()),
    );
    Bisection::new(target.value(), DEFAULT_V_BRACKET, DirectionRule::Reversed)
        .with_options(options)
        .run(
            oracle,
            |o, v| apply_schedule(o, group, PerUnit(v)),
            |o| measure::interface_flow(o, interface).map(|flow| flow.im),
            log,
            trace,
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimOracle;

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

    #[test]
    fn test_tune_q_to_zero_lands_on_nominal_schedule() {
        let mut sim = SimOracle::two_unit_plant();
        let group = bess_group();
        let interface = sim.interface();
        let mut log = StudyLog::new();
        let session = tune_q(
            &mut sim,
            &group,
            &interface,
            Megavars(0.0),
            TuningOptions::default(),
            &mut log,
            None,
        )
        .unwrap();
        assert!(session.converged());
        assert!((session.final_control().unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_tune_q_positive_target_raises_schedule() {
        let mut sim = SimOracle::two_unit_plant();
        let group = bess_group();
        let interface = sim.interface();
        let mut log = StudyLog::new();
        let session = tune_q(
            &mut sim,
            &group,
            &interface,
            Megavars(30.0),
            TuningOptions::default(),
            &mut log,
            None,
        )
        .unwrap();
        assert!(session.converged());
        // 1000 Mvar/pu aggregate slope: 30 Mvar needs +0.03 pu.
        assert!((session.final_control().unwrap() - 1.03).abs() < 1e-6);
    }

    #[test]
    fn test_schedule_applies_to_regulated_buses() {
        let mut sim = SimOracle::two_unit_plant();
        let group = ControlGroup::from_parallel_lists(
            "BESS",
            &[101, 102],
            &["1", "1"],
            &[150.0, 150.0],
            &[201, 202],
        )
        .unwrap();
        apply_schedule(&mut sim, &group, PerUnit(1.04)).unwrap();
        let voltages = sim.get_bus_voltages().unwrap();
        assert!(voltages
            .iter()
            .any(|(bus, v)| bus.value() == 201 && (v.value() - 1.04).abs() < 1e-12));
    }
}
