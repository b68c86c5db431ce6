//! Pro-rata active-power dispatch across a control group.
//!
//! A single ratio `k` drives the whole group: each unit is set to
//! `k x nameplate`, so relative capacity shares are preserved while the
//! tuner searches for the `k` that lands the monitored interface on its MW
//! target.

use crate::bisection::{Bisection, DirectionRule, TuningOptions, TuningSession, DEFAULT_P_BRACKET};
use crate::measure;
use crate::trace::TraceWriter;
use qcap_core::{ControlGroup, Megawatts, MonitoredInterface, PowerFlowOracle, QcapResult, StudyLog};

/// Set every unit to `k x nameplate` (pro-rata by rating).
pub fn apply_p_ratio(
    oracle: &mut dyn PowerFlowOracle,
    group: &ControlGroup,
    k: f64,
) -> QcapResult<()> {
    for unit in group.units() {
        oracle.set_generator_output(
            unit.bus,
            &unit.unit,
            Megawatts(k * unit.nameplate.value()),
            None,
        )?;
    }
    Ok(())
}

/// Bisect the dispatch ratio until the interface real-power flow meets
/// `target`.
pub fn tune_p(
    oracle: &mut dyn PowerFlowOracle,
    group: &ControlGroup,
    interface: &MonitoredInterface,
    target: Megawatts,
    options: TuningOptions,
    log: &mut StudyLog,
    mut trace: Option<&mut TraceWriter>,
) -> QcapResult<TuningSession> {
    if let Some(writer) = trace.as_deref_mut() {
        writer.begin_table("k_factor", "P_POI")?;
    }
    log.info(
        "tuning",
        format!("tuning P at {} to {:.4} MW", interface, target.value()),
    );
    Bisection::new(target.value(), DEFAULT_P_BRACKET, DirectionRule::Direct)
        .with_options(options)
        .run(
            oracle,
            |o, k| apply_p_ratio(o, group, k),
            |o| measure::interface_flow(o, interface).map(|flow| flow.re),
            log,
            trace,
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimOracle, SimUnit};
    use qcap_core::BusId;

    fn three_unit_group() -> (SimOracle, ControlGroup) {
        let mut sim = SimOracle::new(1, 2, "1");
        for (bus, mbase) in [(11, 100.0), (12, 200.0), (13, 300.0)] {
            sim.add_unit(bus, "1", SimUnit::new(BusId::new(bus), mbase));
        }
        let group = ControlGroup::from_parallel_lists(
            "GEN",
            &[11, 12, 13],
            &["1", "1", "1"],
            &[100.0, 200.0, 300.0],
            &[],
        )
        .unwrap();
        (sim, group)
    }

    #[test]
    fn test_pro_rata_allocation_is_exact() {
        let (mut sim, group) = three_unit_group();
        apply_p_ratio(&mut sim, &group, 0.5).unwrap();
        assert_eq!(sim.unit(11, "1").unwrap().p, 50.0);
        assert_eq!(sim.unit(12, "1").unwrap().p, 100.0);
        assert_eq!(sim.unit(13, "1").unwrap().p, 150.0);
    }

    #[test]
    fn test_tune_p_converges_on_two_unit_plant() {
        let mut sim = SimOracle::two_unit_plant();
        let group = ControlGroup::from_parallel_lists(
            "BESS",
            &[101, 102],
            &["1", "1"],
            &[150.0, 150.0],
            &[],
        )
        .unwrap();
        let interface = sim.interface();
        let mut log = StudyLog::new();
        let session = tune_p(
            &mut sim,
            &group,
            &interface,
            Megawatts(100.0),
            TuningOptions::default(),
            &mut log,
            None,
        )
        .unwrap();
        assert!(session.converged());
        let k = session.final_control().unwrap();
        assert!((k - 1.0 / 3.0).abs() < 1e-6);
        assert!(session.final_error().unwrap().abs() < 5e-7);
    }

    #[test]
    fn test_retune_is_idempotent() {
        let mut sim = SimOracle::two_unit_plant();
        let group = ControlGroup::from_parallel_lists(
            "BESS",
            &[101, 102],
            &["1", "1"],
            &[150.0, 150.0],
            &[],
        )
        .unwrap();
        let interface = sim.interface();
        let mut log = StudyLog::new();
        let first = tune_p(
            &mut sim,
            &group,
            &interface,
            Megawatts(100.0),
            TuningOptions::default(),
            &mut log,
            None,
        )
        .unwrap();
        let second = tune_p(
            &mut sim,
            &group,
            &interface,
            Megawatts(100.0),
            TuningOptions::default(),
            &mut log,
            None,
        )
        .unwrap();
        let delta = (first.final_control().unwrap() - second.final_control().unwrap()).abs();
        assert!(delta < crate::bisection::DEFAULT_TOLERANCE);
    }
}
