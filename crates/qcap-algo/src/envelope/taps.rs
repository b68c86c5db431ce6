//! Discrete tap-stepping fallback for envelope studies.
//!
//! When voltage schedules alone cannot reach the reactive target, every
//! controllable transformer advances one tap position per pass (clamped at
//! its range bound) and the case is re-solved. The pass reports whether any
//! device actually moved; a pass where nothing moves means the fallback is
//! exhausted.

use qcap_core::{PowerFlowOracle, QcapResult, StudyLog, TapDevice};

/// Which bound the stepping loop walks toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    /// Lagging studies raise ratios toward rmax.
    TowardMax,
    /// Leading studies lower ratios toward rmin.
    TowardMin,
}

/// Advance every tap not yet at its bound by one position and push the new
/// ratios into the engine. Returns false when no device could move.
pub fn step_all(
    oracle: &mut dyn PowerFlowOracle,
    taps: &mut [TapDevice],
    direction: StepDirection,
    log: &mut StudyLog,
) -> QcapResult<bool> {
    let mut any_moved = false;
    for tap in taps.iter_mut() {
        let moved = match direction {
            StepDirection::TowardMax => tap.step_up(),
            StepDirection::TowardMin => tap.step_down(),
        };
        if moved {
            oracle.set_tap_ratio(&tap.reference, tap.current_ratio)?;
            any_moved = true;
        }
    }
    if any_moved {
        let ratios: Vec<String> = taps
            .iter()
            .map(|t| format!("{}={:.5}", t.reference, t.current_ratio))
            .collect();
        log.info("envelope", format!("tap ratios now {}", ratios.join(", ")));
    }
    Ok(any_moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimOracle;
    use qcap_core::{BusId, TapDeviceRef};

    fn test_tap() -> TapDevice {
        TapDevice::new(
            TapDeviceRef::TwoWinding {
                from: BusId::new(1),
                to: BusId::new(3),
                circuit: "1".into(),
            },
            0.9,
            1.1,
            21,
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn test_step_all_stops_at_bound() {
        let mut sim = SimOracle::two_unit_plant();
        sim.add_tap(test_tap().reference.clone(), 1.0);
        let mut taps = vec![test_tap()];
        let mut log = StudyLog::new();

        let mut passes = 0;
        while step_all(&mut sim, &mut taps, StepDirection::TowardMax, &mut log).unwrap() {
            passes += 1;
            assert!(passes <= 10, "must exhaust after ten 0.01 steps");
        }
        assert_eq!(passes, 10);
        assert!(taps[0].at_max());
    }

    #[test]
    fn test_step_all_applies_ratio_through_oracle() {
        let mut sim = SimOracle::two_unit_plant();
        sim.tap_poi_gain = 100.0;
        sim.add_tap(test_tap().reference.clone(), 1.0);
        let mut taps = vec![test_tap()];
        let mut log = StudyLog::new();

        step_all(&mut sim, &mut taps, StepDirection::TowardMax, &mut log).unwrap();
        let flow = sim
            .get_branch_flow(BusId::new(1), BusId::new(2), "1")
            .unwrap();
        // One 0.01 step through a 100 Mvar-per-unit coupling.
        assert!((flow.im - 1.0).abs() < 1e-9);
    }
}
