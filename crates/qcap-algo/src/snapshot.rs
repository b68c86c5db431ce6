//! Capturing the solved state of a control group as an operating point.

use qcap_core::{
    ControlGroup, OperatingPointSnapshot, PowerFlowOracle, QcapResult, TapDevice, UnitDispatch,
};

/// Read the group's solved dispatch, regulated-bus voltages, and tap
/// ratios into a fresh snapshot. Measurements and the persisted path are
/// attached by the caller once the case is saved.
pub fn capture(
    oracle: &mut dyn PowerFlowOracle,
    group: &ControlGroup,
    taps: &[TapDevice],
    name: impl Into<String>,
) -> QcapResult<OperatingPointSnapshot> {
    let mut dispatch = Vec::with_capacity(group.len());
    for unit in group.units() {
        let machine = oracle.get_machine_output(unit.bus, &unit.unit)?;
        dispatch.push(UnitDispatch {
            bus: unit.bus,
            unit: unit.unit.clone(),
            p: machine.p,
            q: machine.q,
            pmin: machine.pmin,
            pmax: machine.pmax,
            qmin: machine.qmin,
            qmax: machine.qmax,
        });
    }

    let voltages = oracle.get_bus_voltages()?;
    let voltage_setpoints = group
        .units()
        .iter()
        .filter_map(|unit| {
            voltages
                .iter()
                .find(|(bus, _)| *bus == unit.regulated_bus)
                .map(|&(bus, v)| (bus, v))
        })
        .collect();

    Ok(OperatingPointSnapshot {
        name: name.into(),
        dispatch,
        voltage_setpoints,
        tap_ratios: taps
            .iter()
            .map(|t| (t.reference.clone(), t.current_ratio))
            .collect(),
        measurements: Vec::new(),
        persisted_path: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimOracle;
    use qcap_core::{BusId, Megawatts, UnitId};

    #[test]
    fn test_capture_reads_solved_dispatch() {
        let mut sim = SimOracle::two_unit_plant();
        sim.set_generator_output(BusId::new(101), &UnitId::new("1"), Megawatts(80.0), None)
            .unwrap();
        sim.solve().unwrap();

        let group = ControlGroup::from_parallel_lists(
            "BESS",
            &[101, 102],
            &["1", "1"],
            &[150.0, 150.0],
            &[],
        )
        .unwrap();
        let snapshot = capture(&mut sim, &group, &[], "Discharge").unwrap();
        assert_eq!(snapshot.name, "Discharge");
        assert_eq!(snapshot.dispatch.len(), 2);
        assert!((snapshot.dispatch[0].p.value() - 80.0).abs() < 1e-12);
        assert_eq!(snapshot.voltage_setpoints.len(), 2);
        assert!(snapshot.persisted_path.is_none());
    }
}
