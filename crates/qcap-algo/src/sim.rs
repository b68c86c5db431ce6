//! Linearized in-memory oracle for dry runs and tests.
//!
//! Real studies run against an external AC engine through
//! [`PowerFlowOracle`]; this backend stands in for it with a monotonic
//! linear response model:
//!
//! - interface MW = gain x (sum of in-service unit MW) + voltage coupling
//! - machine Mvar = schedule deviation x slope, clamped to `[qmin, qmax]`
//! - interface Mvar = sum of machine Mvar + direct tap contribution +
//!   connected shunt banks
//! - monitored bus voltages track the schedule and tap deviations linearly
//!
//! The model is deliberately simple: it exists to exercise the tuning and
//! envelope state machines (including divergence injection and reload
//! isolation), not to approximate network physics.

use num_complex::Complex64;
use qcap_core::oracle::{DispatchLimits, MachineOutput};
use qcap_core::{
    BusId, MegavoltAmperes, Megavars, Megawatts, MonitoredInterface, PerUnit, PowerFlowOracle,
    QcapError, QcapResult, TapDeviceRef, UnitId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// One simulated machine.
#[derive(Debug, Clone)]
pub struct SimUnit {
    pub mbase: f64,
    pub pmin: f64,
    pub pmax: f64,
    pub qmin: f64,
    pub qmax: f64,
    pub p: f64,
    pub in_service: bool,
    pub vsched: f64,
    pub regulated_bus: BusId,
    /// Mvar produced per pu of schedule above nominal.
    pub q_slope: f64,
    /// Mvar produced per unit of total tap-ratio deviation.
    pub tap_q_slope: f64,
}

impl SimUnit {
    pub fn new(regulated_bus: BusId, mbase: f64) -> Self {
        Self {
            mbase,
            pmin: -mbase,
            pmax: mbase,
            qmin: -mbase / 2.0,
            qmax: mbase / 2.0,
            p: 0.0,
            in_service: true,
            vsched: 1.0,
            regulated_bus,
            q_slope: 500.0,
            tap_q_slope: 0.0,
        }
    }

    fn q(&self, tap_deviation: f64) -> f64 {
        let raw = (self.vsched - 1.0) * self.q_slope + tap_deviation * self.tap_q_slope;
        raw.clamp(self.qmin, self.qmax)
    }
}

/// An uncontrolled bus whose voltage drifts with the schedule and taps.
#[derive(Debug, Clone)]
struct SimBus {
    base: f64,
    v_coupling: f64,
    tap_coupling: f64,
}

#[derive(Debug, Clone)]
struct SimShunt {
    mvar: f64,
    connected: bool,
}

#[derive(Debug, Clone, Default)]
struct SimState {
    units: BTreeMap<(usize, String), SimUnit>,
    taps: HashMap<TapDeviceRef, (f64, f64)>, // (initial, current) ratio
    shunts: HashMap<(usize, String), SimShunt>,
    buses: BTreeMap<usize, SimBus>,
}

impl SimState {
    fn tap_deviation(&self) -> f64 {
        self.taps
            .values()
            .map(|(initial, current)| current - initial)
            .sum()
    }

    fn mean_schedule(&self) -> f64 {
        let live: Vec<f64> = self
            .units
            .values()
            .filter(|u| u.in_service)
            .map(|u| u.vsched)
            .collect();
        if live.is_empty() {
            1.0
        } else {
            live.iter().sum::<f64>() / live.len() as f64
        }
    }
}

/// Linear-response simulation backend.
pub struct SimOracle {
    interface: (BusId, BusId, String),
    state: SimState,
    base: SimState,
    /// Interface MW per MW of dispatched output.
    pub p_gain: f64,
    /// Interface MW offset (station load, losses).
    pub p_offset: f64,
    /// Interface MW per pu of mean schedule above nominal.
    pub p_v_coupling: f64,
    /// Interface Mvar per unit of total tap deviation (ratio side).
    pub tap_poi_gain: f64,
    /// Interface Mvar offset.
    pub q_offset: f64,
    solve_count: u32,
    diverge_on: HashSet<u32>,
    fail_load: bool,
    loaded_case: Option<PathBuf>,
    saved_cases: Vec<PathBuf>,
    exported_diagrams: Vec<PathBuf>,
}

impl SimOracle {
    pub fn new(from: usize, to: usize, circuit: &str) -> Self {
        Self {
            interface: (BusId::new(from), BusId::new(to), circuit.to_string()),
            state: SimState::default(),
            base: SimState::default(),
            p_gain: 1.0,
            p_offset: 0.0,
            p_v_coupling: 0.0,
            tap_poi_gain: 0.0,
            q_offset: 0.0,
            solve_count: 0,
            diverge_on: HashSet::new(),
            fail_load: false,
            loaded_case: None,
            saved_cases: Vec::new(),
            exported_diagrams: Vec::new(),
        }
    }

    /// Canonical fixture: two 150-MVA units behind one interface branch.
    pub fn two_unit_plant() -> Self {
        let mut sim = Self::new(1, 2, "1");
        sim.add_unit(101, "1", SimUnit::new(BusId::new(101), 150.0));
        sim.add_unit(102, "1", SimUnit::new(BusId::new(102), 150.0));
        sim.add_bus(1, 1.0, 0.5, 0.0);
        sim
    }

    /// The branch this oracle measures.
    pub fn interface(&self) -> MonitoredInterface {
        MonitoredInterface::Branch {
            from: self.interface.0,
            to: self.interface.1,
            circuit: self.interface.2.clone(),
        }
    }

    pub fn add_unit(&mut self, bus: usize, id: &str, unit: SimUnit) {
        self.state.units.insert((bus, id.to_string()), unit);
        self.base = self.state.clone();
    }

    pub fn add_tap(&mut self, reference: TapDeviceRef, initial_ratio: f64) {
        self.state
            .taps
            .insert(reference, (initial_ratio, initial_ratio));
        self.base = self.state.clone();
    }

    pub fn add_shunt(&mut self, bus: usize, id: &str, mvar: f64) {
        self.state.shunts.insert(
            (bus, id.to_string()),
            SimShunt {
                mvar,
                connected: true,
            },
        );
        self.base = self.state.clone();
    }

    /// Register an uncontrolled bus: `v = base + v_coupling * (mean_sched -
    /// 1.0) + tap_coupling * tap_deviation`.
    pub fn add_bus(&mut self, bus: usize, base: f64, v_coupling: f64, tap_coupling: f64) {
        self.state.buses.insert(
            bus,
            SimBus {
                base,
                v_coupling,
                tap_coupling,
            },
        );
        self.base = self.state.clone();
    }

    /// Make the given solve invocations (1-based) report divergence.
    pub fn diverge_on_solves(&mut self, solves: &[u32]) {
        self.diverge_on.extend(solves.iter().copied());
    }

    /// Make every `load_case` fail, simulating an unusable engine.
    pub fn fail_loads(&mut self) {
        self.fail_load = true;
    }

    pub fn saved_cases(&self) -> &[PathBuf] {
        &self.saved_cases
    }

    pub fn exported_diagrams(&self) -> &[PathBuf] {
        &self.exported_diagrams
    }

    pub fn solve_count(&self) -> u32 {
        self.solve_count
    }

    pub fn unit(&self, bus: usize, id: &str) -> Option<&SimUnit> {
        self.state.units.get(&(bus, id.to_string()))
    }

    pub fn unit_mut(&mut self, bus: usize, id: &str) -> Option<&mut SimUnit> {
        self.state.units.get_mut(&(bus, id.to_string()))
    }

    /// Re-snapshot the current state as the reload baseline. Call after
    /// mutating units directly in test setup.
    pub fn commit_base(&mut self) {
        self.base = self.state.clone();
    }

    fn interface_p(&self) -> f64 {
        let dispatched: f64 = self
            .state
            .units
            .values()
            .filter(|u| u.in_service)
            .map(|u| u.p)
            .sum();
        self.p_gain * dispatched + self.p_v_coupling * (self.state.mean_schedule() - 1.0)
            + self.p_offset
    }

    fn interface_q(&self) -> f64 {
        let tap_dev = self.state.tap_deviation();
        let machine_q: f64 = self
            .state
            .units
            .values()
            .filter(|u| u.in_service)
            .map(|u| u.q(tap_dev))
            .sum();
        let shunt_q: f64 = self
            .state
            .shunts
            .values()
            .filter(|s| s.connected)
            .map(|s| s.mvar)
            .sum();
        machine_q + shunt_q + self.tap_poi_gain * tap_dev + self.q_offset
    }
}

impl PowerFlowOracle for SimOracle {
    fn load_case(&mut self, path: &Path) -> QcapResult<()> {
        if self.fail_load {
            return Err(QcapError::Oracle(format!(
                "cannot load case '{}'",
                path.display()
            )));
        }
        self.state = self.base.clone();
        self.loaded_case = Some(path.to_path_buf());
        Ok(())
    }

    fn set_generator_output(
        &mut self,
        bus: BusId,
        unit: &UnitId,
        p: Megawatts,
        limits: Option<DispatchLimits>,
    ) -> QcapResult<()> {
        let sim_unit = self
            .state
            .units
            .get_mut(&(bus.value(), unit.as_str().to_string()))
            .ok_or_else(|| QcapError::Oracle(format!("no machine {unit} at bus {bus}")))?;
        sim_unit.p = p.value();
        if let Some(limits) = limits {
            if let Some(pmax) = limits.pmax {
                sim_unit.pmax = pmax.value();
            }
            if let Some(pmin) = limits.pmin {
                sim_unit.pmin = pmin.value();
            }
            if let Some(qmax) = limits.qmax {
                sim_unit.qmax = qmax.value();
            }
            if let Some(qmin) = limits.qmin {
                sim_unit.qmin = qmin.value();
            }
        }
        Ok(())
    }

    fn set_unit_status(&mut self, bus: BusId, unit: &UnitId, in_service: bool) -> QcapResult<()> {
        let sim_unit = self
            .state
            .units
            .get_mut(&(bus.value(), unit.as_str().to_string()))
            .ok_or_else(|| QcapError::Oracle(format!("no machine {unit} at bus {bus}")))?;
        sim_unit.in_service = in_service;
        Ok(())
    }

    fn set_voltage_schedule(
        &mut self,
        bus: BusId,
        regulated_bus: BusId,
        v: PerUnit,
    ) -> QcapResult<()> {
        let mut found = false;
        for ((unit_bus, _), unit) in self.state.units.iter_mut() {
            if *unit_bus == bus.value() {
                unit.vsched = v.value();
                unit.regulated_bus = regulated_bus;
                found = true;
            }
        }
        if found {
            Ok(())
        } else {
            Err(QcapError::Oracle(format!("no plant at bus {bus}")))
        }
    }

    fn set_tap_ratio(&mut self, device: &TapDeviceRef, ratio: f64) -> QcapResult<()> {
        let tap = self
            .state
            .taps
            .get_mut(device)
            .ok_or_else(|| QcapError::Oracle(format!("no tap device {device}")))?;
        tap.1 = ratio;
        Ok(())
    }

    fn disconnect_shunt(&mut self, bus: BusId, shunt_id: &str) -> QcapResult<()> {
        let shunt = self
            .state
            .shunts
            .get_mut(&(bus.value(), shunt_id.to_string()))
            .ok_or_else(|| QcapError::Oracle(format!("no shunt {shunt_id} at bus {bus}")))?;
        shunt.connected = false;
        Ok(())
    }

    fn get_branch_flow(&mut self, from: BusId, to: BusId, circuit: &str) -> QcapResult<Complex64> {
        if (from, to, circuit) != (self.interface.0, self.interface.1, self.interface.2.as_str()) {
            return Err(QcapError::Oracle(format!(
                "branch {from}-{to} ckt {circuit} is not modeled"
            )));
        }
        Ok(Complex64::new(self.interface_p(), self.interface_q()))
    }

    fn get_machine_output(&mut self, bus: BusId, unit: &UnitId) -> QcapResult<MachineOutput> {
        let tap_dev = self.state.tap_deviation();
        let sim_unit = self
            .state
            .units
            .get(&(bus.value(), unit.as_str().to_string()))
            .ok_or_else(|| QcapError::Oracle(format!("no machine {unit} at bus {bus}")))?;
        Ok(MachineOutput {
            p: Megawatts(sim_unit.p),
            q: Megavars(sim_unit.q(tap_dev)),
            pmin: Megawatts(sim_unit.pmin),
            pmax: Megawatts(sim_unit.pmax),
            qmin: Megavars(sim_unit.qmin),
            qmax: Megavars(sim_unit.qmax),
            mbase: MegavoltAmperes(sim_unit.mbase),
        })
    }

    fn get_bus_voltages(&mut self) -> QcapResult<Vec<(BusId, PerUnit)>> {
        let mean = self.state.mean_schedule();
        let tap_dev = self.state.tap_deviation();
        let mut voltages: Vec<(BusId, PerUnit)> = self
            .state
            .units
            .values()
            .filter(|u| u.in_service)
            .map(|u| (u.regulated_bus, PerUnit(u.vsched)))
            .collect();
        voltages.extend(self.state.buses.iter().map(|(&bus, sim_bus)| {
            (
                BusId::new(bus),
                PerUnit(
                    sim_bus.base
                        + sim_bus.v_coupling * (mean - 1.0)
                        + sim_bus.tap_coupling * tap_dev,
                ),
            )
        }));
        Ok(voltages)
    }

    fn solve(&mut self) -> QcapResult<bool> {
        self.solve_count += 1;
        Ok(!self.diverge_on.contains(&self.solve_count))
    }

    fn save_case(&mut self, path: &Path) -> QcapResult<()> {
        self.saved_cases.push(path.to_path_buf());
        Ok(())
    }

    fn export_diagram(&mut self, path: &Path) -> QcapResult<()> {
        self.exported_diagrams.push(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_sums_at_interface() {
        let mut sim = SimOracle::two_unit_plant();
        sim.set_generator_output(BusId::new(101), &UnitId::new("1"), Megawatts(40.0), None)
            .unwrap();
        sim.set_generator_output(BusId::new(102), &UnitId::new("1"), Megawatts(60.0), None)
            .unwrap();
        sim.solve().unwrap();
        let flow = sim
            .get_branch_flow(BusId::new(1), BusId::new(2), "1")
            .unwrap();
        assert!((flow.re - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_schedule_drives_reactive_export() {
        let mut sim = SimOracle::two_unit_plant();
        for bus in [101, 102] {
            sim.set_voltage_schedule(BusId::new(bus), BusId::new(bus), PerUnit(1.05))
                .unwrap();
        }
        sim.solve().unwrap();
        let flow = sim
            .get_branch_flow(BusId::new(1), BusId::new(2), "1")
            .unwrap();
        // 0.05 pu x 500 Mvar/pu x 2 units, both inside limits.
        assert!((flow.im - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_machine_q_clamps_at_limits() {
        let mut sim = SimOracle::two_unit_plant();
        sim.set_voltage_schedule(BusId::new(101), BusId::new(101), PerUnit(1.4))
            .unwrap();
        let out = sim
            .get_machine_output(BusId::new(101), &UnitId::new("1"))
            .unwrap();
        assert!((out.q.value() - out.qmax.value()).abs() < 1e-12);
    }

    #[test]
    fn test_reload_restores_base_state() {
        let mut sim = SimOracle::two_unit_plant();
        sim.set_generator_output(BusId::new(101), &UnitId::new("1"), Megawatts(99.0), None)
            .unwrap();
        sim.load_case(Path::new("base.sav")).unwrap();
        assert_eq!(sim.unit(101, "1").unwrap().p, 0.0);
    }

    #[test]
    fn test_out_of_service_units_do_not_contribute() {
        let mut sim = SimOracle::two_unit_plant();
        sim.set_generator_output(BusId::new(101), &UnitId::new("1"), Megawatts(50.0), None)
            .unwrap();
        sim.set_unit_status(BusId::new(101), &UnitId::new("1"), false)
            .unwrap();
        let flow = sim
            .get_branch_flow(BusId::new(1), BusId::new(2), "1")
            .unwrap();
        assert!(flow.re.abs() < 1e-12);
    }
}
