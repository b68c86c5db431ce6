//! # qcap-core: Reactive Capability Study Core
//!
//! Shared data model for dispatch tuning and reactive-capability studies
//! driven through an external AC power-flow engine.
//!
//! ## Design Philosophy
//!
//! The power-flow engine is a black box behind the [`oracle::PowerFlowOracle`]
//! trait: qcap never sees network equations, only mutate/measure/solve
//! operations. Everything here is the vocabulary those operations speak:
//!
//! - [`ControlGroup`] - the generating units whose setpoints are adjusted
//!   together, pro-rated by nameplate rating
//! - [`MonitoredInterface`] - the branch or machine terminal whose flow is
//!   the feedback signal for tuning
//! - [`TapDevice`] - a transformer's discrete, bounded ratio control
//! - [`VoltageConstraint`] - post-solve bus voltage band check
//! - [`OperatingPointSnapshot`] - a named, persisted boundary operating point
//!
//! The engine's internal network state is a single shared mutable resource,
//! so every controller call takes an explicit `&mut dyn PowerFlowOracle`
//! rather than reaching for a hidden singleton. Isolation between study
//! branches is achieved by reloading the base case, never by locking.
//!
//! ## Modules
//!
//! - [`error`] - unified [`QcapError`] / [`QcapResult`]
//! - [`log`] - injected structured study log
//! - [`oracle`] - the power-flow engine contract
//! - [`units`] - typed MW/Mvar/MVA/per-unit quantities

use serde::{Deserialize, Serialize};

pub mod error;
pub mod log;
pub mod oracle;
pub mod units;

pub use error::{QcapError, QcapResult};
pub use log::{LogEntry, Severity, StudyLog};
pub use oracle::{DispatchLimits, MachineOutput, PowerFlowOracle};
pub use units::{MegavoltAmperes, Megavars, Megawatts, PerUnit};

/// Bus number in the solved case (engine numbering, not positional index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(usize);

impl BusId {
    #[inline]
    pub fn new(value: usize) -> Self {
        BusId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for BusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Machine identifier within a bus (engine convention: short strings like "1").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(value: impl Into<String>) -> Self {
        UnitId(value.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One controllable generating unit in a [`ControlGroup`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlUnit {
    pub bus: BusId,
    pub unit: UnitId,
    /// Nameplate machine rating, used to pro-rate dispatch across the group.
    pub nameplate: MegavoltAmperes,
    /// Bus whose voltage this unit's schedule regulates (often its own bus).
    pub regulated_bus: BusId,
}

/// Ordered set of generating units adjusted together.
///
/// Built from the parallel lists the request layer supplies (buses, unit
/// ids, ratings, regulated buses); mismatched lengths are rejected here,
/// before any solve attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlGroup {
    /// Label used in snapshots and reports (e.g. "BESS", "PV").
    pub label: String,
    units: Vec<ControlUnit>,
}

impl ControlGroup {
    pub fn new(label: impl Into<String>, units: Vec<ControlUnit>) -> QcapResult<Self> {
        if units.is_empty() {
            return Err(QcapError::Config("control group has no units".into()));
        }
        Ok(Self {
            label: label.into(),
            units,
        })
    }

    /// Assemble a group from the parallel lists consumed from the request
    /// layer. `regulated_buses` may be empty, in which case each unit
    /// regulates its own bus.
    pub fn from_parallel_lists(
        label: impl Into<String>,
        buses: &[usize],
        unit_ids: &[&str],
        nameplates_mva: &[f64],
        regulated_buses: &[usize],
    ) -> QcapResult<Self> {
        if buses.len() != unit_ids.len() || buses.len() != nameplates_mva.len() {
            return Err(QcapError::Config(format!(
                "control group lists disagree: {} buses, {} unit ids, {} ratings",
                buses.len(),
                unit_ids.len(),
                nameplates_mva.len()
            )));
        }
        if !regulated_buses.is_empty() && regulated_buses.len() != buses.len() {
            return Err(QcapError::Config(format!(
                "control group lists disagree: {} buses, {} regulated buses",
                buses.len(),
                regulated_buses.len()
            )));
        }
        let units = buses
            .iter()
            .enumerate()
            .map(|(i, &bus)| ControlUnit {
                bus: BusId::new(bus),
                unit: UnitId::new(unit_ids[i]),
                nameplate: MegavoltAmperes(nameplates_mva[i]),
                regulated_bus: BusId::new(*regulated_buses.get(i).unwrap_or(&bus)),
            })
            .collect();
        Self::new(label, units)
    }

    pub fn units(&self) -> &[ControlUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Sum of nameplate ratings across the group.
    pub fn aggregate_nameplate(&self) -> MegavoltAmperes {
        MegavoltAmperes(self.units.iter().map(|u| u.nameplate.value()).sum())
    }

    /// Copy of this group with nameplate ratings refreshed from the solved
    /// case (the engine's machine table is authoritative once a case loads).
    pub fn with_nameplates_from(
        &self,
        oracle: &mut dyn PowerFlowOracle,
    ) -> QcapResult<ControlGroup> {
        let mut units = self.units.clone();
        for unit in &mut units {
            let machine = oracle.get_machine_output(unit.bus, &unit.unit)?;
            unit.nameplate = machine.mbase;
        }
        Ok(ControlGroup {
            label: self.label.clone(),
            units,
        })
    }
}

/// The branch or machine terminal whose flow feeds back into tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitoredInterface {
    Branch {
        from: BusId,
        to: BusId,
        circuit: String,
    },
    MachineTerminal {
        bus: BusId,
        unit: UnitId,
    },
}

impl std::fmt::Display for MonitoredInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitoredInterface::Branch { from, to, circuit } => {
                write!(f, "branch {}-{} ckt {}", from, to, circuit)
            }
            MonitoredInterface::MachineTerminal { bus, unit } => {
                write!(f, "machine {} at bus {}", unit, bus)
            }
        }
    }
}

/// Engine-side reference to a transformer tap control.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "winding", rename_all = "snake_case")]
pub enum TapDeviceRef {
    TwoWinding {
        from: BusId,
        to: BusId,
        circuit: String,
    },
    ThreeWinding {
        from: BusId,
        to: BusId,
        tertiary: BusId,
        circuit: String,
    },
}

impl std::fmt::Display for TapDeviceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TapDeviceRef::TwoWinding { from, to, .. } => write!(f, "xfmr {}-{}", from, to),
            TapDeviceRef::ThreeWinding {
                from, to, tertiary, ..
            } => write!(f, "xfmr {}-{}-{}", from, to, tertiary),
        }
    }
}

/// A transformer's discrete ratio control with bounded, stepped positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapDevice {
    pub reference: TapDeviceRef,
    pub rmin: f64,
    pub rmax: f64,
    pub num_positions: u32,
    pub current_ratio: f64,
}

impl TapDevice {
    /// Tolerance for "ratio is at its bound" comparisons.
    const RATIO_EPS: f64 = 1e-9;

    pub fn new(
        reference: TapDeviceRef,
        rmin: f64,
        rmax: f64,
        num_positions: u32,
        current_ratio: f64,
    ) -> QcapResult<Self> {
        if num_positions <= 1 {
            return Err(QcapError::Config(format!(
                "{}: {} tap positions, cannot step",
                reference, num_positions
            )));
        }
        if rmin > rmax {
            return Err(QcapError::Config(format!(
                "{}: rmin {} exceeds rmax {}",
                reference, rmin, rmax
            )));
        }
        Ok(Self {
            reference,
            rmin,
            rmax,
            num_positions,
            current_ratio: current_ratio.clamp(rmin, rmax),
        })
    }

    /// Ratio change per tap position.
    pub fn step(&self) -> f64 {
        (self.rmax - self.rmin) / (self.num_positions as f64 - 1.0)
    }

    pub fn at_max(&self) -> bool {
        self.current_ratio >= self.rmax - Self::RATIO_EPS
    }

    pub fn at_min(&self) -> bool {
        self.current_ratio <= self.rmin + Self::RATIO_EPS
    }

    /// Advance one position toward rmax, clamped. Returns false if already
    /// at the upper bound.
    pub fn step_up(&mut self) -> bool {
        if self.at_max() {
            return false;
        }
        self.current_ratio = (self.current_ratio + self.step()).min(self.rmax);
        true
    }

    /// Retreat one position toward rmin, clamped. Returns false if already
    /// at the lower bound.
    pub fn step_down(&mut self) -> bool {
        if self.at_min() {
            return false;
        }
        self.current_ratio = (self.current_ratio - self.step()).max(self.rmin);
        true
    }
}

/// Direction of a bus-voltage band check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintDirection {
    /// Flag buses above the limit (lagging studies push voltage up).
    Upper,
    /// Flag buses below the limit (leading studies pull voltage down).
    Lower,
}

/// Post-solve voltage band check over all buses in the case.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltageConstraint {
    pub limit: PerUnit,
    pub direction: ConstraintDirection,
}

/// Result of a [`VoltageConstraint`] scan.
#[derive(Debug, Clone, Serialize)]
pub struct VoltageCheck {
    pub passed: bool,
    pub violations: Vec<(BusId, PerUnit)>,
}

impl VoltageConstraint {
    pub fn upper(limit_pu: f64) -> Self {
        Self {
            limit: PerUnit(limit_pu),
            direction: ConstraintDirection::Upper,
        }
    }

    pub fn lower(limit_pu: f64) -> Self {
        Self {
            limit: PerUnit(limit_pu),
            direction: ConstraintDirection::Lower,
        }
    }

    /// Scan solved bus voltages; slack of 1e-6 pu keeps buses sitting
    /// exactly on the limit from flagging.
    pub fn check(&self, voltages: &[(BusId, PerUnit)]) -> VoltageCheck {
        let violations: Vec<(BusId, PerUnit)> = voltages
            .iter()
            .filter(|(_, v)| match self.direction {
                ConstraintDirection::Upper => v.value() > self.limit.value() + 1e-6,
                ConstraintDirection::Lower => v.value() < self.limit.value() - 1e-6,
            })
            .cloned()
            .collect();
        VoltageCheck {
            passed: violations.is_empty(),
            violations,
        }
    }
}

/// A switched shunt (capacitor bank) that leading studies force out of
/// service before tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuntRef {
    pub bus: BusId,
    pub id: String,
}

/// Solved per-unit dispatch recorded into a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct UnitDispatch {
    pub bus: BusId,
    pub unit: UnitId,
    pub p: Megawatts,
    pub q: Megavars,
    pub pmin: Megawatts,
    pub pmax: Megawatts,
    pub qmin: Megavars,
    pub qmax: Megavars,
}

/// Where to measure a row of the study report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPoint {
    /// Grouping label in the report (e.g. "BESS 1").
    pub group: String,
    /// Point name (e.g. "POI", "Unit at Gen Term").
    pub name: String,
    pub interface: MonitoredInterface,
}

/// One measured report row: apparent/active/reactive power and power factor.
#[derive(Debug, Clone, Serialize)]
pub struct PointMeasurement {
    pub group: String,
    pub name: String,
    pub p: Megawatts,
    pub q: Megavars,
    pub s: MegavoltAmperes,
    pub power_factor: f64,
}

impl PointMeasurement {
    /// Derive S and PF from a measured (P, Q) pair. PF is zero for
    /// near-zero apparent power rather than dividing by noise.
    pub fn from_pq(group: impl Into<String>, name: impl Into<String>, p: Megawatts, q: Megavars) -> Self {
        let s = MegavoltAmperes::from_pq(p, q);
        let power_factor = if s.value() > 1e-6 {
            p.value() / s.value()
        } else {
            0.0
        };
        Self {
            group: group.into(),
            name: name.into(),
            p,
            q,
            s,
            power_factor,
        }
    }
}

/// A named, persisted boundary operating point.
///
/// Created once per envelope or scenario stage and never mutated after the
/// engine saves the case.
#[derive(Debug, Clone, Serialize)]
pub struct OperatingPointSnapshot {
    pub name: String,
    pub dispatch: Vec<UnitDispatch>,
    pub voltage_setpoints: Vec<(BusId, PerUnit)>,
    pub tap_ratios: Vec<(TapDeviceRef, f64)>,
    pub measurements: Vec<PointMeasurement>,
    /// Path of the saved case, once persisted.
    pub persisted_path: Option<std::path::PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_from_parallel_lists() {
        let group = ControlGroup::from_parallel_lists(
            "BESS",
            &[101, 102],
            &["1", "1"],
            &[150.0, 150.0],
            &[201, 202],
        )
        .unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group.units()[1].regulated_bus, BusId::new(202));
        assert!((group.aggregate_nameplate().value() - 300.0).abs() < 1e-12);
    }

    #[test]
    fn test_group_defaults_regulated_bus_to_own_bus() {
        let group =
            ControlGroup::from_parallel_lists("PV", &[7], &["2"], &[80.0], &[]).unwrap();
        assert_eq!(group.units()[0].regulated_bus, BusId::new(7));
    }

    #[test]
    fn test_group_list_mismatch_rejected() {
        let err = ControlGroup::from_parallel_lists("BESS", &[1, 2], &["1"], &[100.0, 100.0], &[])
            .unwrap_err();
        assert!(matches!(err, QcapError::Config(_)));
    }

    #[test]
    fn test_empty_group_rejected() {
        assert!(ControlGroup::from_parallel_lists("BESS", &[], &[], &[], &[]).is_err());
    }

    #[test]
    fn test_tap_device_stepping() {
        let mut tap = TapDevice::new(
            TapDeviceRef::TwoWinding {
                from: BusId::new(1),
                to: BusId::new(2),
                circuit: "1".into(),
            },
            0.9,
            1.1,
            21,
            1.0,
        )
        .unwrap();
        assert!((tap.step() - 0.01).abs() < 1e-12);

        // Ten steps up reaches rmax exactly; the eleventh refuses.
        for _ in 0..10 {
            assert!(tap.step_up());
        }
        assert!(tap.at_max());
        assert!(!tap.step_up());
        assert!((tap.current_ratio - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_tap_device_single_position_rejected() {
        let err = TapDevice::new(
            TapDeviceRef::TwoWinding {
                from: BusId::new(1),
                to: BusId::new(2),
                circuit: "1".into(),
            },
            0.9,
            1.1,
            1,
            1.0,
        )
        .unwrap_err();
        assert!(matches!(err, QcapError::Config(_)));
    }

    #[test]
    fn test_tap_ratio_clamped_on_construction() {
        let tap = TapDevice::new(
            TapDeviceRef::TwoWinding {
                from: BusId::new(1),
                to: BusId::new(2),
                circuit: "1".into(),
            },
            0.9,
            1.1,
            11,
            1.5,
        )
        .unwrap();
        assert!((tap.current_ratio - 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_voltage_violation_detection() {
        let voltages = vec![
            (BusId::new(1), PerUnit(1.12)),
            (BusId::new(2), PerUnit(1.05)),
        ];
        let check = VoltageConstraint::upper(1.1).check(&voltages);
        assert!(!check.passed);
        assert_eq!(check.violations.len(), 1);
        assert_eq!(check.violations[0].0, BusId::new(1));

        let check = VoltageConstraint::lower(0.9).check(&voltages);
        assert!(check.passed);
    }

    #[test]
    fn test_voltage_check_slack_at_limit() {
        // Sitting exactly on the limit is not a violation.
        let voltages = vec![(BusId::new(1), PerUnit(1.1))];
        assert!(VoltageConstraint::upper(1.1).check(&voltages).passed);
    }

    #[test]
    fn test_point_measurement_power_factor() {
        let m = PointMeasurement::from_pq("BESS 1", "POI", Megawatts(95.0), Megavars(31.225));
        assert!((m.power_factor - 0.95).abs() < 1e-3);

        let zero = PointMeasurement::from_pq("BESS 1", "POI", Megawatts(0.0), Megavars(0.0));
        assert_eq!(zero.power_factor, 0.0);
    }
}
