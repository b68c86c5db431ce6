//! Contract for the external AC power-flow engine.
//!
//! The engine is consumed strictly as a black box: qcap mutates setpoints,
//! requests a solve, and reads measurements back. Nothing in this crate
//! depends on how the flow is actually solved.
//!
//! Two conditions are deliberately distinguished:
//!
//! - `solve()` returning `Ok(false)` means the trial case failed to
//!   converge. That is a *normal* outcome mid-bisection; callers substitute
//!   a sentinel measurement and keep iterating.
//! - `Err(..)` from any operation means the engine itself is unusable
//!   (case not loaded, bad reference) and the surrounding stage aborts.
//!
//! Every controller call threads `&mut dyn PowerFlowOracle` explicitly; the
//! engine's network state is one shared mutable resource and must never be
//! hidden behind a global.

use crate::units::{MegavoltAmperes, Megavars, Megawatts, PerUnit};
use crate::{BusId, QcapResult, TapDeviceRef, UnitId};
use num_complex::Complex64;
use serde::Serialize;
use std::path::Path;

/// Optional limit overrides applied together with a dispatch setpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DispatchLimits {
    pub pmax: Option<Megawatts>,
    pub pmin: Option<Megawatts>,
    pub qmax: Option<Megavars>,
    pub qmin: Option<Megavars>,
}

/// Solved machine operating state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MachineOutput {
    pub p: Megawatts,
    pub q: Megavars,
    pub pmin: Megawatts,
    pub pmax: Megawatts,
    pub qmin: Megavars,
    pub qmax: Megavars,
    /// Nameplate rating from the engine's machine table.
    pub mbase: MegavoltAmperes,
}

/// Mutate/measure/solve/persist operations the study core consumes.
pub trait PowerFlowOracle {
    /// Load (or reload) a base case. Reloading is how independent study
    /// branches are isolated from each other.
    fn load_case(&mut self, path: &Path) -> QcapResult<()>;

    /// Set a unit's active-power output, optionally overriding its limits.
    fn set_generator_output(
        &mut self,
        bus: BusId,
        unit: &UnitId,
        p: Megawatts,
        limits: Option<DispatchLimits>,
    ) -> QcapResult<()>;

    /// Administratively place a unit in or out of service.
    fn set_unit_status(&mut self, bus: BusId, unit: &UnitId, in_service: bool) -> QcapResult<()>;

    /// Set the voltage schedule a unit's plant holds at its regulated bus.
    fn set_voltage_schedule(
        &mut self,
        bus: BusId,
        regulated_bus: BusId,
        v: PerUnit,
    ) -> QcapResult<()>;

    /// Set a transformer's off-nominal tap ratio.
    fn set_tap_ratio(&mut self, device: &TapDeviceRef, ratio: f64) -> QcapResult<()>;

    /// Force a switched shunt (capacitor bank) out of service.
    fn disconnect_shunt(&mut self, bus: BusId, shunt_id: &str) -> QcapResult<()>;

    /// Complex flow on a branch: `re` = MW, `im` = Mvar.
    fn get_branch_flow(&mut self, from: BusId, to: BusId, circuit: &str) -> QcapResult<Complex64>;

    /// Solved machine output and limits.
    fn get_machine_output(&mut self, bus: BusId, unit: &UnitId) -> QcapResult<MachineOutput>;

    /// All bus voltage magnitudes in the solved case.
    fn get_bus_voltages(&mut self) -> QcapResult<Vec<(BusId, PerUnit)>>;

    /// Run the AC power flow. `Ok(false)` means the trial diverged; that is
    /// not an error.
    fn solve(&mut self) -> QcapResult<bool>;

    /// Persist the current network state as a named case.
    fn save_case(&mut self, path: &Path) -> QcapResult<()>;

    /// Export a one-line diagram of the current case.
    fn export_diagram(&mut self, path: &Path) -> QcapResult<()>;
}
