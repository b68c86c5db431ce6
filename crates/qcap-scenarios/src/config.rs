//! Study configuration loaded from YAML or JSON.
//!
//! The request layer hands the study over as parallel lists (buses, unit
//! ids, ratings); everything is validated here, before the engine sees a
//! single call, so a malformed study fails as `QcapError::Config` instead
//! of a mid-run solver error.

use qcap_algo::bisection::{DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE};
use qcap_algo::TuningOptions;
use qcap_core::{
    ControlGroup, MonitoredInterface, QcapError, QcapResult, ReportPoint, ShuntRef, TapDevice,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One technology's generating units, as the request supplies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub label: String,
    pub buses: Vec<usize>,
    pub unit_ids: Vec<String>,
    pub nameplates_mva: Vec<f64>,
    /// Empty means each unit regulates its own bus.
    #[serde(default)]
    pub regulated_buses: Vec<usize>,
    /// Storage flips dispatch sign in charge stages.
    #[serde(default)]
    pub storage: bool,
}

impl GroupConfig {
    pub fn to_group(&self) -> QcapResult<ControlGroup> {
        let ids: Vec<&str> = self.unit_ids.iter().map(String::as_str).collect();
        ControlGroup::from_parallel_lists(
            self.label.clone(),
            &self.buses,
            &ids,
            &self.nameplates_mva,
            &self.regulated_buses,
        )
    }
}

/// Complete description of one study: case, plant, targets, overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    /// Saved case the engine loads before anything else.
    pub case_file: PathBuf,
    /// Point of interconnection (or machine terminal) the loops measure.
    pub interface: MonitoredInterface,
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub taps: Vec<TapDevice>,
    #[serde(default)]
    pub shunts: Vec<ShuntRef>,
    #[serde(default)]
    pub report_points: Vec<ReportPoint>,
    /// Net plant output at the interface, MW.
    pub p_net: f64,
    /// Interface reactive target for plain Q tuning, Mvar.
    #[serde(default)]
    pub q_target: f64,
    pub tolerance: Option<f64>,
    pub max_iterations: Option<u32>,
}

impl StudyConfig {
    /// Everything checkable without an engine. Runs before any solve.
    pub fn validate(&self) -> QcapResult<()> {
        if self.groups.is_empty() {
            return Err(QcapError::Config("study has no control groups".into()));
        }
        for group in &self.groups {
            group.to_group()?;
        }
        // Deserialization fills the tap fields directly; route them through
        // the checked constructor so an unsteppable device or an inverted
        // ratio range fails here instead of hanging a tap loop mid-study.
        for tap in &self.taps {
            TapDevice::new(
                tap.reference.clone(),
                tap.rmin,
                tap.rmax,
                tap.num_positions,
                tap.current_ratio,
            )?;
        }
        if let Some(tol) = self.tolerance {
            if !(tol > 0.0) {
                return Err(QcapError::Config(format!(
                    "tolerance must be positive, got {tol}"
                )));
            }
        }
        if self.max_iterations == Some(0) {
            return Err(QcapError::Config("max_iterations must be at least 1".into()));
        }
        if !self.p_net.is_finite() {
            return Err(QcapError::Config(format!("p_net is not finite: {}", self.p_net)));
        }
        Ok(())
    }

    /// Tuner settings with this study's overrides applied.
    pub fn options(&self) -> TuningOptions {
        TuningOptions {
            tolerance: self.tolerance.unwrap_or(DEFAULT_TOLERANCE),
            max_iterations: self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
        }
    }
}

/// Load a study config, format chosen by extension (unknown extensions try
/// YAML first, then JSON).
pub fn load_config(path: &Path) -> QcapResult<StudyConfig> {
    let data = fs::read_to_string(path)?;
    let mut config: StudyConfig = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            serde_yaml::from_str(&data)
                .map_err(|e| QcapError::Parse(format!("{}: {e}", path.display())))?
        }
        Some(ext) if ext.eq_ignore_ascii_case("json") => serde_json::from_str(&data)
            .map_err(|e| QcapError::Parse(format!("{}: {e}", path.display())))?,
        _ => serde_yaml::from_str(&data)
            .or_else(|_| serde_json::from_str(&data))
            .map_err(|e| QcapError::Parse(format!("{}: {e}", path.display())))?,
    };
    config.validate()?;
    // Same clamp the checked constructor applies.
    for tap in &mut config.taps {
        tap.current_ratio = tap.current_ratio.clamp(tap.rmin, tap.rmax);
    }
    Ok(config)
}
