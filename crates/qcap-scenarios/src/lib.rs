//! # qcap-scenarios: Study Configuration and Orchestration
//!
//! Ties the tuning and envelope algorithms into complete studies: a
//! [`config::StudyConfig`] loaded from YAML/JSON describes the plant, the
//! [`orchestrator`] walks it through its named operating points, and every
//! run leaves a CSV [`report`] and a JSON [`manifest`] behind for
//! downstream tooling.

pub mod config;
pub mod manifest;
pub mod orchestrator;
pub mod report;

pub use config::{load_config, GroupConfig, StudyConfig};
pub use manifest::{load_manifest, write_manifest, RunManifest};
pub use orchestrator::{run, ScenarioKind, ScenarioOutcome, ScenarioStudy, TechnologyGroup};
pub use report::{write_report, CaseMeasurements};
