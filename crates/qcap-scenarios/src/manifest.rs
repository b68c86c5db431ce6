//! JSON run manifest written next to the study outputs so downstream
//! tooling can pick up results without re-parsing logs.

use chrono::{DateTime, Utc};
use qcap_core::{OperatingPointSnapshot, QcapError, QcapResult, StudyLog};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One persisted operating point as the manifest records it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestCase {
    pub name: String,
    pub saved_case: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// "envelope", "scenario", "tune" etc.
    pub study_kind: String,
    pub base_case: PathBuf,
    pub cases: Vec<ManifestCase>,
    pub warnings: usize,
    pub errors: usize,
}

impl RunManifest {
    pub fn new(
        study_kind: impl Into<String>,
        base_case: impl Into<PathBuf>,
        snapshots: &[OperatingPointSnapshot],
        log: &StudyLog,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            study_kind: study_kind.into(),
            base_case: base_case.into(),
            cases: snapshots
                .iter()
                .map(|s| ManifestCase {
                    name: s.name.clone(),
                    saved_case: s.persisted_path.clone(),
                })
                .collect(),
            warnings: log.warning_count(),
            errors: if log.has_errors() { 1 } else { 0 },
        }
    }
}

pub fn write_manifest(path: &Path, manifest: &RunManifest) -> QcapResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| QcapError::Other(format!("serializing run manifest: {e}")))?;
    fs::write(path, json)?;
    Ok(())
}

pub fn load_manifest(path: &Path) -> QcapResult<RunManifest> {
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data)
        .map_err(|e| QcapError::Parse(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_round_trips() {
        let snapshots = vec![OperatingPointSnapshot {
            name: "Discharge".into(),
            dispatch: Vec::new(),
            voltage_setpoints: Vec::new(),
            tap_ratios: Vec::new(),
            measurements: Vec::new(),
            persisted_path: Some(PathBuf::from("/cases/plant_BESS_Discharge.sav")),
        }];
        let mut log = StudyLog::new();
        log.warn("scenario", "tuning exhausted");
        let manifest = RunManifest::new("scenario", "/cases/plant.sav", &snapshots, &log);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/run_manifest.json");
        write_manifest(&path, &manifest).unwrap();

        let loaded = load_manifest(&path).unwrap();
        assert_eq!(loaded.run_id, manifest.run_id);
        assert_eq!(loaded.cases.len(), 1);
        assert_eq!(loaded.cases[0].name, "Discharge");
        assert_eq!(loaded.warnings, 1);
        assert_eq!(loaded.errors, 0);
    }
}
