//! Append-only CSV trace of bisection iterations.
//!
//! One file per study; each tuning call appends its own header row followed
//! by `(iteration, control, measured, error)` rows, so a P table and the Q
//! table that follows it stay distinguishable in the same file.

use crate::bisection::TuningStep;
use qcap_core::QcapResult;
use std::fs::{File, OpenOptions};
use std::path::Path;

pub struct TraceWriter {
    writer: csv::Writer<File>,
}

impl TraceWriter {
    /// Start a fresh trace file, truncating any previous run.
    pub fn create(path: &Path) -> QcapResult<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: csv::Writer::from_writer(file),
        })
    }

    /// Reopen an existing trace file for appending.
    pub fn append(path: &Path) -> QcapResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: csv::Writer::from_writer(file),
        })
    }

    /// Write the header row for the next tuning table.
    pub fn begin_table(&mut self, control_label: &str, measured_label: &str) -> QcapResult<()> {
        self.writer
            .write_record(["Iteration", control_label, measured_label, "Error"])
            .map_err(|e| qcap_core::QcapError::Other(e.to_string()))?;
        Ok(())
    }

    pub fn record(&mut self, step: &TuningStep) -> QcapResult<()> {
        self.writer
            .write_record([
                step.iteration.to_string(),
                format!("{:.6}", step.control_value),
                format!("{:.6}", step.measured_value),
                format!("{:.6e}", step.error),
            ])
            .map_err(|e| qcap_core::QcapError::Other(e.to_string()))?;
        Ok(())
    }

    pub fn flush(&mut self) -> QcapResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_tables_in_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.csv");

        let mut writer = TraceWriter::create(&path).unwrap();
        writer.begin_table("k_factor", "P_POI").unwrap();
        writer
            .record(&TuningStep {
                iteration: 1,
                control_value: 0.25,
                measured_value: 75.0,
                error: -25.0,
            })
            .unwrap();
        writer.begin_table("VSched", "Q_POI").unwrap();
        writer
            .record(&TuningStep {
                iteration: 1,
                control_value: 1.0,
                measured_value: 0.5,
                error: 0.5,
            })
            .unwrap();
        writer.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Iteration,k_factor,P_POI,Error"));
        assert!(text.contains("Iteration,VSched,Q_POI,Error"));
        assert_eq!(text.lines().count(), 4);
    }
}
