//! Structured study log collected during tuning and envelope runs.
//!
//! Controllers and orchestrators receive a `&mut StudyLog` explicitly rather
//! than printing or capturing a logger from enclosing scope. Every structured
//! outcome carries the log that produced it, so callers (CLI, HTTP layer)
//! can render or serialize the full trail.
//!
//! # Example
//!
//! ```
//! use qcap_core::log::{StudyLog, Severity};
//!
//! let mut log = StudyLog::new();
//! log.info("tuning", "starting P bisection");
//! log.warn("tuning", "did not converge after 30 iterations");
//! assert_eq!(log.warning_count(), 1);
//! ```

use serde::Serialize;

/// Severity level for study log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Normal progress reporting.
    Info,
    /// Unusual but the run continued (non-convergence, best-effort snapshot).
    Warning,
    /// A stage could not complete.
    Error,
}

/// A single entry in a study log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub severity: Severity,
    /// Category for grouping (e.g. "tuning", "envelope", "scenario").
    pub category: String,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "[{}:{}] {}", severity, self.category, self.message)
    }
}

/// Ordered collection of log entries for one study run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StudyLog {
    entries: Vec<LogEntry>,
}

impl StudyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, category: &str, message: impl Into<String>) {
        self.push(Severity::Info, category, message);
    }

    pub fn warn(&mut self, category: &str, message: impl Into<String>) {
        self.push(Severity::Warning, category, message);
    }

    pub fn error(&mut self, category: &str, message: impl Into<String>) {
        self.push(Severity::Error, category, message);
    }

    fn push(&mut self, severity: Severity, category: &str, message: impl Into<String>) {
        self.entries.push(LogEntry {
            severity,
            category: category.to_string(),
            message: message.into(),
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.severity == Severity::Warning)
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Error)
    }

    /// Append all entries from another log (used when a sub-stage ran with
    /// its own collector).
    pub fn extend(&mut self, other: StudyLog) {
        self.entries.extend(other.entries);
    }

    /// Render entries as plain lines for text output.
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_rendering() {
        let mut log = StudyLog::new();
        log.info("tuning", "iter 1");
        log.warn("envelope", "all taps at rmax");
        log.error("oracle", "load failed");

        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.warning_count(), 1);
        assert!(log.has_errors());
        assert!(log.lines()[1].contains("[warning:envelope]"));
    }

    #[test]
    fn test_extend() {
        let mut outer = StudyLog::new();
        let mut inner = StudyLog::new();
        inner.info("tuning", "converged");
        outer.extend(inner);
        assert_eq!(outer.entries().len(), 1);
    }
}
