//! Unified error types for the qcap ecosystem.
//!
//! Only genuinely fatal conditions travel as errors: a solver engine that
//! cannot be initialized or a study configuration that is inconsistent.
//! Numeric non-convergence during tuning is *not* an error: it is absorbed
//! into session status and the study log, and downstream stages proceed
//! best-effort.

use thiserror::Error;

/// Unified error type for all qcap operations.
#[derive(Error, Debug)]
pub enum QcapError {
    /// The external power-flow engine could not be initialized or could not
    /// load the requested case. Fatal for the whole scenario.
    #[error("oracle error: {0}")]
    Oracle(String),

    /// Study configuration rejected before any solve attempt (mismatched
    /// list lengths, empty control group, bad tolerances).
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors (trace logs, manifests, reports).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors.
    #[error("parse error: {0}")]
    Parse(String),

    /// Generic errors (for wrapping external errors).
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using QcapError.
pub type QcapResult<T> = Result<T, QcapError>;

impl From<anyhow::Error> for QcapError {
    fn from(err: anyhow::Error) -> Self {
        QcapError::Other(err.to_string())
    }
}

impl From<String> for QcapError {
    fn from(s: String) -> Self {
        QcapError::Other(s)
    }
}

impl From<&str> for QcapError {
    fn from(s: &str) -> Self {
        QcapError::Other(s.to_string())
    }
}
