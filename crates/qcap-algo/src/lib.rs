//! # qcap-algo: Tuning and Envelope Algorithms
//!
//! The feedback loops that drive a [`qcap_core::PowerFlowOracle`] onto
//! target operating points:
//!
//! - [`bisection`] - generic apply/solve/measure bisection over one scalar
//!   control, with divergent-solve handling and iteration traces
//! - [`dispatch`] - pro-rata active-power tuning of a control group
//! - [`voltage`] - uniform voltage-schedule tuning onto a reactive target
//! - [`envelope`] - the four-case reactive-capability boundary engine with
//!   discrete tap-stepping fallback
//! - [`measure`] / [`snapshot`] - post-solve report rows and operating-point
//!   capture
//! - [`sim`] - a linearized in-memory oracle for dry runs and tests
//!
//! All loops assume the measured quantity responds monotonically to the
//! control within its bracket; see [`bisection`] for the consequences when
//! it does not.

pub mod bisection;
pub mod dispatch;
pub mod envelope;
pub mod measure;
pub mod sim;
pub mod snapshot;
pub mod trace;
pub mod voltage;

pub use bisection::{
    Bisection, DirectionRule, TuningOptions, TuningSession, TuningStatus, TuningStep,
};
pub use envelope::{EnvelopeCase, EnvelopeOutcome, EnvelopeStudy};
pub use trace::TraceWriter;
