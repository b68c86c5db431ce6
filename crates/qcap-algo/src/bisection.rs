//! # Bisection Tuner
//!
//! Generic 1-D root-finder embedded in a power-flow feedback loop: halve a
//! bracket on one control variable, apply the midpoint through the oracle,
//! solve, measure, and decide which bound to replace.
//!
//! ## The loop
//!
//! ```text
//! for iteration 1..=max_iterations:
//!     mid   = (lo + hi) / 2
//!     apply(mid); solve()
//!     value = measure()            (0.0 sentinel if the trial diverged)
//!     error = value - target
//!     |error| < tolerance  ->  Converged, stop
//!     direction rule       ->  lo = mid   or   hi = mid
//! ```
//!
//! ## Monotonicity assumption
//!
//! The direction rule assumes the measured quantity is monotonically
//! increasing in the control variable (more dispatch ratio -> more MW at the
//! interface, higher schedule -> more Mvar export). That holds for the
//! radial plant layouts these studies target but is *not* guaranteed in
//! meshed or lightly-loaded networks; the tuner deliberately preserves the
//! assumption rather than attempting to detect non-monotonic response. This
//! is a documented limitation, not an oversight.
//!
//! ## Exhaustion semantics
//!
//! If the loop runs out of iterations the last applied midpoint stays
//! active in the engine (no rollback); the session reports `Exhausted` and
//! downstream stages proceed best-effort.

use crate::trace::TraceWriter;
use qcap_core::{PowerFlowOracle, QcapResult, StudyLog};
use serde::Serialize;

/// Convergence band on the measured quantity.
pub const DEFAULT_TOLERANCE: f64 = 5e-7;
pub const DEFAULT_MAX_ITERATIONS: u32 = 30;
/// Dispatch-ratio bracket, as a fraction of aggregate nameplate.
pub const DEFAULT_P_BRACKET: (f64, f64) = (-1.0, 1.5);
/// Voltage-schedule bracket in per-unit.
pub const DEFAULT_V_BRACKET: (f64, f64) = (0.9, 1.1);

/// Which bracket bound absorbs the midpoint, given the signed error.
///
/// Both rules assume a monotonically increasing response; they differ only
/// in which bound an exactly-on-target trial would replace, mirroring how
/// the P and Q loops were historically written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DirectionRule {
    /// `error < 0` raises the lower bound (P tuning).
    Direct,
    /// `error > 0` lowers the upper bound (Q-via-voltage tuning).
    Reversed,
}

impl DirectionRule {
    fn raise_lower_bound(&self, error: f64) -> bool {
        match self {
            DirectionRule::Direct => error < 0.0,
            DirectionRule::Reversed => error <= 0.0,
        }
    }
}

/// Tuning outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TuningStatus {
    Converged,
    Exhausted,
}

/// One recorded bisection step.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TuningStep {
    pub iteration: u32,
    pub control_value: f64,
    pub measured_value: f64,
    pub error: f64,
}

/// Full record of one bisection call. Created per call, discarded after;
/// its final state feeds the next stage.
#[derive(Debug, Clone, Serialize)]
pub struct TuningSession {
    pub target: f64,
    pub tolerance: f64,
    pub bracket_lo: f64,
    pub bracket_hi: f64,
    pub max_iterations: u32,
    pub history: Vec<TuningStep>,
    pub status: TuningStatus,
}

impl TuningSession {
    /// Control value left applied in the engine (last midpoint).
    pub fn final_control(&self) -> Option<f64> {
        self.history.last().map(|s| s.control_value)
    }

    pub fn final_error(&self) -> Option<f64> {
        self.history.last().map(|s| s.error)
    }

    pub fn converged(&self) -> bool {
        self.status == TuningStatus::Converged
    }

    pub fn iterations(&self) -> u32 {
        self.history.len() as u32
    }
}

/// Per-call numeric overrides, consumed from the request layer.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TuningOptions {
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for TuningOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// A configured bisection run over one control variable.
#[derive(Debug, Clone, Copy)]
pub struct Bisection {
    pub target: f64,
    pub bracket: (f64, f64),
    pub direction: DirectionRule,
    pub options: TuningOptions,
}

impl Bisection {
    pub fn new(target: f64, bracket: (f64, f64), direction: DirectionRule) -> Self {
        Self {
            target,
            bracket,
            direction,
            options: TuningOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TuningOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the loop. `apply` pushes a trial control value into the engine;
    /// `measure` reads the monitored quantity from the solved case. A trial
    /// that fails to converge contributes the 0.0 sentinel and the loop
    /// continues.
    pub fn run(
        &self,
        oracle: &mut dyn PowerFlowOracle,
        mut apply: impl FnMut(&mut dyn PowerFlowOracle, f64) -> QcapResult<()>,
        mut measure: impl FnMut(&mut dyn PowerFlowOracle) -> QcapResult<f64>,
        log: &mut StudyLog,
        mut trace: Option<&mut TraceWriter>,
    ) -> QcapResult<TuningSession> {
        let (mut lo, mut hi) = self.bracket;
        let mut session = TuningSession {
            target: self.target,
            tolerance: self.options.tolerance,
            bracket_lo: lo,
            bracket_hi: hi,
            max_iterations: self.options.max_iterations,
            history: Vec::new(),
            status: TuningStatus::Exhausted,
        };

        for iteration in 1..=self.options.max_iterations {
            let mid = (lo + hi) / 2.0;
            apply(oracle, mid)?;
            let solved = oracle.solve()?;
            let value = if solved {
                measure(oracle)?
            } else {
                log.warn(
                    "tuning",
                    format!("solve diverged at iteration {iteration}; using sentinel 0"),
                );
                0.0
            };
            let error = value - self.target;
            let step = TuningStep {
                iteration,
                control_value: mid,
                measured_value: value,
                error,
            };
            session.history.push(step);
            if let Some(writer) = trace.as_deref_mut() {
                writer.record(&step)?;
            }
            log.info(
                "tuning",
                format!("iter {iteration:02}: control={mid:.6} value={value:.4} err={error:+.4e}"),
            );

            if error.abs() < self.options.tolerance {
                session.status = TuningStatus::Converged;
                log.info(
                    "tuning",
                    format!("converged after {iteration} iterations: value={value:.4}"),
                );
                break;
            }
            if self.direction.raise_lower_bound(error) {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        if !session.converged() {
            log.warn(
                "tuning",
                format!(
                    "did not converge after {} iterations; last control value retained",
                    self.options.max_iterations
                ),
            );
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimOracle;

    /// Tuner against a synthetic monotonic response f(x) = a*x + b.
    fn run_linear(a: f64, b: f64, target: f64, bracket: (f64, f64)) -> TuningSession {
        let mut oracle = SimOracle::two_unit_plant();
        let applied = std::cell::Cell::new(0.0_f64);
        let mut log = StudyLog::new();
        Bisection::new(target, bracket, DirectionRule::Direct)
            .run(
                &mut oracle,
                |_, x| {
                    applied.set(x);
                    Ok(())
                },
                |_| Ok(a * applied.get() + b),
                &mut log,
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_converges_on_linear_response() {
        let session = run_linear(2.0, 1.0, 4.0, (0.0, 4.0));
        assert!(session.converged());
        let x = session.final_control().unwrap();
        assert!((2.0 * x + 1.0 - 4.0).abs() < DEFAULT_TOLERANCE);
    }

    #[test]
    fn test_iteration_bound_matches_bracket_width() {
        // |f(x)-target| < tol once the bracket is narrower than tol/a, i.e.
        // within ceil(log2(a*(hi-lo)/tol)) iterations.
        let a = 2.0;
        let (lo, hi) = (0.0, 4.0);
        let session = run_linear(a, 1.0, 4.0, (lo, hi));
        let needed = (a * (hi - lo) / DEFAULT_TOLERANCE).log2().ceil() as u32;
        assert!(session.iterations() <= needed);
    }

    #[test]
    fn test_bracket_invariant() {
        // Replay the recorded history: each step's control is the midpoint
        // of the current bracket, and exactly one bound moves to it.
        let session = run_linear(1.0, 0.0, 2.7, (0.0, 4.0));
        let (mut lo, mut hi) = (session.bracket_lo, session.bracket_hi);
        for step in &session.history {
            let mid = (lo + hi) / 2.0;
            assert!((step.control_value - mid).abs() < 1e-15);
            assert!(lo <= step.control_value && step.control_value <= hi);
            if step.error < 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
    }

    #[test]
    fn test_exhaustion_keeps_last_control() {
        // Target outside the reachable range never converges.
        let session = run_linear(1.0, 0.0, 100.0, (0.0, 4.0));
        assert!(!session.converged());
        assert_eq!(session.status, TuningStatus::Exhausted);
        assert_eq!(session.iterations(), DEFAULT_MAX_ITERATIONS);
        // Last applied control is still inside the original bracket.
        let last = session.final_control().unwrap();
        assert!(last >= 0.0 && last <= 4.0);
    }

    #[test]
    fn test_divergent_trials_use_sentinel_and_continue() {
        let mut oracle = SimOracle::two_unit_plant();
        oracle.diverge_on_solves(&[1]);
        let applied = std::cell::Cell::new(0.0_f64);
        let mut log = StudyLog::new();
        let session = Bisection::new(2.0, (0.0, 4.0), DirectionRule::Direct)
            .run(
                &mut oracle,
                |_, x| {
                    applied.set(x);
                    Ok(())
                },
                |_| Ok(applied.get()),
                &mut log,
                None,
            )
            .unwrap();
        // First trial measured the sentinel, loop kept going and still
        // converged.
        assert!((session.history[0].measured_value).abs() < 1e-15);
        assert!(session.converged());
        assert!(log.warning_count() >= 1);
    }
}
