//! Solver call accounting and output anomaly checks.
//!
//! Counters are plain atomics so every worker can record into the same
//! [`Diagnostics`] without locking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapt::game::{Equilibrium, SolverError};

/// Probabilities of a mixed strategy may fall this far below one before the
/// strategy is reported.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Shared diagnostic counters of one traversal.
#[derive(Debug, Default)]
pub struct Diagnostics {
    equilibrium_calls: AtomicU64,
    equilibrium_nanos: AtomicU64,
    adaptation_calls: AtomicU64,
    adaptation_nanos: AtomicU64,
    solver_failures: AtomicU64,
    malformed_outputs: AtomicU64,
    aborted_expansions: AtomicU64,
    no_equilibria: AtomicU64,
    zeros_mixed_strategy: AtomicU64,
    mixed_strategy_below_one: AtomicU64,
    too_many_threads: AtomicBool,
}

impl Diagnostics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one equilibrium solver call.
    pub fn equilibrium_call(&self, elapsed: Duration) {
        self.equilibrium_calls.fetch_add(1, Ordering::Relaxed);
        self.equilibrium_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record one adaptation solver call.
    pub fn adaptation_call(&self, elapsed: Duration) {
        self.adaptation_calls.fetch_add(1, Ordering::Relaxed);
        self.adaptation_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record a solver error, by kind.
    pub fn solver_error(&self, error: &SolverError) {
        if error.is_fatal() {
            self.malformed_outputs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.solver_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an expansion abandoned halfway.
    pub fn aborted_expansion(&self) {
        self.aborted_expansions.fetch_add(1, Ordering::Relaxed);
    }

    /// Flag that more workers than hardware threads were requested.
    pub fn too_many_threads(&self) {
        self.too_many_threads.store(true, Ordering::Relaxed);
    }

    /// Inspect the output of the equilibrium solver.
    ///
    /// An empty list is a missing result. Wrong arity is malformed. An
    /// all-zero mixed strategy and a strategy summing below one are counted
    /// and logged. In strict mode every anomaly is malformed.
    pub fn check_equilibria(
        &self,
        strategies: &[usize],
        equilibria: &[Equilibrium],
        strict: bool,
    ) -> Result<(), SolverError> {
        let checked = self.inspect(strategies, equilibria, strict);
        if let Err(error) = &checked {
            if error.is_fatal() {
                self.malformed_outputs.fetch_add(1, Ordering::Relaxed);
            }
        }
        checked
    }

    fn inspect(
        &self,
        strategies: &[usize],
        equilibria: &[Equilibrium],
        strict: bool,
    ) -> Result<(), SolverError> {
        if equilibria.is_empty() {
            self.no_equilibria.fetch_add(1, Ordering::Relaxed);
            let message = "equilibrium solver returned no equilibria".to_string();
            return Err(if strict {
                SolverError::Malformed(message)
            } else {
                SolverError::NoResult(message)
            });
        }

        for equilibrium in equilibria {
            if equilibrium.num_players() != strategies.len() {
                return Err(SolverError::Malformed(format!(
                    "equilibrium {} has {} parties, expected {}",
                    equilibrium,
                    equilibrium.num_players(),
                    strategies.len()
                )));
            }

            for (party, (strategy, &n)) in equilibrium.strategies().iter().zip(strategies).enumerate() {
                if strategy.probabilities().len() != n {
                    return Err(SolverError::Malformed(format!(
                        "party {} of {} has {} probabilities, expected {}",
                        party + 1,
                        equilibrium,
                        strategy.probabilities().len(),
                        n
                    )));
                }

                if strategy.support().is_empty() {
                    self.zeros_mixed_strategy.fetch_add(1, Ordering::Relaxed);
                    self.warn(strict, format!("{} has a zeros mixed strategy", equilibrium))?;
                } else if strategy.total() < 1.0 - PROBABILITY_TOLERANCE {
                    self.mixed_strategy_below_one.fetch_add(1, Ordering::Relaxed);
                    self.warn(
                        strict,
                        format!("mixed strategy {} of {} sums below one", strategy, equilibrium),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn warn(&self, strict: bool, message: String) -> Result<(), SolverError> {
        if strict {
            return Err(SolverError::Malformed(message));
        }
        log::warn!("{}", message);
        Ok(())
    }

    /// Number of malformed outputs so far.
    pub fn malformed_outputs(&self) -> u64 {
        self.malformed_outputs.load(Ordering::Relaxed)
    }

    /// Copy the counters into a serializable report.
    pub fn snapshot(&self) -> DiagnosticsReport {
        let equilibrium_calls = self.equilibrium_calls.load(Ordering::Relaxed);
        let adaptation_calls = self.adaptation_calls.load(Ordering::Relaxed);
        let equilibrium_seconds = self.equilibrium_nanos.load(Ordering::Relaxed) as f64 / 1e9;
        let adaptation_seconds = self.adaptation_nanos.load(Ordering::Relaxed) as f64 / 1e9;

        DiagnosticsReport {
            equilibrium_calls,
            equilibrium_seconds,
            average_equilibrium_seconds: average(equilibrium_seconds, equilibrium_calls),
            adaptation_calls,
            adaptation_seconds,
            average_adaptation_seconds: average(adaptation_seconds, adaptation_calls),
            solver_failures: self.solver_failures.load(Ordering::Relaxed),
            malformed_outputs: self.malformed_outputs.load(Ordering::Relaxed),
            aborted_expansions: self.aborted_expansions.load(Ordering::Relaxed),
            no_equilibria: self.no_equilibria.load(Ordering::Relaxed),
            zeros_mixed_strategy: self.zeros_mixed_strategy.load(Ordering::Relaxed),
            mixed_strategy_below_one: self.mixed_strategy_below_one.load(Ordering::Relaxed),
            too_many_threads: self.too_many_threads.load(Ordering::Relaxed),
        }
    }
}

fn average(total: f64, calls: u64) -> f64 {
    if calls == 0 {
        0.0
    } else {
        total / calls as f64
    }
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    /// Equilibrium solver calls.
    pub equilibrium_calls: u64,
    /// Total time spent in the equilibrium solver (in seconds).
    pub equilibrium_seconds: f64,
    /// Mean equilibrium solver call time (in seconds).
    pub average_equilibrium_seconds: f64,
    /// Adaptation solver calls.
    pub adaptation_calls: u64,
    /// Total time spent in the adaptation solver (in seconds).
    pub adaptation_seconds: f64,
    /// Mean adaptation solver call time (in seconds).
    pub average_adaptation_seconds: f64,
    /// Timeouts and missing results.
    pub solver_failures: u64,
    /// Outputs that could not be interpreted.
    pub malformed_outputs: u64,
    /// Node expansions abandoned on a malformed output.
    pub aborted_expansions: u64,
    /// Variants for which no equilibria were returned.
    pub no_equilibria: u64,
    /// Mixed strategies with all-zero probabilities.
    pub zeros_mixed_strategy: u64,
    /// Mixed strategies whose probabilities sum below one.
    pub mixed_strategy_below_one: u64,
    /// More workers than hardware threads were requested.
    pub too_many_threads: bool,
}

impl DiagnosticsReport {
    /// True when nothing went wrong and no advisory was raised.
    pub fn is_clean(&self) -> bool {
        !self.too_many_threads
            && self.solver_failures == 0
            && self.malformed_outputs == 0
            && self.aborted_expansions == 0
            && self.no_equilibria == 0
            && self.zeros_mixed_strategy == 0
            && self.mixed_strategy_below_one == 0
    }
}
