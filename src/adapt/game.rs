//! Collaborator interfaces for the adaptation procedure.
//!
//! The traversal engine never computes equilibria or applies corrections itself.
//! It talks to two solvers through the traits defined here, and it identifies
//! game variants only through the moves that produced them.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of decimal digits kept for equilibrium probabilities.
pub const DECIMALS: i32 = 8;

/// Trait for games that can be explored by the adaptation procedure.
///
/// A game is a fully specified variant: the real payoffs plus the payoffs
/// each party perceives. The engine only needs its shape.
pub trait Game: Clone + fmt::Debug + Send + Sync {
    /// Get the number of parties.
    fn num_players(&self) -> usize;

    /// Get the number of pure strategies of each party.
    fn strategies(&self) -> &[usize];

    /// Get the number of strategy profiles (positions) of the game.
    fn num_profiles(&self) -> usize {
        self.strategies().iter().product()
    }
}

/// A position in strategy space: one pure strategy index per party.
///
/// Moves are the unit of correction. Indices are 0-based internally and
/// displayed 1-based.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Move(Vec<usize>);

impl Move {
    /// Create a move from per-party strategy indices.
    pub fn new(strategies: Vec<usize>) -> Self {
        Self(strategies)
    }

    /// Strategy index chosen by each party.
    pub fn strategies(&self) -> &[usize] {
        &self.0
    }

    /// Number of parties this move addresses.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the degenerate zero-party move.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Enumerate every strategy profile in lexicographic order.
    pub fn profiles(strategies: &[usize]) -> Vec<Move> {
        let choices: Vec<Vec<usize>> = strategies.iter().map(|&n| (0..n).collect()).collect();
        cartesian(&choices).into_iter().map(Move).collect()
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|s| (s + 1).to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Cartesian product of per-party choices, lexicographic, last party fastest.
fn cartesian(choices: &[Vec<usize>]) -> Vec<Vec<usize>> {
    if choices.iter().any(|c| c.is_empty()) {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut cursor = vec![0usize; choices.len()];
    loop {
        result.push(cursor.iter().zip(choices).map(|(&i, c)| c[i]).collect());

        // odometer increment
        let mut party = choices.len();
        loop {
            if party == 0 {
                return result;
            }
            party -= 1;
            cursor[party] += 1;
            if cursor[party] < choices[party].len() {
                break;
            }
            cursor[party] = 0;
        }
    }
}

/// A mixed strategy of a single party.
///
/// Probabilities are rounded to [`DECIMALS`] digits on construction so that
/// equal solver outputs compare, order and hash equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<f64>")]
pub struct MixedStrategy(Vec<f64>);

impl MixedStrategy {
    /// Create a mixed strategy, rounding every probability.
    pub fn new(probabilities: Vec<f64>) -> Self {
        let scale = 10f64.powi(DECIMALS);
        Self(
            probabilities
                .into_iter()
                // + 0.0 folds -0.0 into 0.0 so bit-level equality holds
                .map(|p| (p * scale).round() / scale + 0.0)
                .collect(),
        )
    }

    /// Create the pure strategy playing `strategy` out of `num_strategies`.
    pub fn pure(strategy: usize, num_strategies: usize) -> Self {
        let mut probabilities = vec![0.0; num_strategies];
        if let Some(p) = probabilities.get_mut(strategy) {
            *p = 1.0;
        }
        Self(probabilities)
    }

    /// Probabilities per pure strategy.
    pub fn probabilities(&self) -> &[f64] {
        &self.0
    }

    /// Indices played with positive probability.
    pub fn support(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p > 0.0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Sum of all probabilities.
    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }
}

impl From<Vec<f64>> for MixedStrategy {
    fn from(probabilities: Vec<f64>) -> Self {
        Self::new(probabilities)
    }
}

impl PartialEq for MixedStrategy {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for MixedStrategy {}

impl Hash for MixedStrategy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for p in &self.0 {
            p.to_bits().hash(state);
        }
    }
}

impl PartialOrd for MixedStrategy {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MixedStrategy {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.total_cmp(b) {
                std::cmp::Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl fmt::Display for MixedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| format!("{}", p)).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// An equilibrium: one mixed strategy per party.
///
/// Equilibria, not nodes, are the unit of stability, so they are stored in
/// ordered sets and must compare by value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Equilibrium(Vec<MixedStrategy>);

impl Equilibrium {
    /// Create an equilibrium from per-party strategies.
    pub fn new(strategies: Vec<MixedStrategy>) -> Self {
        Self(strategies)
    }

    /// Per-party mixed strategies.
    pub fn strategies(&self) -> &[MixedStrategy] {
        &self.0
    }

    /// Number of parties.
    pub fn num_players(&self) -> usize {
        self.0.len()
    }

    /// Strategies `party` plays with positive probability.
    pub fn support(&self, party: usize) -> Vec<usize> {
        self.0.get(party).map(MixedStrategy::support).unwrap_or_default()
    }

    /// Candidate moves derived from this equilibrium's support.
    ///
    /// Every combination of one supported strategy per party is a move,
    /// in lexicographic order.
    pub fn moves(&self) -> Vec<Move> {
        let supports: Vec<Vec<usize>> = self.0.iter().map(MixedStrategy::support).collect();
        cartesian(&supports).into_iter().map(Move).collect()
    }
}

impl fmt::Display for Equilibrium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// How much of the real game the parties perceive correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Knowledge {
    /// Correctly perceived entries.
    pub known: u64,
    /// All entries.
    pub total: u64,
}

impl Knowledge {
    /// Create a knowledge measure.
    pub fn new(known: u64, total: u64) -> Self {
        Self { known, total }
    }

    /// Knowledge as a percentage, rounded to two decimals.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.known as f64 / self.total as f64 * 10_000.0).round() / 100.0
    }
}

/// Result of one adaptation step.
#[derive(Debug, Clone)]
pub enum StepOutcome<G> {
    /// Applying the move would not change any perceived payoff.
    Unchanged {
        /// Knowledge of the game the step was applied to.
        knowledge: Knowledge,
    },
    /// The move produced a new variant.
    Changed {
        /// The new, fully specified game.
        game: G,
        /// Knowledge of the new game.
        knowledge: Knowledge,
    },
}

impl<G> StepOutcome<G> {
    /// Knowledge reported with the outcome.
    pub fn knowledge(&self) -> Knowledge {
        match self {
            StepOutcome::Unchanged { knowledge } | StepOutcome::Changed { knowledge, .. } => {
                *knowledge
            }
        }
    }

    /// True when the step left the game as it was.
    pub fn is_unchanged(&self) -> bool {
        matches!(self, StepOutcome::Unchanged { .. })
    }
}

/// Errors reported by the external solvers.
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// The solver did not answer within its time budget.
    #[error("solver timed out after {0:?}")]
    Timeout(Duration),

    /// The solver finished without a usable result.
    #[error("solver returned no result: {0}")]
    NoResult(String),

    /// The solver output could not be interpreted.
    #[error("malformed solver output: {0}")]
    Malformed(String),
}

impl SolverError {
    /// Malformed output aborts the whole node expansion; everything else
    /// only drops the branch that triggered it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SolverError::Malformed(_))
    }
}

/// Computes the candidate equilibria of a game variant.
///
/// Must be callable concurrently on different games. An empty vector means
/// no equilibria were found.
pub trait EquilibriumSolver<G>: Send + Sync {
    /// Compute the candidate equilibria of `game`.
    fn equilibria(&self, game: &G) -> Result<Vec<Equilibrium>, SolverError>;

    /// Human-readable solver name.
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Applies a correction to a game variant.
///
/// Called with `None` to obtain the knowledge of the game itself, and with a
/// move to obtain the variant that move produces.
pub trait AdaptationSolver<G>: Send + Sync {
    /// Apply `mv` (or nothing) to `game`.
    fn step(&self, game: &G, mv: Option<&Move>) -> Result<StepOutcome<G>, SolverError>;
}
