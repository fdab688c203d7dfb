//! Stable misinformed equilibrium extraction.

use rustc_hash::FxHashSet;

use crate::adapt::game::{Equilibrium, Move};
use crate::adapt::pool::CandidateEquilibrium;

/// Equilibria whose every candidate move is a no-op at the expanded node.
///
/// Must be evaluated once all moves of the node are classified: an
/// equilibrium with several supported profiles only qualifies when all of
/// them loop back. An equilibrium without moves (an all-zero strategy)
/// qualifies vacuously; it is flagged as an anomaly upstream.
pub fn stable_equilibria(
    candidates: &[CandidateEquilibrium],
    noop_moves: &FxHashSet<Move>,
) -> Vec<Equilibrium> {
    candidates
        .iter()
        .filter(|candidate| candidate.moves.iter().all(|mv| noop_moves.contains(mv)))
        .map(|candidate| candidate.equilibrium.clone())
        .collect()
}
