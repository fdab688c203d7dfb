//! In-process equilibrium solvers.
//!
//! [`MisinformedEquilibria`] combines the equilibria of each party's
//! perceived game into the natural misinformed equilibria of a
//! [`MisinformationGame`]: every party plays its part of an equilibrium of
//! the game it believes in.

use crate::adapt::game::{Equilibrium, EquilibriumSolver, MixedStrategy, Move, SolverError};
use crate::games::model::{MisinformationGame, PayoffTable};

/// Solves a single normal-form game.
pub trait NashSolver: Send + Sync {
    /// Equilibria of `table`; empty when none were found.
    fn solve(&self, table: &PayoffTable) -> Vec<Equilibrium>;
}

/// Enumerates the pure-strategy Nash equilibria.
///
/// A profile is an equilibrium when no party gains by deviating alone.
/// Games without a pure equilibrium yield an empty list.
#[derive(Debug, Clone, Copy, Default)]
pub struct PureNash;

impl NashSolver for PureNash {
    fn solve(&self, table: &PayoffTable) -> Vec<Equilibrium> {
        let strategies = table.strategies();
        Move::profiles(strategies)
            .into_iter()
            .enumerate()
            .filter(|(index, profile)| {
                (0..table.num_players()).all(|party| {
                    let current = table.payoffs(*index)[party];
                    let mut deviation = profile.strategies().to_vec();
                    (0..strategies[party]).all(|alternative| {
                        deviation[party] = alternative;
                        table.utility(&deviation, party).map_or(true, |u| u <= current)
                    })
                })
            })
            .map(|(_, profile)| {
                Equilibrium::new(
                    profile
                        .strategies()
                        .iter()
                        .zip(strategies)
                        .map(|(&s, &n)| MixedStrategy::pure(s, n))
                        .collect(),
                )
            })
            .collect()
    }
}

/// Natural misinformed equilibria of a misinformation game.
///
/// For each party `p`, the components of `p` in the equilibria of the game
/// `p` perceives; the result is every combination of one component per
/// party. Empty when some party's perceived game has no equilibrium.
#[derive(Debug, Clone, Default)]
pub struct MisinformedEquilibria<S> {
    solver: S,
}

impl<S: NashSolver> MisinformedEquilibria<S> {
    /// Wrap a single-game solver.
    pub fn new(solver: S) -> Self {
        Self { solver }
    }
}

impl<S: NashSolver> EquilibriumSolver<MisinformationGame> for MisinformedEquilibria<S> {
    fn equilibria(&self, game: &MisinformationGame) -> Result<Vec<Equilibrium>, SolverError> {
        let players = game.real().num_players();
        let mut components: Vec<Vec<MixedStrategy>> = Vec::with_capacity(players);
        for party in 0..players {
            let mut own: Vec<MixedStrategy> = Vec::new();
            for eq in self.solver.solve(game.perceived(party)) {
                if let Some(strategy) = eq.strategies().get(party) {
                    if !own.contains(strategy) {
                        own.push(strategy.clone());
                    }
                }
            }
            if own.is_empty() {
                return Ok(Vec::new());
            }
            components.push(own);
        }

        let mut profiles: Vec<Vec<MixedStrategy>> = vec![Vec::new()];
        for own in &components {
            profiles = profiles
                .into_iter()
                .flat_map(|prefix| {
                    own.iter().map(move |strategy| {
                        let mut next = prefix.clone();
                        next.push(strategy.clone());
                        next
                    })
                })
                .collect();
        }
        Ok(profiles.into_iter().map(Equilibrium::new).collect())
    }

    fn name(&self) -> String {
        "misinformed-equilibria".to_string()
    }
}
