//! In-process adaptation step: the truth about a position is revealed.

use crate::adapt::game::{AdaptationSolver, Move, SolverError, StepOutcome};
use crate::games::model::MisinformationGame;

/// Applying a move reveals the real payoffs at that profile to every party.
///
/// The step is `Unchanged` when every party already perceived them. Without
/// a move it only reports the game's knowledge.
#[derive(Debug, Clone, Copy, Default)]
pub struct TruthRevelation;

impl AdaptationSolver<MisinformationGame> for TruthRevelation {
    fn step(
        &self,
        game: &MisinformationGame,
        mv: Option<&Move>,
    ) -> Result<StepOutcome<MisinformationGame>, SolverError> {
        let Some(mv) = mv else {
            return Ok(StepOutcome::Unchanged {
                knowledge: game.knowledge(),
            });
        };

        if game.is_revealed(mv) {
            return Ok(StepOutcome::Unchanged {
                knowledge: game.knowledge(),
            });
        }

        let next = game
            .reveal(mv)
            .ok_or_else(|| SolverError::Malformed(format!("move {} is not a profile of the game", mv)))?;
        Ok(StepOutcome::Changed {
            knowledge: next.knowledge(),
            game: next,
        })
    }
}
