//! Normal-form payoff tables and misinformation games.

use std::fs;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapt::game::{Game, Knowledge, Move};

/// Errors raised while building or loading a game.
#[derive(Debug, Error)]
pub enum GameError {
    /// The payoff data does not match the declared shape.
    #[error("invalid game shape: {0}")]
    Shape(String),

    /// Random utilities need a non-negative upper bound.
    #[error("maximum utility must be non-negative, got {0}")]
    NegativeUtility(i64),

    /// The game file could not be read or written.
    #[error("game file error: {0}")]
    Io(#[from] std::io::Error),

    /// The game file is not valid JSON for a game.
    #[error("game file is not a valid game: {0}")]
    Json(#[from] serde_json::Error),
}

/// Payoffs of a normal-form game.
///
/// `utilities[profile][party]` where profiles are indexed row-major in the
/// order of [`Move::profiles`]: the last party's strategy varies fastest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoffTable {
    strategies: Vec<usize>,
    utilities: Vec<Vec<i64>>,
}

impl PayoffTable {
    /// Create a table, checking that every profile has one utility per party.
    pub fn new(strategies: Vec<usize>, utilities: Vec<Vec<i64>>) -> Result<Self, GameError> {
        let table = Self {
            strategies,
            utilities,
        };
        table.validate()?;
        Ok(table)
    }

    /// Table with every utility zero.
    pub fn zeros(strategies: Vec<usize>) -> Self {
        let profiles = strategies.iter().product();
        let players = strategies.len();
        Self {
            strategies,
            utilities: vec![vec![0; players]; profiles],
        }
    }

    /// Table with utilities drawn uniformly from `0..=max_utility`.
    pub fn random<R: Rng>(strategies: &[usize], max_utility: i64, rng: &mut R) -> Result<Self, GameError> {
        if max_utility < 0 {
            return Err(GameError::NegativeUtility(max_utility));
        }
        let mut table = Self::zeros(strategies.to_vec());
        table.validate()?;
        for payoffs in table.utilities.iter_mut() {
            for utility in payoffs.iter_mut() {
                *utility = rng.gen_range(0..=max_utility);
            }
        }
        Ok(table)
    }

    fn validate(&self) -> Result<(), GameError> {
        if self.strategies.is_empty() || self.strategies.contains(&0) {
            return Err(GameError::Shape(format!(
                "every party needs at least one strategy, got {:?}",
                self.strategies
            )));
        }
        let profiles: usize = self.strategies.iter().product();
        if self.utilities.len() != profiles {
            return Err(GameError::Shape(format!(
                "expected {} profiles, got {}",
                profiles,
                self.utilities.len()
            )));
        }
        if let Some(bad) = self.utilities.iter().position(|u| u.len() != self.strategies.len()) {
            return Err(GameError::Shape(format!(
                "profile {} has {} utilities, expected {}",
                bad,
                self.utilities[bad].len(),
                self.strategies.len()
            )));
        }
        Ok(())
    }

    /// Number of parties.
    pub fn num_players(&self) -> usize {
        self.strategies.len()
    }

    /// Number of pure strategies per party.
    pub fn strategies(&self) -> &[usize] {
        &self.strategies
    }

    /// Number of profiles.
    pub fn num_profiles(&self) -> usize {
        self.utilities.len()
    }

    /// Row-major index of a profile, `None` when out of range.
    pub fn profile_index(&self, profile: &[usize]) -> Option<usize> {
        if profile.len() != self.strategies.len() {
            return None;
        }
        let mut index = 0;
        for (&s, &n) in profile.iter().zip(&self.strategies) {
            if s >= n {
                return None;
            }
            index = index * n + s;
        }
        Some(index)
    }

    /// Utilities of every party at the profile with row-major `index`.
    pub fn payoffs(&self, index: usize) -> &[i64] {
        &self.utilities[index]
    }

    /// Utility of `party` at the profile.
    pub fn utility(&self, profile: &[usize], party: usize) -> Option<i64> {
        self.profile_index(profile)
            .and_then(|index| self.utilities[index].get(party).copied())
    }

    fn set_payoffs(&mut self, index: usize, payoffs: &[i64]) {
        self.utilities[index].copy_from_slice(payoffs);
    }
}

/// A misinformation game: the real game plus the game each party believes
/// it is playing.
///
/// `games[0]` is the real game and `games[p + 1]` is the game party `p`
/// perceives. All tables share one shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MisinformationGame {
    games: Vec<PayoffTable>,
}

impl MisinformationGame {
    /// Create a game from the real table followed by one perceived table per party.
    pub fn new(games: Vec<PayoffTable>) -> Result<Self, GameError> {
        let game = Self { games };
        game.validate()?;
        Ok(game)
    }

    /// Game whose real and perceived tables are all drawn independently.
    pub fn random<R: Rng>(strategies: &[usize], max_utility: i64, rng: &mut R) -> Result<Self, GameError> {
        let games = (0..=strategies.len())
            .map(|_| PayoffTable::random(strategies, max_utility, rng))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(games)
    }

    /// Load a game from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, GameError> {
        let text = fs::read_to_string(path)?;
        let game: Self = serde_json::from_str(&text)?;
        game.validate()?;
        Ok(game)
    }

    /// Save the game as pretty-printed JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), GameError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), GameError> {
        let real = self
            .games
            .first()
            .ok_or_else(|| GameError::Shape("a game needs a real payoff table".to_string()))?;
        real.validate()?;

        if self.games.len() != real.num_players() + 1 {
            return Err(GameError::Shape(format!(
                "{} parties need {} tables, got {}",
                real.num_players(),
                real.num_players() + 1,
                self.games.len()
            )));
        }
        for (party, perceived) in self.games[1..].iter().enumerate() {
            perceived.validate()?;
            if perceived.strategies() != real.strategies() {
                return Err(GameError::Shape(format!(
                    "party {} perceives strategies {:?}, the real game has {:?}",
                    party + 1,
                    perceived.strategies(),
                    real.strategies()
                )));
            }
        }
        Ok(())
    }

    /// The real game.
    pub fn real(&self) -> &PayoffTable {
        &self.games[0]
    }

    /// The game `party` perceives.
    pub fn perceived(&self, party: usize) -> &PayoffTable {
        &self.games[party + 1]
    }

    /// Entries (perceiver, profile, payee) every party perceives correctly,
    /// over all such entries.
    pub fn knowledge(&self) -> Knowledge {
        let real = self.real();
        let mut known = 0u64;
        let mut total = 0u64;
        for perceiver in 0..real.num_players() {
            let perceived = self.perceived(perceiver);
            for index in 0..real.num_profiles() {
                for (seen, actual) in perceived.payoffs(index).iter().zip(real.payoffs(index)) {
                    total += 1;
                    if seen == actual {
                        known += 1;
                    }
                }
            }
        }
        Knowledge::new(known, total)
    }

    /// Whether every party already perceives the real payoffs at `mv`.
    pub fn is_revealed(&self, mv: &Move) -> bool {
        match self.real().profile_index(mv.strategies()) {
            Some(index) => {
                let actual = self.real().payoffs(index);
                (0..self.num_players()).all(|party| self.perceived(party).payoffs(index) == actual)
            }
            None => false,
        }
    }

    /// Copy of this game in which every party perceives the real payoffs at
    /// `mv`. `None` when `mv` is not a profile of the game.
    pub fn reveal(&self, mv: &Move) -> Option<Self> {
        let index = self.real().profile_index(mv.strategies())?;
        let actual = self.real().payoffs(index).to_vec();
        let mut next = self.clone();
        for perceived in next.games[1..].iter_mut() {
            perceived.set_payoffs(index, &actual);
        }
        Some(next)
    }
}

impl Game for MisinformationGame {
    fn num_players(&self) -> usize {
        self.real().num_players()
    }

    fn strategies(&self) -> &[usize] {
        self.real().strategies()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn table(utilities: Vec<Vec<i64>>) -> PayoffTable {
        PayoffTable::new(vec![2, 2], utilities).unwrap()
    }

    fn matching_pennies() -> PayoffTable {
        table(vec![vec![1, -1], vec![-1, 1], vec![-1, 1], vec![1, -1]])
    }

    #[test]
    fn test_profile_index_is_row_major() {
        let t = PayoffTable::zeros(vec![2, 3]);
        assert_eq!(t.profile_index(&[0, 0]), Some(0));
        assert_eq!(t.profile_index(&[0, 2]), Some(2));
        assert_eq!(t.profile_index(&[1, 0]), Some(3));
        assert_eq!(t.profile_index(&[1, 3]), None);
        assert_eq!(t.profile_index(&[1]), None);

        for (i, profile) in Move::profiles(&[2, 3]).iter().enumerate() {
            assert_eq!(t.profile_index(profile.strategies()), Some(i));
        }
    }

    #[test]
    fn test_table_shape_is_checked() {
        assert!(PayoffTable::new(vec![2, 2], vec![vec![0, 0]; 3]).is_err());
        assert!(PayoffTable::new(vec![2, 2], vec![vec![0]; 4]).is_err());
        assert!(PayoffTable::new(vec![2, 0], vec![]).is_err());
    }

    #[test]
    fn test_game_needs_one_table_per_party() {
        let t = matching_pennies();
        assert!(MisinformationGame::new(vec![t.clone(), t.clone()]).is_err());
        assert!(MisinformationGame::new(vec![t.clone(), t.clone(), t.clone()]).is_ok());
        assert!(MisinformationGame::new(vec![t.clone(), t, PayoffTable::zeros(vec![2, 3])]).is_err());
    }

    #[test]
    fn test_knowledge_and_reveal() {
        let real = matching_pennies();
        let zeros = PayoffTable::zeros(vec![2, 2]);
        let game = MisinformationGame::new(vec![real.clone(), zeros.clone(), real.clone()]).unwrap();

        // party 1 knows everything, party 0 nothing
        assert_eq!(game.knowledge(), Knowledge::new(8, 16));

        let mv = Move::new(vec![0, 1]);
        assert!(!game.is_revealed(&mv));
        let next = game.reveal(&mv).unwrap();
        assert!(next.is_revealed(&mv));
        assert_eq!(next.perceived(0).utility(&[0, 1], 0), Some(-1));
        assert_eq!(next.knowledge(), Knowledge::new(10, 16));
        assert!(game.reveal(&Move::new(vec![2, 0])).is_none());
    }

    #[test]
    fn test_random_game_is_reproducible() {
        let a = MisinformationGame::random(&[2, 3], 9, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = MisinformationGame::random(&[2, 3], 9, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.num_profiles(), 6);
        assert!(MisinformationGame::new(vec![
            a.real().clone(),
            a.perceived(0).clone(),
            a.perceived(1).clone()
        ])
        .is_ok());
    }

    #[test]
    fn test_random_game_rejects_bad_input() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(matches!(
            PayoffTable::random(&[2, 2], -1, &mut rng),
            Err(GameError::NegativeUtility(-1))
        ));
        assert!(matches!(
            MisinformationGame::random(&[2, 2], -1, &mut rng),
            Err(GameError::NegativeUtility(-1))
        ));
        assert!(matches!(MisinformationGame::random(&[2, 0], 4, &mut rng), Err(GameError::Shape(_))));
        assert!(matches!(MisinformationGame::random(&[], 4, &mut rng), Err(GameError::Shape(_))));

        let constant = PayoffTable::random(&[2, 2], 0, &mut rng).unwrap();
        assert_eq!(constant, PayoffTable::zeros(vec![2, 2]));
    }

    #[test]
    fn test_json_file_round_trip() {
        let game = MisinformationGame::random(&[2, 2], 5, &mut StdRng::seed_from_u64(1)).unwrap();
        let path = std::env::temp_dir().join(format!("adaptation-graph-game-{}.json", std::process::id()));
        game.save_json(&path).unwrap();
        let loaded = MisinformationGame::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, game);
    }
}
