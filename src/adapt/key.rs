//! Canonical identity of a path of moves.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::adapt::game::Move;

/// Order-independent, duplicate-free identity of a path of moves.
///
/// Two paths that apply the same set of moves, in any order and with any
/// repetition, lead to the same game variant and share one key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanonicalKey(Vec<Move>);

impl CanonicalKey {
    /// Canonicalize a path: sort and drop duplicates.
    pub fn from_path(path: &[Move]) -> Self {
        let mut moves = path.to_vec();
        moves.sort_unstable();
        moves.dedup();
        Self(moves)
    }

    /// The key as a path, in canonical order.
    pub fn moves(&self) -> &[Move] {
        &self.0
    }

    /// Whether `mv` has already been applied.
    pub fn contains(&self, mv: &Move) -> bool {
        self.0.binary_search(mv).is_ok()
    }

    /// Key of this path extended by `mv`.
    pub fn with(&self, mv: &Move) -> Self {
        match self.0.binary_search(mv) {
            Ok(_) => self.clone(),
            Err(pos) => {
                let mut moves = self.0.clone();
                moves.insert(pos, mv.clone());
                Self(moves)
            }
        }
    }

    /// Number of distinct moves.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the key of the empty path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|m| m.to_string()).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(a: usize, b: usize) -> Move {
        Move::new(vec![a, b])
    }

    #[test]
    fn test_empty_path_is_empty_key() {
        let key = CanonicalKey::from_path(&[]);
        assert!(key.is_empty());
        assert_eq!(key, CanonicalKey::default());
    }

    #[test]
    fn test_key_ignores_order() {
        let a = CanonicalKey::from_path(&[mv(1, 0), mv(0, 1), mv(1, 1)]);
        let b = CanonicalKey::from_path(&[mv(1, 1), mv(1, 0), mv(0, 1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_reapplied_move_does_not_change_key() {
        let path = vec![mv(0, 1), mv(1, 0)];
        let key = CanonicalKey::from_path(&path);

        let mut extended = path.clone();
        extended.push(mv(0, 1));
        assert_eq!(CanonicalKey::from_path(&extended), key);
        assert_eq!(key.with(&mv(1, 0)), key);
    }

    #[test]
    fn test_canonicalization_is_idempotent() {
        let key = CanonicalKey::from_path(&[mv(1, 1), mv(0, 0), mv(1, 1), mv(0, 1)]);
        assert_eq!(CanonicalKey::from_path(key.moves()), key);
        assert_eq!(key.len(), 3);
    }

    #[test]
    fn test_with_matches_from_path() {
        let path = vec![mv(1, 1), mv(0, 0)];
        let key = CanonicalKey::from_path(&path);

        let mut extended = path.clone();
        extended.push(mv(0, 1));
        assert_eq!(key.with(&mv(0, 1)), CanonicalKey::from_path(&extended));
        assert!(key.with(&mv(0, 1)).contains(&mv(0, 1)));
        assert!(!key.contains(&mv(0, 1)));
    }

    #[test]
    fn test_display() {
        let key = CanonicalKey::from_path(&[mv(1, 0), mv(0, 0)]);
        assert_eq!(key.to_string(), "{(1, 1), (2, 1)}");
    }
}
