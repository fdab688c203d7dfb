//! Misinformation games and in-process solvers.
//!
//! This module contains a concrete game model and two built-in solvers that
//! plug into the adaptation engine. These serve as:
//!
//! 1. **Validation**: Small games with known equilibria check that the
//!    traversal classifies leaves and SMEs correctly.
//!
//! 2. **Examples**: Demonstrate how to implement `Game`, `EquilibriumSolver`
//!    and `AdaptationSolver` for a real game representation.
//!
//! 3. **Benchmarks**: Random games of any size for performance testing.
//!
//! ## Available Components
//!
//! - [`model`]: Payoff tables and misinformation games
//! - [`equilibria`]: Pure Nash enumeration and natural misinformed equilibria
//! - [`revelation`]: The truth-revealing adaptation step

pub mod equilibria;
pub mod model;
pub mod revelation;

pub use equilibria::{MisinformedEquilibria, NashSolver, PureNash};
pub use model::{GameError, MisinformationGame, PayoffTable};
pub use revelation::TruthRevelation;
