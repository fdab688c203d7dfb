//! Adaptation graph traversal engine.
//!
//! This module explores every game variant reachable from an initial
//! misinformation game by repeatedly correcting the parties' perception at
//! the positions their equilibria point to.
//!
//! # Overview
//!
//! Each node of the adaptation tree resolves to a game variant identified by
//! the set of moves applied so far (its [`CanonicalKey`]). Expanding a node:
//!
//! 1. Collects the unique candidate moves of the variant's equilibria
//! 2. Turns each move already in the key into a loop-back leaf
//! 3. Claims or reuses the variant every other move leads to
//! 4. Records the equilibria whose moves all looped back as SMEs
//!
//! Variants are computed at most once, whatever the number of workers. In
//! [`ExplorationMode::Reduced`] only the node that discovered a variant goes on
//! to expand it.
//!
//! # Usage
//!
//! 1. Implement [`Game`], [`EquilibriumSolver`] and [`AdaptationSolver`]
//! 2. Create an [`AdaptationProcedure`] with the solvers and an [`AdaptConfig`]
//! 3. Call `initialize_root()` with the initial game, then `run()`
//! 4. Read the terminal set, the SMEs and the variant pool
//!
//! # Example
//!
//! ```
//! use adaptation_graph::adapt::{AdaptConfig, AdaptationProcedure};
//! use adaptation_graph::games::{MisinformationGame, MisinformedEquilibria, PayoffTable, PureNash, TruthRevelation};
//!
//! let real = PayoffTable::new(vec![2, 2], vec![vec![3, 3], vec![0, 5], vec![5, 0], vec![1, 1]]).unwrap();
//! let game = MisinformationGame::new(vec![real.clone(), real.clone(), real]).unwrap();
//!
//! let mut procedure = AdaptationProcedure::new(
//!     MisinformedEquilibria::new(PureNash),
//!     TruthRevelation,
//!     AdaptConfig::default().with_threads(2),
//! );
//! procedure.initialize_root(game).unwrap();
//! let stats = procedure.run().unwrap();
//! assert_eq!(stats.smes, 1);
//! ```

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod engine;
pub mod game;
pub mod key;
pub mod node;
pub mod pool;
pub mod queue;
pub mod report;
pub mod sme;

// Re-export main types for convenient access
pub use config::{AdaptConfig, ConfigError, ExplorationMode, TraversalStats};
pub use context::TraversalContext;
pub use diagnostics::{Diagnostics, DiagnosticsReport};
pub use engine::{AdaptationProcedure, Progress, TraversalError};
pub use game::{
    AdaptationSolver, Equilibrium, EquilibriumSolver, Game, Knowledge, MixedStrategy, Move, SolverError,
    StepOutcome,
};
pub use key::CanonicalKey;
pub use node::{AdaptationNode, NodeArena, NodeIndex, NodeLabel};
pub use pool::{CandidateEquilibrium, Claim, Reservation, SlotStatus, Variant, VariantId, VariantPool, VariantSlot};
pub use queue::{Completion, ShutdownHandle, TerminationBarrier, WorkQueue};
pub use report::{NodeRecord, TraversalReport, VariantRecord};
pub use sme::stable_equilibria;
