//! # Adaptation Graph
//!
//! Explores the adaptation procedure of misinformation games and collects
//! their stable misinformed equilibria (SMEs).
//!
//! Starting from a game in which the parties may perceive wrong payoffs,
//! every equilibrium points at positions whose real payoffs are then
//! revealed. Each revelation yields a game variant; repeating the process
//! builds an adaptation tree whose loop-back leaves mark stable variants.
//!
//! ## Features
//!
//! - **Generic Engine**: Works with any game and any pair of solvers
//!   implementing the `Game`, `EquilibriumSolver` and `AdaptationSolver` traits
//! - **Parallel Traversal**: A pool of workers shares a variant pool in which
//!   each variant is computed exactly once
//! - **Two Modes**: Reduced exploration expands each variant once; exhaustive
//!   exploration expands every path
//! - **Diagnostics**: Solver timings and anomaly counters
//! - **Reports**: JSON reports, per-variant exports and tree rendering
//!
//! ## Quick Start
//!
//! ```ignore
//! use adaptation_graph::adapt::{AdaptConfig, AdaptationProcedure};
//!
//! // 1. Implement the Game trait and the two solver traits
//! // 2. Create a procedure
//! let mut procedure = AdaptationProcedure::new(equilibria, revelation, AdaptConfig::default());
//!
//! // 3. Explore
//! procedure.initialize_root(my_game)?;
//! let stats = procedure.run()?;
//!
//! // 4. Read the results
//! let smes = procedure.smes();
//! ```
//!
//! ## Modules
//!
//! - [`adapt`]: Core traversal engine
//! - [`games`]: Misinformation games and in-process solvers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Adaptation Procedure (Generic)                  │
//! │  - Work queue + workers    - Variant pool (claim / populate)    │
//! │  - Leaf and SME detection  - Diagnostics and reports            │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               │ implements Game / solver traits
//!                               ▼
//!         ┌─────────────────────┼─────────────────────┐
//!         │                     │                     │
//!         ▼                     ▼                     ▼
//!    ┌───────────┐       ┌─────────────┐       ┌────────────┐
//!    │  Payoff   │       │ Misinformed │       │   Truth    │
//!    │  Tables   │       │ Equilibria  │       │ Revelation │
//!    └───────────┘       └─────────────┘       └────────────┘
//! ```

#![warn(missing_docs)]

/// Adaptation graph traversal module.
///
/// This is the core module containing the generic traversal engine.
pub mod adapt;

/// Game implementations module.
///
/// Contains the misinformation game model and in-process solvers.
pub mod games;

// Re-export commonly used types at crate root for convenience
pub use adapt::{
    AdaptConfig, AdaptationProcedure, AdaptationSolver, CanonicalKey, Equilibrium, EquilibriumSolver,
    ExplorationMode, Game, Move, SolverError, TraversalError, TraversalStats,
};
