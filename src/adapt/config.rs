//! Configuration options for the adaptation procedure.
//!
//! This module provides the configuration struct that controls how the
//! adaptation graph is traversed, and the statistics reported afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which changed children are re-expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplorationMode {
    /// Expand a variant only from the node that discovered it.
    #[default]
    Reduced,
    /// Expand every changed child, even when its variant is already known.
    Exhaustive,
}

impl fmt::Display for ExplorationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplorationMode::Reduced => write!(f, "reduced"),
            ExplorationMode::Exhaustive => write!(f, "exhaustive"),
        }
    }
}

/// Configuration for the adaptation procedure.
///
/// # Example
/// ```
/// use adaptation_graph::adapt::{AdaptConfig, ExplorationMode};
///
/// let config = AdaptConfig::default();
/// assert_eq!(config.mode, ExplorationMode::Reduced);
/// assert!(config.preprocess_root);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptConfig {
    /// Exploration policy for children whose variant is already known.
    pub mode: ExplorationMode,

    /// Number of worker threads.
    ///
    /// Set to `None` to use the available hardware parallelism.
    pub num_threads: Option<usize>,

    /// Probe every profile of the root game before the traversal starts.
    ///
    /// Profiles whose correction changes nothing are treated as already
    /// applied and form the root's path.
    pub preprocess_root: bool,

    /// Stop on the first solver anomaly.
    ///
    /// Warnings about the solvers' output become malformed-output errors
    /// and the first malformed output cancels the whole traversal.
    pub strict: bool,

    /// How often the progress callback runs, in milliseconds.
    pub progress_interval_ms: u64,
}

impl Default for AdaptConfig {
    fn default() -> Self {
        Self {
            mode: ExplorationMode::Reduced,
            num_threads: None,
            preprocess_root: true,
            strict: false,
            progress_interval_ms: 100,
        }
    }
}

impl AdaptConfig {
    /// Create a new AdaptConfig with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that expands each variant once.
    pub fn reduced() -> Self {
        Self::default()
    }

    /// Configuration that re-expands every path (naive baseline).
    pub fn exhaustive() -> Self {
        Self {
            mode: ExplorationMode::Exhaustive,
            ..Default::default()
        }
    }

    /// Builder method: set the exploration mode.
    pub fn with_mode(mut self, mode: ExplorationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder method: set number of threads.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Builder method: set whether to preprocess the root.
    pub fn with_preprocess_root(mut self, enable: bool) -> Self {
        self.preprocess_root = enable;
        self
    }

    /// Builder method: set strict mode.
    pub fn with_strict(mut self, enable: bool) -> Self {
        self.strict = enable;
        self
    }

    /// Builder method: set the progress interval in milliseconds.
    pub fn with_progress_interval(mut self, millis: u64) -> Self {
        self.progress_interval_ms = millis;
        self
    }

    /// Number of workers this configuration asks for.
    pub fn resolved_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(available_parallelism)
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_threads == Some(0) {
            return Err(ConfigError::ZeroThreads);
        }
        if self.progress_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }
}

/// Hardware parallelism, falling back to a single thread.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Errors that can occur when validating the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// At least one worker is required.
    #[error("number of threads must be at least 1")]
    ZeroThreads,
    /// The progress callback needs a positive period.
    #[error("progress interval must be positive")]
    ZeroInterval,
}

/// Statistics of a finished traversal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraversalStats {
    /// Nodes created, leaves included.
    pub nodes: usize,

    /// Unique game variants computed.
    pub variants: usize,

    /// Loop-back nodes.
    pub leaves: usize,

    /// Unique stable variants.
    pub terminal_variants: usize,

    /// Stable misinformed equilibria found.
    pub smes: usize,

    /// Number of strategy profiles of the game.
    pub profiles: usize,

    /// Worker threads used.
    pub threads: usize,

    /// Exploration mode used.
    pub mode: ExplorationMode,

    /// Wall-clock duration of the traversal, root bootstrap excluded (in seconds).
    pub elapsed_seconds: f64,

    /// Nodes expanded per second.
    pub nodes_per_second: f64,

    /// Whether the traversal was shut down before completion.
    pub cancelled: bool,
}

impl TraversalStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Update nodes per second based on elapsed time.
    pub fn update_rate(&mut self) {
        if self.elapsed_seconds > 0.0 {
            self.nodes_per_second = self.nodes as f64 / self.elapsed_seconds;
        }
    }
}

impl fmt::Display for TraversalStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "| Number of profiles:          {}", self.profiles)?;
        writeln!(f, "| Number of nodes:             {}", self.nodes)?;
        writeln!(f, "| Number of unique variants:   {}", self.variants)?;
        writeln!(f, "| Number of leaves:            {}", self.leaves)?;
        writeln!(f, "| Number of stable variants:   {}", self.terminal_variants)?;
        writeln!(f, "| Number of SMEs:              {}", self.smes)?;
        writeln!(f, "| Threads / mode:              {} / {}", self.threads, self.mode)?;
        write!(f, "| Elapsed time:                {:.3}s", self.elapsed_seconds)?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}
