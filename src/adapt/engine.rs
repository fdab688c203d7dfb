//! The adaptation procedure: concurrent traversal of the adaptation graph.
//!
//! A root node is built synchronously from the initial game. Worker threads
//! then pull nodes from a shared FIFO, expand them against the variant pool
//! and the two solvers, and push the children worth expanding, until the
//! outstanding-work counter drops back to zero.
//!
//! # Example
//!
//! ```ignore
//! use adaptation_graph::adapt::{AdaptConfig, AdaptationProcedure};
//!
//! let mut procedure = AdaptationProcedure::new(equilibrium_solver, adaptation_solver, AdaptConfig::default());
//! procedure.initialize_root(game)?;
//! let stats = procedure.run()?;
//! println!("{} stable variants, {} SMEs", stats.terminal_variants, stats.smes);
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapt::config::{available_parallelism, AdaptConfig, ConfigError, ExplorationMode, TraversalStats};
use crate::adapt::context::TraversalContext;
use crate::adapt::diagnostics::DiagnosticsReport;
use crate::adapt::game::{
    AdaptationSolver, Equilibrium, EquilibriumSolver, Game, Knowledge, Move, SolverError, StepOutcome,
};
use crate::adapt::key::CanonicalKey;
use crate::adapt::node::{AdaptationNode, NodeIndex};
use crate::adapt::pool::{Claim, Reservation, Variant, VariantId, VariantPool};
use crate::adapt::queue::{Completion, ShutdownHandle, WorkQueue};
use crate::adapt::report::{self, TraversalReport};
use crate::adapt::sme::stable_equilibria;

/// Errors that stop a traversal from starting or completing.
#[derive(Debug, Error)]
pub enum TraversalError {
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The root variant could not be built.
    #[error("failed to build the root variant: {0}")]
    Root(SolverError),

    /// `run` was called before `initialize_root`.
    #[error("the root has not been initialized")]
    RootNotInitialized,

    /// `initialize_root` was called twice.
    #[error("the root has already been initialized")]
    RootAlreadyInitialized,

    /// A procedure runs at most once.
    #[error("the traversal has already run")]
    AlreadyRun,

    /// The worker pool could not be created.
    #[error("failed to build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Strict mode stopped on a malformed solver output.
    #[error("stopped on malformed solver output: {0}")]
    Strict(SolverError),
}

/// Snapshot of a running traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Unique variants discovered so far.
    pub discovered: usize,
    /// `2^(number of profiles)`; `None` when it does not fit.
    pub upper_bound: Option<u128>,
    /// Nodes created so far.
    pub nodes: usize,
    /// Nodes waiting in the queue.
    pub pending: usize,
}

impl Progress {
    /// Discovered variants relative to the upper bound.
    pub fn fraction(&self) -> Option<f64> {
        self.upper_bound.map(|bound| self.discovered as f64 / bound as f64)
    }
}

/// Explores the adaptation graph of a game.
///
/// # Type Parameters
/// - `G`: The game type
/// - `E`: The equilibrium solver
/// - `A`: The adaptation-step solver
pub struct AdaptationProcedure<G: Game, E, A> {
    /// Computes the candidate equilibria of each variant.
    equilibrium_solver: E,

    /// Produces the variant a move leads to.
    adaptation_solver: A,

    /// Configuration for the traversal.
    config: AdaptConfig,

    /// Pool, nodes, result sets and counters.
    context: TraversalContext<G>,

    /// Pending nodes.
    queue: Arc<WorkQueue<Arc<AdaptationNode<G>>>>,

    /// Root index, once initialized.
    root: Option<NodeIndex>,

    /// Number of strategy profiles of the root game.
    profiles: usize,

    /// Set once `run` has started.
    ran: bool,

    /// First malformed output seen in strict mode.
    strict_failure: Mutex<Option<SolverError>>,

    /// Statistics of the finished run.
    stats: TraversalStats,
}

impl<G, E, A> AdaptationProcedure<G, E, A>
where
    G: Game + 'static,
    E: EquilibriumSolver<G>,
    A: AdaptationSolver<G>,
{
    /// Create a procedure for the given solvers.
    ///
    /// # Arguments
    /// * `equilibrium_solver` - Computes the candidate equilibria of a variant
    /// * `adaptation_solver` - Applies a move to a variant
    /// * `config` - Configuration options for the traversal
    pub fn new(equilibrium_solver: E, adaptation_solver: A, config: AdaptConfig) -> Self {
        Self {
            equilibrium_solver,
            adaptation_solver,
            config,
            context: TraversalContext::new(),
            queue: Arc::new(WorkQueue::new()),
            root: None,
            profiles: 0,
            ran: false,
            strict_failure: Mutex::new(None),
            stats: TraversalStats::new(),
        }
    }

    /// Build the root variant and node, and enqueue the root.
    ///
    /// The adaptation solver is called without a move to obtain the root's
    /// knowledge. With `preprocess_root`, every profile whose correction
    /// changes nothing becomes part of the root's path.
    pub fn initialize_root(&mut self, game: G) -> Result<Arc<AdaptationNode<G>>, TraversalError> {
        if self.root.is_some() {
            return Err(TraversalError::RootAlreadyInitialized);
        }

        let knowledge = self
            .timed_step(&game, None)
            .map_err(TraversalError::Root)?
            .knowledge();

        let path = if self.config.preprocess_root {
            self.preprocess(&game).map_err(TraversalError::Root)?
        } else {
            Vec::new()
        };

        let equilibria = self.solve_equilibria(&game).map_err(TraversalError::Root)?;

        let reservation = match self.context.pool().try_claim(CanonicalKey::from_path(&path)) {
            Claim::Claimed(reservation) => reservation,
            Claim::Present(_) => return Err(TraversalError::RootAlreadyInitialized),
        };
        self.profiles = game.num_profiles();
        let variant = Variant::new(
            reservation.id(),
            reservation.key().clone(),
            game,
            Some(knowledge),
            equilibria,
        );
        let variant = self.context.pool().populate(reservation, variant);
        let root = self
            .context
            .nodes()
            .insert_with(|index| AdaptationNode::root(index, path, variant));

        log::info!(
            "root variant ready: key {}, {} equilibria, knowledge {}%",
            root.key(),
            root.variant().num_equilibria(),
            knowledge.percentage()
        );

        self.queue.push(Arc::clone(&root));
        self.root = Some(root.index());
        Ok(root)
    }

    /// Corrections of the root game that change nothing.
    fn preprocess(&self, game: &G) -> Result<Vec<Move>, SolverError> {
        let mut known = Vec::new();
        for profile in Move::profiles(game.strategies()) {
            if self.timed_step(game, Some(&profile))?.is_unchanged() {
                known.push(profile);
            }
        }
        log::info!(
            "root preprocessing: {} of {} profiles already known",
            known.len(),
            game.num_profiles()
        );
        Ok(known)
    }

    /// Run the traversal to completion.
    pub fn run(&mut self) -> Result<&TraversalStats, TraversalError> {
        self.run_with_callback(|_| {})
    }

    /// Run the traversal, reporting progress from the calling thread.
    ///
    /// # Arguments
    /// * `callback` - Called every `progress_interval_ms` while workers run,
    ///   and once more when they are done
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> Result<&TraversalStats, TraversalError>
    where
        F: FnMut(&Progress),
    {
        self.config.validate()?;
        if self.root.is_none() {
            return Err(TraversalError::RootNotInitialized);
        }
        if self.ran {
            return Err(TraversalError::AlreadyRun);
        }
        self.ran = true;

        let threads = self.config.resolved_threads();
        let hardware = available_parallelism();
        if threads > hardware {
            log::warn!(
                "{} worker threads requested but only {} hardware threads are available",
                threads,
                hardware
            );
            self.context.diagnostics().too_many_threads();
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("adapt-worker-{}", i))
            .build()?;

        log::info!("starting traversal: {} workers, {} mode", threads, self.config.mode);
        let start_time = Instant::now();

        let completion = {
            let this = &*self;
            pool.in_place_scope(|scope| {
                for _ in 0..threads {
                    scope.spawn(move |_| this.work());
                }
                let completion = this.wait_with_progress(&mut callback);
                // releases the workers blocked on an empty queue
                this.queue.close();
                completion
            })
        };

        self.stats = TraversalStats {
            nodes: self.context.nodes().len(),
            variants: self.context.pool().num_ready(),
            leaves: self.context.num_leaves(),
            terminal_variants: self.context.terminal_set().len(),
            smes: self.context.smes().len(),
            profiles: self.profiles,
            threads,
            mode: self.config.mode,
            elapsed_seconds: start_time.elapsed().as_secs_f64(),
            nodes_per_second: 0.0,
            cancelled: completion == Completion::Cancelled,
        };
        self.stats.update_rate();
        callback(&self.progress());

        log::info!(
            "traversal {}: {} nodes, {} variants, {} stable, {} SMEs in {:.3}s",
            if self.stats.cancelled { "cancelled" } else { "finished" },
            self.stats.nodes,
            self.stats.variants,
            self.stats.terminal_variants,
            self.stats.smes,
            self.stats.elapsed_seconds
        );

        let failure = self
            .strict_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match failure {
            Some(error) => Err(TraversalError::Strict(error)),
            None => Ok(&self.stats),
        }
    }

    fn wait_with_progress<F>(&self, callback: &mut F) -> Completion
    where
        F: FnMut(&Progress),
    {
        let interval = Duration::from_millis(self.config.progress_interval_ms);
        loop {
            if let Some(completion) = self.queue.barrier().wait_timeout(interval) {
                return completion;
            }
            callback(&self.progress());
        }
    }

    /// Worker loop: expand nodes until the queue is closed.
    fn work(&self) {
        while let Some(node) = self.queue.pop() {
            let _done = self.queue.task_guard();
            if let Err(error) = self.expand(&node) {
                self.context.diagnostics().aborted_expansion();
                log::error!("expansion of node {} aborted: {}", node.label(), error);
                if self.config.strict {
                    let mut failure = self
                        .strict_failure
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    if failure.is_none() {
                        *failure = Some(error);
                    }
                    drop(failure);
                    self.queue.cancel();
                }
            }
        }
    }

    /// Expand one node: classify each unique candidate move, create the
    /// children, enqueue those worth expanding, and derive the SMEs.
    ///
    /// Only malformed solver output is returned as an error; it aborts the
    /// rest of the expansion. Other solver failures drop a single branch.
    fn expand(&self, parent: &AdaptationNode<G>) -> Result<(), SolverError> {
        let variant = parent.variant();
        log::debug!(
            "expanding node {} (variant {}, {} equilibria)",
            parent.label(),
            variant.id(),
            variant.num_equilibria()
        );

        let mut seen: FxHashSet<Move> = FxHashSet::default();
        let mut noop_moves: FxHashSet<Move> = FxHashSet::default();

        let moves = variant
            .candidates()
            .iter()
            .flat_map(|candidate| candidate.moves.iter());
        for mv in moves {
            if !seen.insert(mv.clone()) {
                continue;
            }
            let label = parent.label().child(seen.len());

            if parent.key().contains(mv) {
                let leaf = self
                    .context
                    .nodes()
                    .insert_with(|index| AdaptationNode::loop_back(index, label, parent, mv.clone()));
                self.context.record_leaf(&leaf);
                noop_moves.insert(mv.clone());
                continue;
            }

            let key = parent.key().with(mv);
            let (next, new_variant) = match self.context.pool().try_claim(key) {
                Claim::Present(slot) => match slot.wait() {
                    Some(next) => (next, false),
                    None => {
                        log::debug!("node {}: variant {} failed, dropping move {}", parent.label(), slot.id(), mv);
                        continue;
                    }
                },
                Claim::Claimed(reservation) => match self.build_variant(variant, mv, reservation) {
                    Ok(next) => (next, true),
                    Err(error) if error.is_fatal() => return Err(error),
                    Err(error) => {
                        log::debug!("node {}: dropping move {}: {}", parent.label(), mv, error);
                        continue;
                    }
                },
            };

            let child = self.context.nodes().insert_with(|index| {
                AdaptationNode::changed(index, label, parent, mv.clone(), next, new_variant)
            });

            if new_variant || self.config.mode == ExplorationMode::Exhaustive {
                if !self.queue.push(child) {
                    log::debug!("queue closed, node {} not expanded", parent.label());
                }
            }
        }

        self.context
            .insert_smes(stable_equilibria(variant.candidates(), &noop_moves));
        Ok(())
    }

    /// Compute the variant `mv` leads to and install it in the reserved slot.
    fn build_variant(
        &self,
        parent: &Variant<G>,
        mv: &Move,
        reservation: Reservation<G>,
    ) -> Result<Arc<Variant<G>>, SolverError> {
        match self.compute_variant(parent, mv) {
            Ok((game, knowledge, equilibria)) => {
                let variant = Variant::new(
                    reservation.id(),
                    reservation.key().clone(),
                    game,
                    Some(knowledge),
                    equilibria,
                );
                log::debug!("variant {} {} computed", variant.id(), variant.key());
                Ok(self.context.pool().populate(reservation, variant))
            }
            Err(error) => {
                reservation.abandon();
                Err(error)
            }
        }
    }

    fn compute_variant(
        &self,
        parent: &Variant<G>,
        mv: &Move,
    ) -> Result<(G, Knowledge, Vec<Equilibrium>), SolverError> {
        match self.timed_step(parent.game(), Some(mv))? {
            StepOutcome::Changed { game, knowledge } => {
                let equilibria = self.solve_equilibria(&game)?;
                Ok((game, knowledge, equilibria))
            }
            // same payoffs under a new key
            StepOutcome::Unchanged { knowledge } => {
                let equilibria = parent
                    .candidates()
                    .iter()
                    .map(|candidate| candidate.equilibrium.clone())
                    .collect();
                Ok((parent.game().clone(), knowledge, equilibria))
            }
        }
    }

    fn timed_step(&self, game: &G, mv: Option<&Move>) -> Result<StepOutcome<G>, SolverError> {
        let start = Instant::now();
        let outcome = self.adaptation_solver.step(game, mv);
        self.context.diagnostics().adaptation_call(start.elapsed());
        outcome.map_err(|error| {
            self.context.diagnostics().solver_error(&error);
            error
        })
    }

    fn solve_equilibria(&self, game: &G) -> Result<Vec<Equilibrium>, SolverError> {
        let start = Instant::now();
        let result = self.equilibrium_solver.equilibria(game);
        self.context.diagnostics().equilibrium_call(start.elapsed());
        let equilibria = result.map_err(|error| {
            self.context.diagnostics().solver_error(&error);
            error
        })?;
        self.context
            .diagnostics()
            .check_equilibria(game.strategies(), &equilibria, self.config.strict)?;
        Ok(equilibria)
    }

    /// Handle that cancels the traversal from any thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(Arc::clone(&self.queue))
    }

    /// Current progress.
    pub fn progress(&self) -> Progress {
        Progress {
            discovered: self.context.pool().discovered(),
            upper_bound: u32::try_from(self.profiles)
                .ok()
                .and_then(|profiles| 1u128.checked_shl(profiles)),
            nodes: self.context.nodes().len(),
            pending: self.queue.len(),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &AdaptConfig {
        &self.config
    }

    /// Get statistics of the last run.
    pub fn stats(&self) -> &TraversalStats {
        &self.stats
    }

    /// Shared traversal state.
    pub fn context(&self) -> &TraversalContext<G> {
        &self.context
    }

    /// The root node, once initialized.
    pub fn root(&self) -> Option<Arc<AdaptationNode<G>>> {
        self.root.and_then(|index| self.context.nodes().get(index))
    }

    /// Every node, in creation order.
    pub fn nodes(&self) -> Vec<Arc<AdaptationNode<G>>> {
        self.context.nodes().snapshot()
    }

    /// Every leaf node.
    pub fn leaves(&self) -> Vec<Arc<AdaptationNode<G>>> {
        self.context
            .leaves()
            .into_iter()
            .filter_map(|index| self.context.nodes().get(index))
            .collect()
    }

    /// Keys of the stable variants.
    pub fn terminal_set(&self) -> BTreeSet<CanonicalKey> {
        self.context.terminal_set()
    }

    /// Stable misinformed equilibria.
    pub fn smes(&self) -> BTreeSet<Equilibrium> {
        self.context.smes()
    }

    /// The variant pool, for export.
    pub fn pool(&self) -> &VariantPool<G> {
        self.context.pool()
    }

    /// Diagnostic counters.
    pub fn diagnostics(&self) -> DiagnosticsReport {
        self.context.diagnostics().snapshot()
    }

    /// Best knowledge percentage and the variant holding it.
    pub fn max_knowledge(&self) -> Option<(VariantId, f64)> {
        self.context.max_knowledge()
    }

    /// Text rendering of the adaptation tree.
    pub fn render_tree(&self) -> String {
        report::render_tree(self.context.nodes())
    }

    /// Serializable summary of the traversal.
    pub fn report(&self) -> TraversalReport {
        TraversalReport::new(&self.context, &self.stats)
    }
}

impl<G, E, A> AdaptationProcedure<G, E, A>
where
    G: Game + Serialize + 'static,
    E: EquilibriumSolver<G>,
    A: AdaptationSolver<G>,
{
    /// Write every computed variant to `dir`.
    pub fn export_variants(&self, dir: impl AsRef<Path>) -> std::io::Result<usize> {
        report::export_variants(self.context.pool(), dir)
    }

    /// Write every stable variant to `dir`.
    pub fn export_terminal_set(&self, dir: impl AsRef<Path>) -> std::io::Result<usize> {
        report::export_terminal_set(self.context.pool(), &self.context.terminal_set(), dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapt::game::MixedStrategy;
    use crate::games::{MisinformationGame, MisinformedEquilibria, PayoffTable, PureNash, TruthRevelation};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Game whose identity is the set of moves applied so far.
    #[derive(Debug, Clone)]
    struct Scripted {
        strategies: Vec<usize>,
        applied: BTreeSet<Move>,
    }

    impl Scripted {
        fn new(strategies: Vec<usize>) -> Self {
            Self {
                strategies,
                applied: BTreeSet::new(),
            }
        }
    }

    impl Game for Scripted {
        fn num_players(&self) -> usize {
            self.strategies.len()
        }

        fn strategies(&self) -> &[usize] {
            &self.strategies
        }
    }

    /// Returns a pure equilibrium on each listed profile; fails on `malformed`
    /// and finds nothing on `empty`.
    struct ScriptedEquilibria {
        profiles: Vec<Move>,
        malformed: Option<BTreeSet<Move>>,
        empty: Option<BTreeSet<Move>>,
        calls: AtomicUsize,
    }

    impl ScriptedEquilibria {
        fn new(profiles: Vec<Move>) -> Self {
            Self {
                profiles,
                malformed: None,
                empty: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EquilibriumSolver<Scripted> for ScriptedEquilibria {
        fn equilibria(&self, game: &Scripted) -> Result<Vec<Equilibrium>, SolverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.malformed.as_ref() == Some(&game.applied) {
                return Err(SolverError::Malformed("unparsable".into()));
            }
            if self.empty.as_ref() == Some(&game.applied) {
                return Ok(Vec::new());
            }
            Ok(self
                .profiles
                .iter()
                .map(|profile| {
                    Equilibrium::new(
                        profile
                            .strategies()
                            .iter()
                            .zip(&game.strategies)
                            .map(|(&s, &n)| MixedStrategy::pure(s, n))
                            .collect(),
                    )
                })
                .collect())
        }
    }

    type Predicate = Box<dyn Fn(&BTreeSet<Move>) -> bool + Send + Sync>;

    /// Applying a move adds it to the game's set. Times out when the
    /// resulting set matches `timeout`.
    #[derive(Default)]
    struct ScriptedStep {
        calls: AtomicUsize,
        timeout: Option<Predicate>,
    }

    impl ScriptedStep {
        fn timing_out(predicate: impl Fn(&BTreeSet<Move>) -> bool + Send + Sync + 'static) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                timeout: Some(Box::new(predicate)),
            }
        }
    }

    impl AdaptationSolver<Scripted> for ScriptedStep {
        fn step(&self, game: &Scripted, mv: Option<&Move>) -> Result<StepOutcome<Scripted>, SolverError> {
            let knowledge = |g: &Scripted| Knowledge::new(g.applied.len() as u64, g.num_profiles() as u64);
            let Some(mv) = mv else {
                return Ok(StepOutcome::Unchanged {
                    knowledge: knowledge(game),
                });
            };
            self.calls.fetch_add(1, Ordering::SeqCst);
            if game.applied.contains(mv) {
                return Ok(StepOutcome::Unchanged {
                    knowledge: knowledge(game),
                });
            }
            let mut next = game.clone();
            next.applied.insert(mv.clone());
            if self.timeout.as_ref().is_some_and(|timeout| timeout(&next.applied)) {
                return Err(SolverError::Timeout(Duration::from_secs(1)));
            }
            Ok(StepOutcome::Changed {
                knowledge: knowledge(&next),
                game: next,
            })
        }
    }

    fn mv(a: usize, b: usize) -> Move {
        Move::new(vec![a, b])
    }

    fn diagonal() -> Vec<Move> {
        vec![mv(0, 0), mv(1, 1)]
    }

    fn pure(a: usize, b: usize) -> Equilibrium {
        Equilibrium::new(vec![MixedStrategy::pure(a, 2), MixedStrategy::pure(b, 2)])
    }

    fn keys(sets: &[&[Move]]) -> BTreeSet<CanonicalKey> {
        sets.iter().map(|moves| CanonicalKey::from_path(moves)).collect()
    }

    fn misinformation_procedure(
        config: AdaptConfig,
    ) -> AdaptationProcedure<MisinformationGame, MisinformedEquilibria<PureNash>, TruthRevelation> {
        AdaptationProcedure::new(MisinformedEquilibria::new(PureNash), TruthRevelation, config)
    }

    fn prisoners_dilemma() -> MisinformationGame {
        // (cooperate, defect) for both parties
        let real = PayoffTable::new(vec![2, 2], vec![vec![3, 3], vec![0, 5], vec![5, 0], vec![1, 1]]).unwrap();
        MisinformationGame::new(vec![real.clone(), real.clone(), real]).unwrap()
    }

    #[test]
    fn test_full_knowledge_root_is_stable() {
        let mut procedure = misinformation_procedure(AdaptConfig::default().with_threads(2));
        let root = procedure.initialize_root(prisoners_dilemma()).unwrap();
        assert_eq!(root.key().len(), 4);

        let stats = procedure.run().unwrap().clone();
        assert_eq!(stats.variants, 1);
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.leaves, 1);
        assert!(!stats.cancelled);

        assert_eq!(procedure.smes().into_iter().collect::<Vec<_>>(), vec![pure(1, 1)]);
        assert_eq!(
            procedure.terminal_set().into_iter().collect::<Vec<_>>(),
            vec![root.key().clone()]
        );
        assert_eq!(procedure.max_knowledge(), Some((VariantId(0), 100.0)));
    }

    #[test]
    fn test_second_claimant_reuses_variant() {
        let mut procedure = AdaptationProcedure::new(
            ScriptedEquilibria::new(diagonal()),
            ScriptedStep::default(),
            AdaptConfig::reduced().with_threads(4).with_preprocess_root(false),
        );
        procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();
        let stats = procedure.run().unwrap().clone();

        // {}, {a}, {b}, {a, b}
        assert_eq!(stats.variants, 4);
        assert_eq!(procedure.pool().len(), 4);

        let both = CanonicalKey::from_path(&diagonal());
        let claimants: Vec<_> = procedure
            .nodes()
            .into_iter()
            .filter(|node| node.key() == &both && node.is_changed_from_parent())
            .collect();
        assert_eq!(claimants.len(), 2);
        assert_eq!(claimants.iter().filter(|node| node.is_new_variant()).count(), 1);
        assert!(Arc::ptr_eq(claimants[0].variant(), claimants[1].variant()));

        // root, 2 children, 2 leaves + 2 claimants, 2 leaves below the one expanded
        assert_eq!(stats.nodes, 9);
        assert_eq!(procedure.smes().len(), 2);
    }

    #[test]
    fn test_each_variant_computed_once() {
        let profiles = Move::profiles(&[2, 2]);
        let mut procedure = AdaptationProcedure::new(
            ScriptedEquilibria::new(profiles),
            ScriptedStep::default(),
            AdaptConfig::exhaustive().with_threads(8).with_preprocess_root(false),
        );
        procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();
        let stats = procedure.run().unwrap().clone();

        assert_eq!(stats.variants, 16);
        assert_eq!(procedure.equilibrium_solver.calls.load(Ordering::SeqCst), 16);
        assert_eq!(procedure.adaptation_solver.calls.load(Ordering::SeqCst), 15);
        // every ordered selection of distinct moves is a changed node
        let changed = procedure.nodes().iter().filter(|n| n.is_changed_from_parent()).count();
        assert_eq!(changed, 4 + 12 + 24 + 24);
        assert_eq!(procedure.progress().upper_bound, Some(16));
    }

    #[test]
    fn test_leaves_share_parent_key() {
        let mut procedure = AdaptationProcedure::new(
            ScriptedEquilibria::new(Move::profiles(&[2, 2])),
            ScriptedStep::default(),
            AdaptConfig::reduced().with_threads(3).with_preprocess_root(false),
        );
        procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();
        procedure.run().unwrap();

        let nodes = procedure.nodes();
        let leaves = procedure.leaves();
        assert!(!leaves.is_empty());
        for leaf in &leaves {
            let parent = &nodes[leaf.parent().unwrap().0];
            assert_eq!(leaf.key(), parent.key());
            assert!(procedure.pool().contains(leaf.key()));
            assert!(procedure.terminal_set().contains(leaf.key()));
        }
        let leaf_count = nodes.iter().filter(|n| n.is_leaf()).count();
        assert_eq!(leaf_count, leaves.len());
    }

    #[test]
    fn test_confluence_across_threads_and_modes() {
        let mut explored = 0;
        for seed in 0..24u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let strategies = if seed % 2 == 0 { vec![2, 2] } else { vec![2, 3] };
            let game = MisinformationGame::random(&strategies, 4, &mut rng).unwrap();

            let mut baseline = misinformation_procedure(AdaptConfig::exhaustive().with_threads(1));
            if baseline.initialize_root(game.clone()).is_err() {
                continue;
            }
            let mut reduced = misinformation_procedure(AdaptConfig::reduced().with_threads(4));
            reduced.initialize_root(game).unwrap();

            let baseline_stats = baseline.run().unwrap().clone();
            let reduced_stats = reduced.run().unwrap().clone();

            assert_eq!(baseline.terminal_set(), reduced.terminal_set(), "seed {}", seed);
            assert_eq!(baseline.smes(), reduced.smes(), "seed {}", seed);
            assert_eq!(baseline_stats.variants, reduced_stats.variants, "seed {}", seed);
            assert!(reduced_stats.nodes <= baseline_stats.nodes, "seed {}", seed);
            explored += 1;
        }
        assert!(explored > 0);
    }

    #[test]
    fn test_malformed_output_aborts_only_that_expansion() {
        let mut equilibria = ScriptedEquilibria::new(diagonal());
        equilibria.malformed = Some([mv(1, 1)].into_iter().collect());
        let mut procedure = AdaptationProcedure::new(
            equilibria,
            ScriptedStep::default(),
            AdaptConfig::reduced().with_threads(2).with_preprocess_root(false),
        );
        procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();
        let stats = procedure.run().unwrap().clone();

        let diagnostics = procedure.diagnostics();
        assert_eq!(diagnostics.aborted_expansions, 1);
        assert_eq!(diagnostics.malformed_outputs, 1);
        assert_eq!(procedure.pool().num_failed(), 1);
        // {}, {a} and {a, b} still get built
        assert_eq!(stats.variants, 3);
        assert!(!stats.cancelled);
    }

    #[test]
    fn test_timeout_drops_only_that_branch() {
        for config in [AdaptConfig::reduced(), AdaptConfig::exhaustive()] {
            let mut procedure = AdaptationProcedure::new(
                ScriptedEquilibria::new(diagonal()),
                ScriptedStep::timing_out(|applied| applied.contains(&mv(1, 1))),
                config.with_threads(2).with_preprocess_root(false),
            );
            procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();
            let stats = procedure.run().unwrap().clone();

            // root, {a} and the loop-back below it; {b} and {a, b} time out
            assert!(!stats.cancelled);
            assert_eq!(stats.nodes, 3);
            assert_eq!(stats.variants, 2);
            assert_eq!(procedure.pool().num_failed(), 2);

            let diagnostics = procedure.diagnostics();
            assert_eq!(diagnostics.solver_failures, 2);
            assert_eq!(diagnostics.aborted_expansions, 0);
            assert_eq!(diagnostics.malformed_outputs, 0);

            assert_eq!(procedure.terminal_set(), keys(&[&[mv(0, 0)]]));
            assert_eq!(procedure.smes(), [pure(0, 0)].into_iter().collect());
        }
    }

    #[test]
    fn test_failed_variant_is_not_recomputed() {
        let mut procedure = AdaptationProcedure::new(
            ScriptedEquilibria::new(diagonal()),
            ScriptedStep::timing_out(|applied| applied.len() == 2),
            AdaptConfig::reduced().with_threads(2).with_preprocess_root(false),
        );
        procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();
        let stats = procedure.run().unwrap().clone();

        // {a} and {b} both reach {a, b}: one claims it and fails, the other
        // finds the failed slot and drops the move
        assert_eq!(procedure.adaptation_solver.calls.load(Ordering::SeqCst), 3);
        assert_eq!(procedure.pool().num_failed(), 1);
        assert_eq!(stats.variants, 3);
        assert_eq!(stats.nodes, 5);

        let diagnostics = procedure.diagnostics();
        assert_eq!(diagnostics.solver_failures, 1);
        assert_eq!(diagnostics.aborted_expansions, 0);

        assert_eq!(procedure.terminal_set(), keys(&[&[mv(0, 0)], &[mv(1, 1)]]));
        assert_eq!(procedure.smes().len(), 2);
    }

    #[test]
    fn test_variant_without_equilibria_drops_branch() {
        let mut equilibria = ScriptedEquilibria::new(diagonal());
        equilibria.empty = Some([mv(1, 1)].into_iter().collect());
        let mut procedure = AdaptationProcedure::new(
            equilibria,
            ScriptedStep::default(),
            AdaptConfig::reduced().with_threads(2).with_preprocess_root(false),
        );
        procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();
        let stats = procedure.run().unwrap().clone();

        // {}, {a} and {a, b}; {b} has no equilibria
        assert_eq!(stats.variants, 3);
        assert_eq!(stats.nodes, 6);
        assert_eq!(procedure.pool().num_failed(), 1);

        let diagnostics = procedure.diagnostics();
        assert_eq!(diagnostics.no_equilibria, 1);
        assert_eq!(diagnostics.aborted_expansions, 0);
        assert_eq!(diagnostics.malformed_outputs, 0);

        assert_eq!(procedure.terminal_set(), keys(&[&[mv(0, 0)], &diagonal()]));
        assert_eq!(procedure.smes(), [pure(0, 0), pure(1, 1)].into_iter().collect());
    }

    #[test]
    fn test_too_many_threads_is_reported() {
        let threads = available_parallelism() + 1;
        let mut procedure = AdaptationProcedure::new(
            ScriptedEquilibria::new(diagonal()),
            ScriptedStep::default(),
            AdaptConfig::reduced().with_threads(threads).with_preprocess_root(false),
        );
        procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();
        let stats = procedure.run().unwrap().clone();

        assert_eq!(stats.threads, threads);
        assert_eq!(stats.variants, 4);
        let diagnostics = procedure.diagnostics();
        assert!(diagnostics.too_many_threads);
        assert!(!diagnostics.is_clean());
    }

    #[test]
    fn test_strict_mode_stops_on_malformed_output() {
        let mut equilibria = ScriptedEquilibria::new(diagonal());
        equilibria.malformed = Some([mv(1, 1)].into_iter().collect());
        let mut procedure = AdaptationProcedure::new(
            equilibria,
            ScriptedStep::default(),
            AdaptConfig::reduced()
                .with_threads(2)
                .with_preprocess_root(false)
                .with_strict(true),
        );
        procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();

        let result = procedure.run();
        assert!(matches!(result, Err(TraversalError::Strict(SolverError::Malformed(_)))));
        assert!(procedure.stats().cancelled);
    }

    #[test]
    fn test_cancel_keeps_accumulated_results() {
        let mut procedure = AdaptationProcedure::new(
            ScriptedEquilibria::new(diagonal()),
            ScriptedStep::default(),
            AdaptConfig::reduced().with_threads(2).with_preprocess_root(false),
        );
        procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();

        let handle = procedure.shutdown_handle();
        handle.cancel();
        let stats = procedure.run().unwrap().clone();

        assert!(stats.cancelled);
        assert_eq!(stats.nodes, 1);
        assert_eq!(stats.variants, 1);
        assert!(procedure.root().is_some());
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut procedure = AdaptationProcedure::new(
            ScriptedEquilibria::new(diagonal()),
            ScriptedStep::default(),
            AdaptConfig::default().with_threads(1),
        );
        assert!(matches!(procedure.run(), Err(TraversalError::RootNotInitialized)));

        procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();
        assert!(matches!(
            procedure.initialize_root(Scripted::new(vec![2, 2])),
            Err(TraversalError::RootAlreadyInitialized)
        ));

        procedure.run().unwrap();
        assert!(matches!(procedure.run(), Err(TraversalError::AlreadyRun)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut procedure = AdaptationProcedure::new(
            ScriptedEquilibria::new(diagonal()),
            ScriptedStep::default(),
            AdaptConfig::default().with_threads(0),
        );
        procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();
        assert!(matches!(
            procedure.run(),
            Err(TraversalError::Config(ConfigError::ZeroThreads))
        ));
    }

    #[test]
    fn test_root_without_equilibria_fails() {
        let mut procedure = AdaptationProcedure::new(
            ScriptedEquilibria::new(vec![]),
            ScriptedStep::default(),
            AdaptConfig::default().with_threads(1),
        );
        let result = procedure.initialize_root(Scripted::new(vec![2, 2]));
        assert!(matches!(result, Err(TraversalError::Root(SolverError::NoResult(_)))));
        assert_eq!(procedure.diagnostics().no_equilibria, 1);
    }

    #[test]
    fn test_progress_callback_sees_final_state() {
        let mut procedure = AdaptationProcedure::new(
            ScriptedEquilibria::new(diagonal()),
            ScriptedStep::default(),
            AdaptConfig::reduced()
                .with_threads(2)
                .with_preprocess_root(false)
                .with_progress_interval(1),
        );
        procedure.initialize_root(Scripted::new(vec![2, 2])).unwrap();

        let mut last = None;
        procedure.run_with_callback(|progress| last = Some(*progress)).unwrap();

        let last = last.unwrap();
        assert_eq!(last.discovered, 4);
        assert_eq!(last.nodes, 9);
        assert_eq!(last.pending, 0);
        assert_eq!(last.upper_bound, Some(16));
    }
}
