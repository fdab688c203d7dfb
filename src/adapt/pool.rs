//! Deduplicating pool of game variants.
//!
//! Every canonical key maps to exactly one slot, and the expensive content of
//! a slot is computed by exactly one thread. Claiming is a two-phase protocol:
//!
//! 1. `try_claim` atomically checks membership and, when absent, reserves the
//!    slot and hands the caller a [`Reservation`].
//! 2. The caller solves without holding any pool lock and installs the result
//!    with `populate`.
//!
//! Other threads that find a reserved slot block in [`VariantSlot::wait`]
//! until it is populated or abandoned.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::adapt::game::{Equilibrium, Knowledge, Move};
use crate::adapt::key::CanonicalKey;

/// Dense identifier of a variant, assigned in claim order. The root is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariantId(pub usize);

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An equilibrium together with the moves derived from its support.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateEquilibrium {
    /// The equilibrium as returned by the solver.
    pub equilibrium: Equilibrium,
    /// Candidate corrections, one per supported profile.
    pub moves: Vec<Move>,
}

/// A fully computed game variant. Immutable once built.
#[derive(Debug)]
pub struct Variant<G> {
    id: VariantId,
    key: CanonicalKey,
    game: G,
    knowledge: Option<Knowledge>,
    candidates: Vec<CandidateEquilibrium>,
}

impl<G> Variant<G> {
    /// Build a variant and derive the candidate moves of its equilibria.
    pub fn new(
        id: VariantId,
        key: CanonicalKey,
        game: G,
        knowledge: Option<Knowledge>,
        equilibria: Vec<Equilibrium>,
    ) -> Self {
        let candidates = equilibria
            .into_iter()
            .map(|equilibrium| {
                let moves = equilibrium.moves();
                CandidateEquilibrium { equilibrium, moves }
            })
            .collect();

        Self {
            id,
            key,
            game,
            knowledge,
            candidates,
        }
    }

    /// Variant identifier.
    pub fn id(&self) -> VariantId {
        self.id
    }

    /// Canonical key this variant is registered under.
    pub fn key(&self) -> &CanonicalKey {
        &self.key
    }

    /// The game description.
    pub fn game(&self) -> &G {
        &self.game
    }

    /// Knowledge reported when the variant was produced.
    pub fn knowledge(&self) -> Option<Knowledge> {
        self.knowledge
    }

    /// Candidate equilibria with their moves.
    pub fn candidates(&self) -> &[CandidateEquilibrium] {
        &self.candidates
    }

    /// Number of candidate equilibria.
    pub fn num_equilibria(&self) -> usize {
        self.candidates.len()
    }
}

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Claimed, content not yet installed.
    Reserved,
    /// Content installed.
    Ready,
    /// The claimant gave up; the slot will never be populated.
    Failed,
}

enum SlotState<G> {
    Reserved,
    Ready(Arc<Variant<G>>),
    Failed,
}

/// One entry of the pool, shared by every node that resolves to its key.
pub struct VariantSlot<G> {
    id: VariantId,
    key: CanonicalKey,
    state: Mutex<SlotState<G>>,
    ready: Condvar,
}

impl<G> VariantSlot<G> {
    fn reserved(id: VariantId, key: CanonicalKey) -> Self {
        Self {
            id,
            key,
            state: Mutex::new(SlotState::Reserved),
            ready: Condvar::new(),
        }
    }

    /// Identifier assigned when the slot was claimed.
    pub fn id(&self) -> VariantId {
        self.id
    }

    /// Canonical key of the slot.
    pub fn key(&self) -> &CanonicalKey {
        &self.key
    }

    /// Current status, without blocking.
    pub fn status(&self) -> SlotStatus {
        match *self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            SlotState::Reserved => SlotStatus::Reserved,
            SlotState::Ready(_) => SlotStatus::Ready,
            SlotState::Failed => SlotStatus::Failed,
        }
    }

    /// The variant if it is already populated.
    pub fn get(&self) -> Option<Arc<Variant<G>>> {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            SlotState::Ready(variant) => Some(Arc::clone(variant)),
            _ => None,
        }
    }

    /// Block until the claimant populates or abandons the slot.
    ///
    /// Returns `None` when the slot was abandoned.
    pub fn wait(&self) -> Option<Arc<Variant<G>>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while matches!(*state, SlotState::Reserved) {
            state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        match &*state {
            SlotState::Ready(variant) => Some(Arc::clone(variant)),
            _ => None,
        }
    }

    fn settle(&self, settled: SlotState<G>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = settled;
        self.ready.notify_all();
    }
}

impl<G> fmt::Debug for VariantSlot<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantSlot")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("status", &self.status())
            .finish()
    }
}

/// Exclusive right to populate a reserved slot.
///
/// Dropping a reservation without populating it abandons the slot and wakes
/// every waiter.
#[must_use = "an unpopulated reservation abandons its slot when dropped"]
pub struct Reservation<G> {
    slot: Arc<VariantSlot<G>>,
    settled: bool,
}

impl<G> Reservation<G> {
    /// Identifier the variant must carry.
    pub fn id(&self) -> VariantId {
        self.slot.id
    }

    /// Key the variant must carry.
    pub fn key(&self) -> &CanonicalKey {
        &self.slot.key
    }

    /// Give up on the slot explicitly.
    pub fn abandon(mut self) {
        self.settled = true;
        log::debug!("abandoning variant {} {}", self.slot.id, self.slot.key);
        self.slot.settle(SlotState::Failed);
    }
}

impl<G> Drop for Reservation<G> {
    fn drop(&mut self) {
        if !self.settled {
            log::warn!("reservation for variant {} dropped unpopulated", self.slot.id);
            self.slot.settle(SlotState::Failed);
        }
    }
}

/// Outcome of [`VariantPool::try_claim`].
pub enum Claim<G> {
    /// The key already has a slot (possibly still being computed).
    Present(Arc<VariantSlot<G>>),
    /// The caller reserved the slot and must populate it.
    Claimed(Reservation<G>),
}

/// Thread-safe map from canonical key to shared variant slot.
///
/// The map lock is held only for the membership check and the reservation;
/// population happens on the slot itself.
pub struct VariantPool<G> {
    slots: RwLock<FxHashMap<CanonicalKey, Arc<VariantSlot<G>>>>,
    next_id: AtomicUsize,
}

impl<G> Default for VariantPool<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G> VariantPool<G> {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(FxHashMap::default()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Create a pool with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(FxHashMap::with_capacity_and_hasher(
                capacity,
                Default::default(),
            )),
            next_id: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, FxHashMap<CanonicalKey, Arc<VariantSlot<G>>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, FxHashMap<CanonicalKey, Arc<VariantSlot<G>>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically look up `key`, reserving a fresh slot when it is absent.
    pub fn try_claim(&self, key: CanonicalKey) -> Claim<G> {
        if let Some(slot) = self.read().get(&key) {
            return Claim::Present(Arc::clone(slot));
        }

        let mut slots = self.write();
        // re-check: another thread may have reserved between the two locks
        if let Some(slot) = slots.get(&key) {
            return Claim::Present(Arc::clone(slot));
        }

        let id = VariantId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let slot = Arc::new(VariantSlot::reserved(id, key.clone()));
        slots.insert(key, Arc::clone(&slot));

        Claim::Claimed(Reservation {
            slot,
            settled: false,
        })
    }

    /// Install the finished variant into a reserved slot and wake waiters.
    pub fn populate(&self, mut reservation: Reservation<G>, variant: Variant<G>) -> Arc<Variant<G>> {
        debug_assert_eq!(reservation.id(), variant.id(), "variant id does not match its slot");
        debug_assert_eq!(reservation.key(), variant.key(), "variant key does not match its slot");

        let variant = Arc::new(variant);
        reservation.settled = true;
        reservation.slot.settle(SlotState::Ready(Arc::clone(&variant)));
        variant
    }

    /// Current binding of `key`, which may still be reserved.
    pub fn get(&self, key: &CanonicalKey) -> Option<Arc<VariantSlot<G>>> {
        self.read().get(key).cloned()
    }

    /// Check whether `key` has a slot.
    pub fn contains(&self, key: &CanonicalKey) -> bool {
        self.read().contains_key(key)
    }

    /// Number of slots, in any state.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True when nothing was ever claimed.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Number of claims so far; used for progress reporting.
    pub fn discovered(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    /// All populated variants, ordered by id.
    pub fn variants(&self) -> Vec<Arc<Variant<G>>> {
        let mut variants: Vec<Arc<Variant<G>>> =
            self.read().values().filter_map(|slot| slot.get()).collect();
        variants.sort_by_key(|v| v.id());
        variants
    }

    /// Number of populated variants.
    pub fn num_ready(&self) -> usize {
        self.read()
            .values()
            .filter(|slot| slot.status() == SlotStatus::Ready)
            .count()
    }

    /// Number of abandoned slots.
    pub fn num_failed(&self) -> usize {
        self.read()
            .values()
            .filter(|slot| slot.status() == SlotStatus::Failed)
            .count()
    }
}

impl<G> fmt::Debug for VariantPool<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantPool")
            .field("slots", &self.len())
            .field("discovered", &self.discovered())
            .finish()
    }
}
