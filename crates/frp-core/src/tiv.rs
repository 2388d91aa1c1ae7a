//! Time-invariant values: the base contract every `Cell`/`Stream`
//! primitive built on top of `frp-core` implements. Ported from the
//! root-level `time_invariant_values.hpp`/`.cpp` (`TimeInvariantValues`),
//! generalized from a `Transaction*`-parameterized virtual base class
//! into a trait object plus a shared, kind-aware value store that the
//! `frp` crate's `Cell<T>`/`Stream<T>` wrap.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::node::NodeId;
use crate::transaction::InnerTransaction;

/// Whether a primitive behaves like a `Stream` (sparse, at-most-one
/// value per transaction, nothing "between" transactions) or a `Cell`
/// (always has a current value, read with `sample`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TivKind {
    Event,
    State,
}

/// The behavior every graph node needs so the executor can drive it
/// without knowing its concrete value type. Implemented by `Cell<T>`'s
/// and `Stream<T>`'s internal node object in the `frp` crate.
pub trait TivOps: Send + Sync {
    fn node_id(&self) -> NodeId;

    /// Called once per transaction, in rank order, for every node the
    /// transaction touched. Recomputes this node's value for the
    /// transaction from its listened-to parents. Registers any further
    /// work (listener writes, cleanups) back onto `txn` via its
    /// `register_*` methods, all of which take `&self`.
    fn update(&self, txn: &InnerTransaction);

    /// Called once per transaction after every node has been updated,
    /// to roll the transaction's staged value into durable state (for
    /// `State`-kind nodes) or drop it (for `Event`-kind nodes).
    fn refresh(&self, txn_id: u64);

    /// Called once, after `refresh`, to run user-registered listeners.
    fn finalize(&self, txn_id: u64);
}

/// Per-transaction staged values plus the current durable value, shared
/// by the `frp` crate's `Cell<T>` and `Stream<T>` node types. Kind-aware
/// `refresh` is where the weakened-`refresh` decision lives: the
/// original asserted the current transaction had written a value before
/// refreshing; purely-derived `State`-kind cells may go a whole
/// transaction without writing (nothing upstream changed), so an absent
/// write is a no-op here rather than a panic.
pub struct ValueStore<T: Clone + Send + Sync> {
    kind: TivKind,
    staged: Mutex<BTreeMap<u64, T>>,
}

impl<T: Clone + Send + Sync> ValueStore<T> {
    pub fn new(kind: TivKind, initial: Option<T>) -> Self {
        let mut staged = BTreeMap::new();
        if let (TivKind::State, Some(v)) = (kind, initial) {
            staged.insert(0, v);
        }
        ValueStore {
            kind,
            staged: Mutex::new(staged),
        }
    }

    pub fn kind(&self) -> TivKind {
        self.kind
    }

    /// Stages a value for the given transaction id, overwriting any
    /// existing staged value for that id (a node updates at most once
    /// per transaction, but combinators like `merge` may call `set`
    /// more than once while resolving simultaneity before settling).
    pub fn set(&self, txn_id: u64, value: T) {
        self.staged.lock().insert(txn_id, value);
    }

    /// The value visible to a reader (a `snapshot`/`sample` caller)
    /// during or after the given transaction: the most recent entry at
    /// or before `txn_id`. `Event`-kind stores only ever have an entry
    /// exactly at the current transaction, so this doubles as "did this
    /// stream fire in `txn_id`".
    pub fn sample_at(&self, txn_id: u64) -> Option<T> {
        self.staged
            .lock()
            .range(..=txn_id)
            .next_back()
            .map(|(_, v)| v.clone())
    }

    /// The value durably in effect strictly *before* `txn_id`. Used by
    /// `child_to`-wired reads of a `Cell` (`snapshot`/`gate`'s cell
    /// argument): per FRP semantics a cell's write is only observable to
    /// something merely reading it, not pushed its new value through a
    /// graph edge, starting the *next* transaction — even when that
    /// write happens to be staged under the very transaction id doing
    /// the reading (a direct sink send, or a `GlobalCellLoop` feedback
    /// write both stage at the reader's own transaction id). Contrast
    /// with `sample_at`, which `Cell::map`/`lift2`/`lift3` and `hold`
    /// correctly use for their own `listen`-wired parent: those transforms
    /// are supposed to update in lockstep with their source, zero-lag.
    pub fn sample_before(&self, txn_id: u64) -> Option<T> {
        self.staged
            .lock()
            .range(..txn_id)
            .next_back()
            .map(|(_, v)| v.clone())
    }

    pub fn sample(&self) -> Option<T> {
        self.staged.lock().values().next_back().cloned()
    }

    /// Rolls the store forward. `Event`-kind: the fired value (if any)
    /// for this exact transaction is transient, so drop it. `State`-kind:
    /// prune every entry but the single most recent one, whatever its
    /// key — by the time a transaction reaches cleanup every
    /// strictly-older transaction has already finalized (finalize runs
    /// in transaction-id order), so nothing will ever need to read an
    /// older entry again. This is also what makes the weakened semantics
    /// correct for a transaction that staged nothing under its own id: a
    /// purely-derived cell whose recompute produced nothing this
    /// transaction, or a `GlobalCellLoop` feedback value staged under an
    /// earlier id by design, both still collapse down to "keep only the
    /// latest" rather than asserting a write happened at exactly `txn_id`.
    pub fn refresh(&self, txn_id: u64) {
        let mut staged = self.staged.lock();
        match self.kind {
            TivKind::Event => {
                staged.remove(&txn_id);
            }
            TivKind::State => {
                if let Some(&latest) = staged.keys().next_back() {
                    let stale: Vec<u64> = staged.range(..latest).map(|(k, _)| *k).collect();
                    for k in stale {
                        staged.remove(&k);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_sample_disappears_after_refresh() {
        let store = ValueStore::new(TivKind::Event, None);
        store.set(1, "fired");
        assert_eq!(store.sample_at(1), Some("fired"));
        store.refresh(1);
        assert_eq!(store.sample_at(1), None);
    }

    #[test]
    fn state_kind_refresh_without_a_write_is_a_no_op() {
        let store = ValueStore::new(TivKind::State, Some(0));
        store.refresh(1);
        assert_eq!(store.sample(), Some(0));
    }

    #[test]
    fn state_kind_refresh_with_a_write_drops_older_entries() {
        let store = ValueStore::new(TivKind::State, Some(0));
        store.set(1, 1);
        store.refresh(1);
        assert_eq!(store.sample(), Some(1));
        assert_eq!(store.staged.lock().len(), 1);
    }
}
