//! Transaction bookkeeping. Ported from `original_source/src/prf/transaction.hpp`
//! and `transaction.cpp`: `InnerTransaction` is the engine-internal
//! accumulator threaded through a cluster's update pass; `Transaction` is
//! the user-facing RAII scope that opens one and hands back a
//! `JoinHandler` the caller can wait on.

use std::cell::RefCell;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::BuildError;
use crate::node::{ClusterId, NodeId, UNMANAGED_CLUSTER_ID};
use crate::rank::Rank;
use crate::runtime::Runtime;
use crate::tiv::TivOps;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_TRANSACTION: RefCell<Option<Arc<InnerTransaction>>> = RefCell::new(None);
}

/// Returns the transaction the calling thread is currently inside, if
/// any. Combinator constructors call this to decide which transaction a
/// freshly-registered write should land in.
pub fn current_transaction() -> Option<Arc<InnerTransaction>> {
    CURRENT_TRANSACTION.with(|cell| cell.borrow().clone())
}

fn set_current_transaction(txn: Option<Arc<InnerTransaction>>) {
    CURRENT_TRANSACTION.with(|cell| *cell.borrow_mut() = txn);
}

/// Test-only: rewinds transaction id allocation. Used by `Runtime::initialize`.
pub(crate) fn reset_transaction_ids() {
    NEXT_TRANSACTION_ID.store(1, Ordering::Relaxed);
}

struct QueueEntry {
    rank: Rank,
    node_id: NodeId,
    tiv: Arc<dyn TivOps>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.node_id == other.node_id
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse so the lowest rank pops first.
        other.rank.cmp(&self.rank)
    }
}

/// A deferred callback registered by a `GlobalCellLoop`-like construct,
/// run once against the *next* transaction's own root — not just its id
/// — so it can wire itself in exactly like a real `send` would
/// (`register_cleanup`, `notify_listeners`) instead of writing into a
/// store that nothing ever refreshes or schedules downstream of.
pub type BeforeUpdateHook = Box<dyn FnOnce(&Arc<InnerTransaction>) + Send>;

/// What an `InnerTransaction::execute()` pass hands back to the root
/// transaction: newly-discovered work in other clusters, nodes due for
/// `refresh`/`finalize`, and hooks to run once the whole transaction is
/// durable.
pub struct ExecuteResult {
    pub targets: HashMap<ClusterId, Vec<Arc<dyn TivOps>>>,
    pub cleanups: Vec<Arc<dyn TivOps>>,
    pub before_update_hooks: Vec<BeforeUpdateHook>,
}

/// The work-in-progress state of one transaction as it is driven,
/// cluster by cluster, through the executor. The root `InnerTransaction`
/// (the one returned by `Transaction::get_join_handler`) accumulates
/// results from every subtransaction spawned on its behalf.
pub struct InnerTransaction {
    id: u64,
    updating_cluster: ClusterId,
    inner: parking_lot::Mutex<InnerState>,
}

struct InnerState {
    queue: BinaryHeap<QueueEntry>,
    /// Mirrors the queue's membership: a node already pending in-cluster
    /// must not be pushed a second time just because a second parent
    /// (in the same cluster) also notified it this transaction. Erased
    /// when the node is popped in `execute`, same as
    /// `original_source/src/prf/transaction.cpp`'s `std::set::erase` on
    /// pop.
    targets_inside_current_cluster: HashSet<NodeId>,
    /// Bucketed by cluster, and within each bucket keyed by `NodeId` so a
    /// node reachable from more than one parent is only ever queued once
    /// for that cluster's subtransaction, mirroring the original's
    /// `std::set`-backed `targets_outside_current_cluster[id]`.
    targets_outside_current_cluster: HashMap<ClusterId, HashMap<NodeId, Arc<dyn TivOps>>>,
    cleanups: Vec<Arc<dyn TivOps>>,
    seen_cleanups: HashSet<NodeId>,
    before_update_hooks: Vec<BeforeUpdateHook>,
}

impl InnerTransaction {
    fn new(id: u64, updating_cluster: ClusterId) -> Arc<Self> {
        Arc::new(InnerTransaction {
            id,
            updating_cluster,
            inner: parking_lot::Mutex::new(InnerState {
                queue: BinaryHeap::new(),
                targets_inside_current_cluster: HashSet::new(),
                targets_outside_current_cluster: HashMap::new(),
                cleanups: Vec::new(),
                seen_cleanups: HashSet::new(),
                before_update_hooks: Vec::new(),
            }),
        })
    }

    /// Opens a fresh root transaction and makes it the thread's current
    /// one. Fails if the calling thread is already inside a transaction
    /// whose cluster is mid-update (nesting a write into an
    /// already-updating cluster would reorder past work that cluster's
    /// rank already committed to).
    pub fn open_root() -> Result<Arc<Self>, BuildError> {
        if let Some(existing) = current_transaction() {
            if existing.is_in_updating() {
                return Err(BuildError::NestedTransactionWhileUpdating(
                    existing.updating_cluster,
                ));
            }
            return Ok(existing);
        }
        let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        let txn = Self::new(id, UNMANAGED_CLUSTER_ID);
        set_current_transaction(Some(txn.clone()));
        Ok(txn)
    }

    pub(crate) fn new_sub(id: u64, cluster: ClusterId, seed: Vec<Arc<dyn TivOps>>) -> Arc<Self> {
        let txn = Self::new(id, cluster);
        {
            let mut state = txn.inner.lock();
            for tiv in seed {
                let node_id = tiv.node_id();
                if state.targets_inside_current_cluster.insert(node_id) {
                    state.queue.push(QueueEntry {
                        rank: Rank::new(),
                        node_id,
                        tiv,
                    });
                }
            }
        }
        txn
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_in_updating(&self) -> bool {
        self.updating_cluster != UNMANAGED_CLUSTER_ID
    }

    pub fn register_update(&self, tiv: Arc<dyn TivOps>, cluster_id: ClusterId, rank: Rank) {
        let mut state = self.inner.lock();
        if cluster_id == self.updating_cluster {
            let node_id = tiv.node_id();
            if state.targets_inside_current_cluster.insert(node_id) {
                state.queue.push(QueueEntry { rank, node_id, tiv });
            }
        } else {
            state
                .targets_outside_current_cluster
                .entry(cluster_id)
                .or_default()
                .entry(tiv.node_id())
                .or_insert(tiv);
        }
    }

    pub fn register_cleanup(&self, tiv: Arc<dyn TivOps>) {
        let mut state = self.inner.lock();
        if state.seen_cleanups.insert(tiv.node_id()) {
            state.cleanups.push(tiv);
        }
    }

    /// Registers a callback to run once, with the *next* transaction's
    /// id, before that transaction's clusters are scheduled. Used by
    /// `GlobalCellLoop`-like constructs whose feedback must land a
    /// transaction late rather than reordering the current one.
    pub fn register_before_update_hook(&self, hook: BeforeUpdateHook) {
        self.inner.lock().before_update_hooks.push(hook);
    }

    /// Drains the in-cluster-rank-ordered queue, calling `update` on each
    /// node exactly once, then hands everything discovered along the way
    /// back to the caller as an `ExecuteResult`.
    pub fn execute(self: &Arc<Self>) -> ExecuteResult {
        set_current_transaction(Some(self.clone()));
        loop {
            let next = {
                let mut state = self.inner.lock();
                let entry = state.queue.pop();
                if let Some(entry) = &entry {
                    state.targets_inside_current_cluster.remove(&entry.node_id);
                }
                entry
            };
            match next {
                Some(entry) => entry.tiv.update(self),
                None => break,
            }
        }
        let mut state = self.inner.lock();
        let targets = std::mem::take(&mut state.targets_outside_current_cluster)
            .into_iter()
            .map(|(cluster, tivs)| (cluster, tivs.into_values().collect()))
            .collect();
        ExecuteResult {
            targets,
            cleanups: std::mem::take(&mut state.cleanups),
            before_update_hooks: std::mem::take(&mut state.before_update_hooks),
        }
    }

    pub fn generate_sub_transaction(
        self: &Arc<Self>,
        cluster: ClusterId,
    ) -> Option<Arc<InnerTransaction>> {
        let seed = {
            let mut state = self.inner.lock();
            state.targets_outside_current_cluster.remove(&cluster)
        };
        seed.map(|seed| Self::new_sub(self.id, cluster, seed.into_values().collect()))
    }

    /// Root-only: merges a subtransaction's `ExecuteResult` back in,
    /// returning cluster ids that were not already known targets (the
    /// planner needs these to schedule further work). Each cluster's
    /// bucket dedups by `NodeId` so a node the root already knew about
    /// for that cluster (discovered via a different parent) is not
    /// queued twice in the eventual subtransaction.
    pub fn register_execution_result(&self, result: ExecuteResult) -> Vec<ClusterId> {
        let mut state = self.inner.lock();
        let mut newly_discovered = Vec::new();
        for (cluster, tivs) in result.targets {
            let bucket = match state.targets_outside_current_cluster.entry(cluster) {
                std::collections::hash_map::Entry::Vacant(v) => {
                    newly_discovered.push(cluster);
                    v.insert(HashMap::new())
                }
                std::collections::hash_map::Entry::Occupied(o) => o.into_mut(),
            };
            for tiv in tivs {
                bucket.entry(tiv.node_id()).or_insert(tiv);
            }
        }
        for tiv in result.cleanups {
            if state.seen_cleanups.insert(tiv.node_id()) {
                state.cleanups.push(tiv);
            }
        }
        state.before_update_hooks.extend(result.before_update_hooks);
        newly_discovered
    }

    pub fn target_clusters(&self) -> Vec<ClusterId> {
        self.inner
            .lock()
            .targets_outside_current_cluster
            .keys()
            .copied()
            .collect()
    }

    /// Commits every touched node's staged value, then runs listeners.
    /// Two separate passes: a node's listener must never observe a
    /// sibling node mid-commit.
    pub fn finalize(&self) {
        let cleanups = self.inner.lock().cleanups.clone();
        // Outside listeners must observe the final value before the
        // memoised entry is dropped: finalize, then refresh.
        for tiv in &cleanups {
            tiv.finalize(self.id);
        }
        for tiv in &cleanups {
            tiv.refresh(self.id);
        }
    }

    pub fn take_before_update_hooks(&self) -> Vec<BeforeUpdateHook> {
        std::mem::take(&mut self.inner.lock().before_update_hooks)
    }
}

/// Move-only handle to a transaction's completion, returned by
/// `Transaction::get_join_handler`. Ported from `prf::JoinHandler`.
pub struct JoinHandler {
    waiter: Option<Arc<crate::queue::Waiter>>,
}

impl JoinHandler {
    pub(crate) fn new(waiter: Arc<crate::queue::Waiter>) -> Self {
        JoinHandler {
            waiter: Some(waiter),
        }
    }

    /// A handle for a `Transaction` scope that turned out to be nested
    /// inside an already-open one: there is nothing to wait for here,
    /// the enclosing scope's own `JoinHandler` is what observes the
    /// eventual finalize.
    pub(crate) fn already_joined() -> Self {
        JoinHandler { waiter: None }
    }

    pub fn join(mut self) {
        if let Some(waiter) = self.waiter.take() {
            waiter.wait();
        }
    }
}

impl Drop for JoinHandler {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            waiter.wait();
        }
    }
}

/// User-facing RAII transaction scope. Ported from `prf::Transaction`.
/// Opens (or joins) the calling thread's current transaction on
/// construction; `get_join_handler()` submits it to the executor and
/// returns a handle the caller can wait on for full completion.
///
/// Opening a `Transaction` while one is already current on this thread
/// (an explicit scope wrapping several sends, or one combinator's send
/// calling another's) joins the existing one instead of starting a
/// second root: `owns_root` records which instance is the one that
/// actually created it, since only that instance may submit it to the
/// executor or clear the thread-local on close. This is what "opening
/// suppresses implicit transactions for nested sends" means in
/// practice.
pub struct Transaction {
    runtime: Runtime,
    inner: Option<Arc<InnerTransaction>>,
    owns_root: bool,
}

impl Transaction {
    pub fn new(runtime: &Runtime) -> Result<Self, BuildError> {
        let owns_root = current_transaction().is_none();
        let inner = InnerTransaction::open_root()?;
        Ok(Transaction {
            runtime: runtime.clone(),
            inner: Some(inner),
            owns_root,
        })
    }

    pub fn get_join_handler(mut self) -> JoinHandler {
        let inner = self.inner.take().expect("transaction already consumed");
        if self.owns_root {
            set_current_transaction(None);
            self.runtime.submit_transaction(inner)
        } else {
            JoinHandler::already_joined()
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if self.owns_root {
                set_current_transaction(None);
                self.runtime.submit_transaction(inner).join();
            }
        }
    }
}
