//! Shared plumbing every `Cell<T>`/`Stream<T>` internal node embeds.
//! `frp-core` only understands bare `NodeId`s and `Arc<dyn TivOps>`; this
//! module is where "listen" from `original_source/src/prf/time_invariant_value.hpp`
//! becomes concrete: a node's downstream listeners are the other nodes it
//! schedules (via `InnerTransaction::register_update`) once its own value
//! for a transaction is known.
//!
//! Two distinct wiring primitives live here, matching the two things the
//! original's `listen` call was overloaded to do:
//!
//! - [`TivBase::listen`]/[`TivBase::listen_over_loop`]: `child` is added to
//!   this node's downstream list *and* gains a graph edge from this node,
//!   so it is automatically scheduled whenever this node updates.
//! - [`TivBase::child_to`]: graph edge only, no scheduling. `snapshot`/
//!   `gate` depend on a `Cell` this way: the cell's current value is read
//!   when the *other* input (a `Stream`) fires, not whenever the cell
//!   itself changes.

use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use frp_core::{BeforeUpdateHook, BuildError, ClusterId, InnerTransaction, NodeId, Runtime, TivOps};

/// Embedded by every concrete node type (`CellInternal<T>` and
/// `StreamInternal<T>`, including their sink and loop variants). Carries
/// the `NodeId`, a handle back to the owning `Runtime`, the downstream
/// listener list, and the `Weak<dyn TivOps>` a node needs to hand a
/// reference to *itself* to `InnerTransaction::register_cleanup` from
/// inside its own `&self` method.
type GlobalListener = dyn Fn(&InnerTransaction) + Send + Sync;

pub struct TivBase {
    node_id: NodeId,
    runtime: Runtime,
    downstream: Mutex<Vec<Arc<dyn TivOps>>>,
    global_listeners: Mutex<Vec<Box<GlobalListener>>>,
    self_ref: OnceCell<Weak<dyn TivOps>>,
}

impl TivBase {
    /// Registers a fresh node under whichever `Cluster` scope is
    /// currently open (or the unmanaged sink cluster if none is).
    pub fn new(runtime: &Runtime) -> Self {
        let cluster_id = runtime.current_cluster_id();
        Self::new_in_cluster(runtime, cluster_id)
    }

    /// Registers a fresh node under an explicit cluster, bypassing
    /// whatever `Cluster` scope happens to be open. `CellSink`/
    /// `StreamSink` use this to force themselves into the unmanaged
    /// cluster regardless of ambient scope.
    pub fn new_in_cluster(runtime: &Runtime, cluster_id: ClusterId) -> Self {
        let node_id = runtime.register_node(cluster_id);
        TivBase {
            node_id,
            runtime: runtime.clone(),
            downstream: Mutex::new(Vec::new()),
            global_listeners: Mutex::new(Vec::new()),
            self_ref: OnceCell::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Must be called exactly once, right after wrapping the owning
    /// struct in an `Arc`, before the node is wired to anything else.
    /// Lets `update`/`refresh`/`finalize` (which only ever see `&self`)
    /// produce an `Arc<dyn TivOps>` of themselves when they need to hand
    /// one to `register_cleanup` or a downstream `listen` call.
    pub fn init_self_ref(&self, self_arc: &Arc<dyn TivOps>) {
        let _ = self.self_ref.set(Arc::downgrade(self_arc));
    }

    pub fn self_arc(&self) -> Arc<dyn TivOps> {
        self.self_ref
            .get()
            .and_then(Weak::upgrade)
            .expect("TivBase::init_self_ref was never called")
    }

    /// Wires `child` as a listener of this node: a graph edge (this node
    /// must run before `child` within a cluster) plus a spot on this
    /// node's downstream list, so `notify_listeners` schedules `child`
    /// onto the transaction every time this node runs.
    pub fn listen(&self, child: Arc<dyn TivOps>) {
        self.runtime.link_to(self.node_id, child.node_id());
        self.downstream.lock().push(child);
    }

    /// Same wiring, but as a loop edge: both nodes are tied into one
    /// cluster with no ordering constraint instead of a DAG edge. Used
    /// to close a `CellLoop`/`StreamLoop`'s feedback edge once the real
    /// updater is known.
    pub fn listen_over_loop(&self, child: Arc<dyn TivOps>) -> Result<(), BuildError> {
        self.runtime.loop_child_to(self.node_id, child.node_id())?;
        self.downstream.lock().push(child);
        Ok(())
    }

    /// Graph edge only, no downstream scheduling: `self` depends on
    /// `parent` for ranking purposes but is not woken just because
    /// `parent` updated. `snapshot`/`gate` depend on their `Cell`
    /// argument this way.
    pub fn child_to(&self, parent: NodeId) {
        self.runtime.link_to(parent, self.node_id);
    }

    /// Schedules every registered downstream listener onto `txn`, each
    /// at its own in-cluster rank. Call from `update`/`refresh` once
    /// this node's value for the transaction has been staged.
    pub fn notify_listeners(&self, txn: &InnerTransaction) {
        for listener in self.downstream.lock().iter() {
            let cluster = self.runtime.cluster_id(listener.node_id());
            let rank = self.runtime.in_cluster_rank(listener.node_id());
            txn.register_update(listener.clone(), cluster, rank);
        }
    }

    /// Registers a callback to run with the *next* transaction's id,
    /// bypassing the graph entirely. `GlobalCellLoop` uses this so a
    /// value sampled from a cluster that would otherwise have to rank
    /// below this one instead lands a transaction late.
    pub fn global_listen(&self, txn: &InnerTransaction, hook: BeforeUpdateHook) {
        txn.register_before_update_hook(hook);
    }

    /// Registers `listener` to run every time this node stages a value,
    /// with no graph edge at all. `GlobalCellLoop::loop_` is the only
    /// caller: it wants to react to a `Cell` in another cluster without
    /// taking on a rank dependency on it.
    pub fn add_global_listener(&self, listener: Box<GlobalListener>) {
        self.global_listeners.lock().push(listener);
    }

    pub fn notify_global_listeners(&self, txn: &InnerTransaction) {
        for listener in self.global_listeners.lock().iter() {
            listener(txn);
        }
    }
}
