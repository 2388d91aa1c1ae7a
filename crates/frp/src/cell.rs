//! State-kind combinators. Ported from `original_source/src/prf/cell.hpp`:
//! a `Cell<T>` always has a current value, sampled with [`Cell::sample`].
//! `CellSink` is the unmanaged-cluster entry point applications call
//! `send` on; `CellLoop`/`GlobalCellLoop` are the two ways to close a
//! feedback edge, in-cluster and cross-cluster respectively.

use std::sync::Arc;

use parking_lot::Mutex;

use frp_core::{
    current_transaction, BuildError, InnerTransaction, NodeId, Runtime, TivKind, TivOps,
    Transaction, ValueStore, UNMANAGED_CLUSTER_ID,
};

use crate::base::TivBase;

type Recompute<T> = dyn Fn(&InnerTransaction) -> Option<T> + Send + Sync;

type OutsideListener<T> = dyn Fn(&T) + Send + Sync;

pub(crate) struct CellInternal<T: Clone + Send + Sync + 'static> {
    pub(crate) base: TivBase,
    pub(crate) store: ValueStore<T>,
    recompute: Mutex<Option<Box<Recompute<T>>>>,
    looped: Mutex<bool>,
    outside_listeners: Mutex<Vec<Box<OutsideListener<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> CellInternal<T> {
    fn wrap(base: TivBase, store: ValueStore<T>, recompute: Option<Box<Recompute<T>>>) -> Arc<Self> {
        let internal = Arc::new(CellInternal {
            base,
            store,
            recompute: Mutex::new(recompute),
            looped: Mutex::new(false),
            outside_listeners: Mutex::new(Vec::new()),
        });
        let dyn_arc: Arc<dyn TivOps> = internal.clone();
        internal.base.init_self_ref(&dyn_arc);
        internal
    }

    /// Always starts valueless, even when the caller eventually wants the
    /// new cell to carry a literal initial value (`hold`, `CellSink`):
    /// a derived cell's recompute may depend on a parent that is itself
    /// valueless until the build-time throwaway transaction runs, so
    /// sampling anything at construction time is unsound. Literal initial
    /// values are seeded by an after-build hook instead (see
    /// `Runtime::after_build`).
    pub(crate) fn new_derived(runtime: &Runtime, recompute: Box<Recompute<T>>) -> Arc<Self> {
        Self::wrap(TivBase::new(runtime), ValueStore::new(TivKind::State, None), Some(recompute))
    }

    fn new_sink(runtime: &Runtime) -> Arc<Self> {
        Self::wrap(
            TivBase::new_in_cluster(runtime, UNMANAGED_CLUSTER_ID),
            ValueStore::new(TivKind::State, None),
            None,
        )
    }

    fn new_loop(runtime: &Runtime) -> Arc<Self> {
        Self::wrap(TivBase::new(runtime), ValueStore::new(TivKind::State, None), None)
    }

    fn node_id(&self) -> NodeId {
        self.base.node_id()
    }
}

impl<T: Clone + Send + Sync + 'static> TivOps for CellInternal<T> {
    fn node_id(&self) -> NodeId {
        self.base.node_id()
    }

    fn update(&self, txn: &InnerTransaction) {
        let produced = {
            let recompute = self.recompute.lock();
            recompute.as_ref().and_then(|f| f(txn))
        };
        // Every node the executor scheduled must pass through cleanup,
        // even one whose recompute had nothing new to stage: that is
        // what makes `ValueStore::refresh`'s weakened no-op correct
        // rather than merely convenient.
        txn.register_cleanup(self.base.self_arc());
        if let Some(value) = produced {
            self.store.set(txn.id(), value);
            self.base.notify_listeners(txn);
            self.base.notify_global_listeners(txn);
        }
    }

    fn refresh(&self, txn_id: u64) {
        self.store.refresh(txn_id);
    }

    /// Delivers to outside listeners: runs before `refresh`, so it still
    /// sees this transaction's staged value rather than whatever
    /// `refresh` leaves behind.
    fn finalize(&self, txn_id: u64) {
        if let Some(value) = self.store.sample_at(txn_id) {
            for listener in self.outside_listeners.lock().iter() {
                listener(&value);
            }
        }
    }
}

/// A value that always has a current reading. Cheap to clone: every
/// handle shares the same underlying node.
pub struct Cell<T: Clone + Send + Sync + 'static> {
    pub(crate) internal: Arc<CellInternal<T>>,
    pub(crate) runtime: Runtime,
}

impl<T: Clone + Send + Sync + 'static> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Cell {
            internal: self.internal.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Cell<T> {
    pub(crate) fn from_internal(internal: Arc<CellInternal<T>>, runtime: Runtime) -> Self {
        Cell { internal, runtime }
    }

    pub fn node_id(&self) -> NodeId {
        self.internal.node_id()
    }

    /// The cell's value as of the most recently completed transaction.
    /// Only meaningful after `Runtime::build` has run: that's what seeds
    /// every sink/hold/loop and cascades the seed through any `map`/
    /// `lift` chain built on top of it. Sampling before `build()`, or a
    /// `Cell` with no seeded ancestor at all, is a graph-construction
    /// bug, not something callers can recover from.
    pub fn sample(&self) -> T {
        self.internal.store.sample().unwrap_or_else(|| {
            frp_core::fatal!("{}", frp_core::BuildError::RequiredValueMissing)
        })
    }

    /// Subscribes `f` to every value this cell takes on. Unlike `map`,
    /// this adds no node to the graph: `f` runs directly out of this
    /// cell's own `finalize`, the same transaction it changes in, once
    /// the whole transaction's values are durable but before `refresh`
    /// rolls them forward.
    pub fn listen<F>(&self, f: F) -> crate::Listener
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.internal.outside_listeners.lock().push(Box::new(f));
        crate::Listener::new()
    }

    pub fn map<U, F>(&self, f: F) -> Cell<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let parent = self.internal.clone();
        let internal = CellInternal::new_derived(
            &self.runtime,
            Box::new(move |txn| parent.store.sample_at(txn.id()).as_ref().map(&f)),
        );
        self.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
        Cell::from_internal(internal, self.runtime.clone())
    }
}

/// Combines two cells into a third, recomputed from both whenever
/// either fires. Ported from `cell::lift`'s two-argument overload.
pub fn lift2<A, B, C, F>(a: &Cell<A>, b: &Cell<B>, f: F) -> Cell<C>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    F: Fn(&A, &B) -> C + Send + Sync + 'static,
{
    let pa = a.internal.clone();
    let pb = b.internal.clone();
    let internal = CellInternal::new_derived(
        &a.runtime,
        Box::new(move |txn| {
            match (pa.store.sample_at(txn.id()), pb.store.sample_at(txn.id())) {
                (Some(x), Some(y)) => Some(f(&x, &y)),
                _ => None,
            }
        }),
    );
    a.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
    b.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
    Cell::from_internal(internal, a.runtime.clone())
}

/// Combines three cells. Ported from `cell::lift`'s three-argument
/// overload; arities above three are out of scope (see module docs).
pub fn lift3<A, B, C, D, F>(a: &Cell<A>, b: &Cell<B>, c: &Cell<C>, f: F) -> Cell<D>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    D: Clone + Send + Sync + 'static,
    F: Fn(&A, &B, &C) -> D + Send + Sync + 'static,
{
    let pa = a.internal.clone();
    let pb = b.internal.clone();
    let pc = c.internal.clone();
    let internal = CellInternal::new_derived(
        &a.runtime,
        Box::new(move |txn| {
            match (
                pa.store.sample_at(txn.id()),
                pb.store.sample_at(txn.id()),
                pc.store.sample_at(txn.id()),
            ) {
                (Some(x), Some(y), Some(z)) => Some(f(&x, &y, &z)),
                _ => None,
            }
        }),
    );
    a.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
    b.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
    c.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
    Cell::from_internal(internal, a.runtime.clone())
}

/// The unmanaged-cluster entry point: application code calls [`CellSink::send`]
/// to push a new value, opening (or joining) a transaction to do it.
pub struct CellSink<T: Clone + Send + Sync + 'static> {
    internal: Arc<CellInternal<T>>,
    runtime: Runtime,
}

impl<T: Clone + Send + Sync + 'static> CellSink<T> {
    /// Ported from `CellInternal(cluster_id, initial_value)`'s
    /// after-build-hook path: the sink itself has no value until
    /// `Runtime::build` runs every registered hook inside its throwaway
    /// root transaction, so the seed goes through the same
    /// `send`-shaped path a real `send` call would take rather than
    /// being poked into the store directly.
    pub fn new(runtime: &Runtime, initial: T) -> Self {
        let internal = CellInternal::new_sink(runtime);
        let hook_internal = internal.clone();
        runtime.after_build(Box::new(move || {
            let txn = current_transaction()
                .expect("after-build hooks run inside build()'s throwaway root transaction");
            hook_internal.store.set(txn.id(), initial);
            txn.register_cleanup(hook_internal.base.self_arc());
            hook_internal.base.notify_listeners(&txn);
            hook_internal.base.notify_global_listeners(&txn);
        }));
        CellSink {
            internal,
            runtime: runtime.clone(),
        }
    }

    pub fn as_cell(&self) -> Cell<T> {
        Cell::from_internal(self.internal.clone(), self.runtime.clone())
    }

    pub fn send(&self, value: T) -> Result<(), BuildError> {
        let scope = Transaction::new(&self.runtime)?;
        let txn = current_transaction().expect("Transaction::new always opens a transaction");
        self.internal.store.set(txn.id(), value);
        txn.register_cleanup(self.internal.base.self_arc());
        self.internal.base.notify_listeners(&txn);
        self.internal.base.notify_global_listeners(&txn);
        scope.get_join_handler().join();
        Ok(())
    }
}

/// Forward-declares a cell whose recompute logic is supplied later via
/// [`CellLoop::loop_`], letting a combinator depend on its own eventual
/// output. The loop edge keeps both nodes in one cluster; closing it
/// more than once is a build-time error.
pub struct CellLoop<T: Clone + Send + Sync + 'static> {
    internal: Arc<CellInternal<T>>,
    runtime: Runtime,
}

impl<T: Clone + Send + Sync + 'static> CellLoop<T> {
    pub fn new(runtime: &Runtime) -> Self {
        CellLoop {
            internal: CellInternal::new_loop(runtime),
            runtime: runtime.clone(),
        }
    }

    pub fn as_cell(&self) -> Cell<T> {
        Cell::from_internal(self.internal.clone(), self.runtime.clone())
    }

    /// Ties this placeholder's value to `target`'s: from here on, every
    /// transaction in which `target` updates, this cell copies its new
    /// value in the same transaction. No eager sample of `target` here —
    /// ported from `CellLoop::loop`'s replacement `CellInternal`, which
    /// takes a plain updater and no initial value at all: `target` is
    /// commonly itself derived from this very loop, so it may still be
    /// valueless when `loop_` is called, and only gets populated once a
    /// real transaction runs its recompute chain.
    pub fn loop_(&self, target: &Cell<T>) -> Result<(), BuildError> {
        let mut looped = self.internal.looped.lock();
        if *looped {
            return Err(BuildError::AlreadyLooped);
        }
        *looped = true;
        drop(looped);

        let source = target.internal.clone();
        *self.internal.recompute.lock() = Some(Box::new(move |txn| source.store.sample_at(txn.id())));
        target
            .internal
            .base
            .listen_over_loop(self.internal.clone() as Arc<dyn TivOps>)
    }
}

/// The cross-cluster feedback primitive. Ported from `cell::loop_`'s
/// global variant: rather than a graph edge (which would force an
/// illegal cluster-rank cycle), `sampled`'s value is captured the
/// moment it fires and written into this cell's store one transaction
/// later, via the executor's before-update-hook staging area.
pub struct GlobalCellLoop<T: Clone + Send + Sync + 'static> {
    internal: Arc<CellInternal<T>>,
    runtime: Runtime,
}

impl<T: Clone + Send + Sync + 'static> GlobalCellLoop<T> {
    pub fn new(runtime: &Runtime) -> Self {
        GlobalCellLoop {
            internal: CellInternal::new_loop(runtime),
            runtime: runtime.clone(),
        }
    }

    pub fn as_cell(&self) -> Cell<T> {
        Cell::from_internal(self.internal.clone(), self.runtime.clone())
    }

    pub fn loop_<F>(&self, sampled: &Cell<T>, initial: T, f: F) -> Result<(), BuildError>
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        let mut looped = self.internal.looped.lock();
        if *looped {
            return Err(BuildError::AlreadyLooped);
        }
        *looped = true;
        drop(looped);

        let hook_internal = self.internal.clone();
        self.runtime.after_build(Box::new(move || {
            let txn = current_transaction()
                .expect("after-build hooks run inside build()'s throwaway root transaction");
            hook_internal.store.set(txn.id(), initial);
            txn.register_cleanup(hook_internal.base.self_arc());
            hook_internal.base.notify_listeners(&txn);
            hook_internal.base.notify_global_listeners(&txn);
        }));

        let source = sampled.internal.clone();
        let target = self.internal.clone();
        sampled.internal.base.add_global_listener(Box::new(move |txn: &InnerTransaction| {
            let Some(value) = source.store.sample_at(txn.id()) else {
                return;
            };
            let settled_at = txn.id();
            let target = target.clone();
            let next_value = f(value);
            // Wire the deferred write exactly like a real `send` would —
            // stage the value, register for cleanup, notify this cell's
            // own downstream listeners — but key the stage under the
            // transaction that actually produced `next_value` (`txn`,
            // captured as `settled_at`), not the next transaction the
            // hook happens to run against. The value is logically
            // current as of the end of `txn`; staging it under the next
            // transaction's id instead would make it indistinguishable
            // from a write made *during* that transaction's own update
            // pass, which `Cell::sample_before` must treat as not yet
            // visible to a same-transaction `snapshot`/`gate` read.
            txn.register_before_update_hook(Box::new(move |next_txn: &Arc<InnerTransaction>| {
                target.store.set(settled_at, next_value);
                next_txn.register_cleanup(target.base.self_arc());
                target.base.notify_listeners(next_txn);
                target.base.notify_global_listeners(next_txn);
            }));
        }));
        Ok(())
    }
}
