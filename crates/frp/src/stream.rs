//! Event-kind combinators. Ported from `original_source/src/prf/stream.hpp`:
//! a `Stream<T>` carries at most one value per transaction and nothing
//! between transactions, unlike `Cell<T>`. `snapshot`/`gate` depend on a
//! `Cell` argument via [`TivBase::child_to`] rather than [`TivBase::listen`]:
//! they react to the stream firing and merely *read* the cell as of that
//! transaction, they are not woken by the cell changing on its own.

use std::sync::Arc;

use parking_lot::Mutex;

use frp_core::{
    current_transaction, BuildError, InnerTransaction, NodeId, Runtime, TivKind, TivOps,
    Transaction, ValueStore, UNMANAGED_CLUSTER_ID,
};

use crate::base::TivBase;
use crate::cell::{Cell, CellInternal};

type Recompute<T> = dyn Fn(&InnerTransaction) -> Option<T> + Send + Sync;
type OutsideListener<T> = dyn Fn(&T) + Send + Sync;

pub(crate) struct StreamInternal<T: Clone + Send + Sync + 'static> {
    base: TivBase,
    store: ValueStore<T>,
    recompute: Mutex<Option<Box<Recompute<T>>>>,
    looped: Mutex<bool>,
    outside_listeners: Mutex<Vec<Box<OutsideListener<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> StreamInternal<T> {
    fn wrap(base: TivBase, recompute: Option<Box<Recompute<T>>>) -> Arc<Self> {
        let internal = Arc::new(StreamInternal {
            base,
            store: ValueStore::new(TivKind::Event, None),
            recompute: Mutex::new(recompute),
            looped: Mutex::new(false),
            outside_listeners: Mutex::new(Vec::new()),
        });
        let dyn_arc: Arc<dyn TivOps> = internal.clone();
        internal.base.init_self_ref(&dyn_arc);
        internal
    }

    fn new_derived(runtime: &Runtime, recompute: Box<Recompute<T>>) -> Arc<Self> {
        Self::wrap(TivBase::new(runtime), Some(recompute))
    }

    fn new_sink(runtime: &Runtime) -> Arc<Self> {
        Self::wrap(TivBase::new_in_cluster(runtime, UNMANAGED_CLUSTER_ID), None)
    }

    fn new_loop(runtime: &Runtime) -> Arc<Self> {
        Self::wrap(TivBase::new(runtime), None)
    }

    fn node_id(&self) -> NodeId {
        self.base.node_id()
    }
}

impl<T: Clone + Send + Sync + 'static> TivOps for StreamInternal<T> {
    fn node_id(&self) -> NodeId {
        self.base.node_id()
    }

    fn update(&self, txn: &InnerTransaction) {
        let produced = {
            let recompute = self.recompute.lock();
            recompute.as_ref().and_then(|f| f(txn))
        };
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

    /// Delivers to outside listeners: runs before `refresh` drops this
    /// transaction's fired value.
    fn finalize(&self, txn_id: u64) {
        if let Some(value) = self.store.sample_at(txn_id) {
            for listener in self.outside_listeners.lock().iter() {
                listener(&value);
            }
        }
    }
}

/// A sparse event source: fires at most once per transaction, with no
/// value held between transactions. Cheap to clone.
pub struct Stream<T: Clone + Send + Sync + 'static> {
    pub(crate) internal: Arc<StreamInternal<T>>,
    pub(crate) runtime: Runtime,
}

impl<T: Clone + Send + Sync + 'static> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Stream {
            internal: self.internal.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Stream<T> {
    pub(crate) fn from_internal(internal: Arc<StreamInternal<T>>, runtime: Runtime) -> Self {
        Stream { internal, runtime }
    }

    pub fn node_id(&self) -> NodeId {
        self.internal.node_id()
    }

    /// Subscribes `f` to every value this stream fires. Unlike `map`,
    /// this adds no node to the graph: `f` runs directly out of this
    /// stream's own `finalize`, the same transaction it fires in, once
    /// the whole transaction's values are durable but before `refresh`
    /// drops them.
    pub fn listen<F>(&self, f: F) -> crate::Listener
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.internal.outside_listeners.lock().push(Box::new(f));
        crate::Listener::new()
    }

    pub fn map<U, F>(&self, f: F) -> Stream<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let parent = self.internal.clone();
        let internal = StreamInternal::new_derived(
            &self.runtime,
            Box::new(move |txn| parent.store.sample_at(txn.id()).as_ref().map(&f)),
        );
        self.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
        Stream::from_internal(internal, self.runtime.clone())
    }

    pub fn filter<F>(&self, pred: F) -> Stream<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let parent = self.internal.clone();
        let internal = StreamInternal::new_derived(
            &self.runtime,
            Box::new(move |txn| parent.store.sample_at(txn.id()).filter(|v| pred(v))),
        );
        self.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
        Stream::from_internal(internal, self.runtime.clone())
    }

    /// Fires whenever either input fires. If both fire in the same
    /// transaction, `f` combines them; otherwise the stream that fired
    /// passes through unchanged. Ported from `stream.hpp`'s `merge`
    /// three-way branch (`v1 && v2` combine, else whichever is present),
    /// written as an explicit `match` instead of the original's
    /// implicit-fallthrough `if`/`if`/`return` chain.
    pub fn merge<F>(&self, other: &Stream<T>, f: F) -> Stream<T>
    where
        F: Fn(&T, &T) -> T + Send + Sync + 'static,
    {
        let pa = self.internal.clone();
        let pb = other.internal.clone();
        let internal = StreamInternal::new_derived(
            &self.runtime,
            Box::new(move |txn| {
                match (pa.store.sample_at(txn.id()), pb.store.sample_at(txn.id())) {
                    (Some(a), Some(b)) => Some(f(&a, &b)),
                    (Some(a), None) => Some(a),
                    (None, Some(b)) => Some(b),
                    (None, None) => None,
                }
            }),
        );
        self.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
        other.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
        Stream::from_internal(internal, self.runtime.clone())
    }

    /// `merge` with a pick-left combinator: fires with `self`'s value,
    /// or `other`'s if `self` didn't fire this transaction.
    pub fn or_else(&self, other: &Stream<T>) -> Stream<T> {
        self.merge(other, |a, _b| a.clone())
    }

    /// Fires with this stream's value only in transactions where `gate`
    /// reads `true` *as of the start of this transaction*. Depends on
    /// `gate` via `child_to`: reading it does not by itself schedule this
    /// stream, and reading it with [`ValueStore::sample_before`] rather
    /// than `sample_at` means a simultaneous write to `gate` itself is not
    /// observed until the transaction after this one fires.
    pub fn gate(&self, gate: &Cell<bool>) -> Stream<T> {
        let parent = self.internal.clone();
        let gate_cell = gate.internal.clone();
        let internal = StreamInternal::new_derived(
            &self.runtime,
            Box::new(move |txn| {
                let fired = parent.store.sample_at(txn.id())?;
                if gate_cell.store.sample_before(txn.id()).unwrap_or(false) {
                    Some(fired)
                } else {
                    None
                }
            }),
        );
        self.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
        internal.base.child_to(gate.node_id());
        Stream::from_internal(internal, self.runtime.clone())
    }

    /// Turns this stream into a cell that holds the last fired value,
    /// starting at `initial` until the first firing. Ported from
    /// `stream.hpp`'s `hold`, whose returned `CellInternal` is the
    /// initial-value-carrying constructor: the seed goes through an
    /// after-build hook rather than straight into the store, same as
    /// `CellSink`.
    pub fn hold(&self, initial: T) -> Cell<T> {
        let parent = self.internal.clone();
        let internal = CellInternal::new_derived(
            &self.runtime,
            Box::new(move |txn| parent.store.sample_at(txn.id())),
        );
        self.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
        let hook_internal = internal.clone();
        self.runtime.after_build(Box::new(move || {
            let txn = current_transaction()
                .expect("after-build hooks run inside build()'s throwaway root transaction");
            hook_internal.store.set(txn.id(), initial);
            txn.register_cleanup(hook_internal.base.self_arc());
            hook_internal.base.notify_listeners(&txn);
            hook_internal.base.notify_global_listeners(&txn);
        }));
        Cell::from_internal(internal, self.runtime.clone())
    }

    /// Fires with `f` applied to this stream's value and `cell`'s value
    /// as of the *start* of this transaction. Ported from
    /// `stream::snapshot`'s one-cell overload: `cell` is a `child_to`, not
    /// a `listen` — this stream firing is what drives it, not `cell`
    /// changing — and its value is read with `sample_before` rather than
    /// `sample_at` so a cell write made in this same transaction (a
    /// simultaneous sink send, a `GlobalCellLoop` feedback write) is not
    /// observed until the next transaction.
    pub fn snapshot<A, C, F>(&self, cell: &Cell<A>, f: F) -> Stream<C>
    where
        A: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
        F: Fn(&T, &A) -> C + Send + Sync + 'static,
    {
        let parent = self.internal.clone();
        let snap = cell.internal.clone();
        let internal = StreamInternal::new_derived(
            &self.runtime,
            Box::new(move |txn| {
                let fired = parent.store.sample_at(txn.id())?;
                let current = snap.store.sample_before(txn.id())?;
                Some(f(&fired, &current))
            }),
        );
        self.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
        internal.base.child_to(cell.node_id());
        Stream::from_internal(internal, self.runtime.clone())
    }

    pub fn snapshot2<A, B, C, F>(&self, a: &Cell<A>, b: &Cell<B>, f: F) -> Stream<C>
    where
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
        F: Fn(&T, &A, &B) -> C + Send + Sync + 'static,
    {
        let parent = self.internal.clone();
        let sa = a.internal.clone();
        let sb = b.internal.clone();
        let internal = StreamInternal::new_derived(
            &self.runtime,
            Box::new(move |txn| {
                let fired = parent.store.sample_at(txn.id())?;
                let va = sa.store.sample_before(txn.id())?;
                let vb = sb.store.sample_before(txn.id())?;
                Some(f(&fired, &va, &vb))
            }),
        );
        self.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
        internal.base.child_to(a.node_id());
        internal.base.child_to(b.node_id());
        Stream::from_internal(internal, self.runtime.clone())
    }

    pub fn snapshot3<A, B, C, D, F>(&self, a: &Cell<A>, b: &Cell<B>, c: &Cell<C>, f: F) -> Stream<D>
    where
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
        D: Clone + Send + Sync + 'static,
        F: Fn(&T, &A, &B, &C) -> D + Send + Sync + 'static,
    {
        let parent = self.internal.clone();
        let sa = a.internal.clone();
        let sb = b.internal.clone();
        let sc = c.internal.clone();
        let internal = StreamInternal::new_derived(
            &self.runtime,
            Box::new(move |txn| {
                let fired = parent.store.sample_at(txn.id())?;
                let va = sa.store.sample_before(txn.id())?;
                let vb = sb.store.sample_before(txn.id())?;
                let vc = sc.store.sample_before(txn.id())?;
                Some(f(&fired, &va, &vb, &vc))
            }),
        );
        self.internal.base.listen(internal.clone() as Arc<dyn TivOps>);
        internal.base.child_to(a.node_id());
        internal.base.child_to(b.node_id());
        internal.base.child_to(c.node_id());
        Stream::from_internal(internal, self.runtime.clone())
    }
}

/// The unmanaged-cluster entry point for events: application code calls
/// [`StreamSink::send`] to fire a new value.
pub struct StreamSink<T: Clone + Send + Sync + 'static> {
    internal: Arc<StreamInternal<T>>,
    runtime: Runtime,
}

impl<T: Clone + Send + Sync + 'static> StreamSink<T> {
    pub fn new(runtime: &Runtime) -> Self {
        StreamSink {
            internal: StreamInternal::new_sink(runtime),
            runtime: runtime.clone(),
        }
    }

    pub fn as_stream(&self) -> Stream<T> {
        Stream::from_internal(self.internal.clone(), self.runtime.clone())
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

/// Forward-declares a stream whose recompute logic is supplied later via
/// [`StreamLoop::loop_`]. Asserts (at the `BuildError::AlreadyLooped`
/// level) that it is looped at most once, same as `CellLoop`.
pub struct StreamLoop<T: Clone + Send + Sync + 'static> {
    internal: Arc<StreamInternal<T>>,
    runtime: Runtime,
}

impl<T: Clone + Send + Sync + 'static> StreamLoop<T> {
    pub fn new(runtime: &Runtime) -> Self {
        StreamLoop {
            internal: StreamInternal::new_loop(runtime),
            runtime: runtime.clone(),
        }
    }

    pub fn as_stream(&self) -> Stream<T> {
        Stream::from_internal(self.internal.clone(), self.runtime.clone())
    }

    pub fn loop_(&self, target: &Stream<T>) -> Result<(), BuildError> {
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
