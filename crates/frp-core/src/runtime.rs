//! The `Runtime` handle. Per the design notes' re-architecture guidance,
//! this replaces the original's process-wide globals (`clusterManager`,
//! `nodeManager`, `executor`, `PlannerManager::instance`) with state owned
//! by an explicit, `Clone`-cheap handle that combinator constructors in
//! the `frp` crate carry around. The thread-local "current transaction"
//! in `transaction.rs` remains global, per the same guidance: a `send`
//! inside an update must attach to the ongoing transaction regardless of
//! which `Runtime` it belongs to.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cluster::{Cluster, ClusterManager};
use crate::error::BuildError;
use crate::executor::Executor;
use crate::node::{ClusterId, NodeId, NodeManager};
use crate::planner::{PlannerManager, Strategy};
use crate::rank::Rank;
use crate::transaction::{self, InnerTransaction, JoinHandler, Transaction};

/// Thread-pool sizing and planner-strategy selection, read once at
/// `build()`. Mirrors `ConcurrencyLevelManager::new(concurrency_level,
/// ...)`'s explicit parameterization rather than process-global state.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// `None` defers to `ThreadPool::create_suitable_pool`'s
    /// `max(num_cpus::get(), 4)` rule.
    pub pool_size: Option<usize>,
    pub use_parallel_execution: bool,
}

enum BuildState {
    Building,
    Built {
        executor: Arc<Executor>,
        #[allow(dead_code)]
        planner: Arc<PlannerManager>,
    },
}

struct RuntimeInner {
    node_manager: Mutex<NodeManager>,
    cluster_manager: ClusterManager,
    after_build_hooks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    state: Mutex<BuildState>,
}

/// Cheap-to-clone handle shared by every combinator built against one
/// dataflow graph. A program normally owns exactly one `Runtime`; tests
/// create fresh ones freely instead of relying on `initialize()`.
#[derive(Clone)]
pub struct Runtime(Arc<RuntimeInner>);

impl Runtime {
    pub fn new() -> Self {
        Runtime(Arc::new(RuntimeInner {
            node_manager: Mutex::new(NodeManager::new()),
            cluster_manager: ClusterManager::new(),
            after_build_hooks: Mutex::new(Vec::new()),
            state: Mutex::new(BuildState::Building),
        }))
    }

    pub fn register_node(&self, cluster_id: ClusterId) -> NodeId {
        self.0.node_manager.lock().register_node(cluster_id)
    }

    pub fn link_to(&self, parent: NodeId, child: NodeId) {
        self.0.node_manager.lock().link_to(parent, child);
    }

    pub fn loop_child_to(&self, a: NodeId, b: NodeId) -> Result<(), BuildError> {
        self.0.node_manager.lock().loop_child_to(a, b)
    }

    pub fn cluster_id(&self, node: NodeId) -> ClusterId {
        self.0.node_manager.lock().cluster_id(node)
    }

    pub fn in_cluster_rank(&self, node: NodeId) -> Rank {
        self.0.node_manager.lock().in_cluster_rank(node)
    }

    /// The cluster combinators constructed right now should record
    /// themselves under: whichever `Cluster` scope is innermost, or the
    /// unmanaged sink cluster if none is open.
    pub fn current_cluster_id(&self) -> ClusterId {
        self.0.cluster_manager.current_id()
    }

    /// Opens a named cluster scope. Combinators constructed while the
    /// returned guard is alive share its cluster id and may form loop
    /// edges among themselves.
    pub fn enter_cluster(&self, name: impl Into<String>) -> Cluster<'_> {
        let guard = Cluster::open(&self.0.cluster_manager);
        self.0
            .node_manager
            .lock()
            .register_cluster_name(guard.id(), name.into());
        guard
    }

    /// Queues a one-shot initializer to run inside the throwaway root
    /// transaction `build()` opens after wiring the engine up. Used by
    /// `Cell`-kind constructors that carry an initial value.
    pub fn after_build(&self, hook: Box<dyn FnOnce() + Send>) {
        self.0.after_build_hooks.lock().push(hook);
    }

    pub fn is_built(&self) -> bool {
        matches!(*self.0.state.lock(), BuildState::Built { .. })
    }

    /// Re-partitions the graph into clusters, ranks them, and starts the
    /// planner/executor pair. Must be called exactly once, after every
    /// combinator has been constructed and before any `send`.
    pub fn build(&self, config: RuntimeConfig) -> Result<(), BuildError> {
        if self.is_built() {
            return Err(BuildError::BuildCalledTwice);
        }
        self.0.node_manager.lock().build()?;

        let (cluster_ranks, cluster_names) = {
            let node_manager = self.0.node_manager.lock();
            (
                node_manager.cluster_ranks().to_vec(),
                node_manager.cluster_names().clone(),
            )
        };
        let strategy = if config.use_parallel_execution {
            Strategy::RankBased
        } else {
            Strategy::Simple
        };
        let planner = PlannerManager::new(cluster_ranks, strategy);
        let pool_size = config.pool_size.unwrap_or_else(|| {
            num_cpus::get().max(crate::pool::MINIMUM_NUMBER_OF_THREADS_ON_AUTOMATIC)
        });
        let executor = Executor::new(pool_size, planner.clone(), cluster_names);
        planner.attach_executor(Arc::downgrade(&executor));
        executor.start();

        *self.0.state.lock() = BuildState::Built {
            executor: executor.clone(),
            planner,
        };

        let hooks = std::mem::take(&mut *self.0.after_build_hooks.lock());
        if !hooks.is_empty() {
            tracing::debug!(count = hooks.len(), "running after-build hooks");
            let txn = Transaction::new(self)?;
            for hook in hooks {
                hook();
            }
            txn.get_join_handler().join();
        }
        Ok(())
    }

    pub fn submit_transaction(&self, inner: Arc<InnerTransaction>) -> JoinHandler {
        match &*self.0.state.lock() {
            BuildState::Built { executor, .. } => executor.submit_transaction(inner),
            BuildState::Building => {
                crate::fatal!("a transaction was submitted before build() was called")
            }
        }
    }

    /// Sets the global stop-flag, wakes the planner and executor queues,
    /// and waits for their background threads to exit.
    pub fn stop_execution(&self) {
        let executor = match &*self.0.state.lock() {
            BuildState::Built { executor, .. } => Some(executor.clone()),
            BuildState::Building => None,
        };
        if let Some(executor) = executor {
            executor.stop();
        }
    }

    /// Resets every piece of state this handle owns, including
    /// transaction-id allocation. Intended for test suites that reuse one
    /// `Runtime` across cases rather than constructing a fresh one.
    pub fn initialize(&self) {
        self.stop_execution();
        *self.0.node_manager.lock() = NodeManager::new();
        self.0.cluster_manager.reset();
        self.0.after_build_hooks.lock().clear();
        *self.0.state.lock() = BuildState::Building;
        transaction::reset_transaction_ids();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
