//! The single point where transactions actually run. Ported from
//! `original_source/src/prf/executor.hpp`/`executor.cpp`: a message loop
//! fed by a `ConcurrentQueue`, driving each transaction's clusters
//! through the thread pool in planner-directed order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::node::ClusterId;
use crate::planner::{PlannerManager, TransactionUpdate};
use crate::pool::ThreadPool;
use crate::queue::{ConcurrentQueue, Waiter};
use crate::transaction::{BeforeUpdateHook, InnerTransaction, JoinHandler};

enum ExecutorMessage {
    Submit {
        txn: Arc<InnerTransaction>,
        waiter: Arc<Waiter>,
    },
    StartUpdateCluster { txn_id: u64, cluster: ClusterId },
    Finalize { txn_id: u64 },
}

struct TransactionBookkeeping {
    txn: Arc<InnerTransaction>,
    waiter: Arc<Waiter>,
    updating: HashSet<ClusterId>,
}

/// Owns the single message loop a `Runtime` drives all transaction
/// scheduling through.
///
/// `pending_before_update_hooks` is the executor-global staging area for
/// `GlobalCellLoop`-style feedback: hooks discovered while a transaction
/// runs are buffered on that transaction's root and only moved here once
/// the transaction finalizes (see the `Finalize` arm below); they are
/// drained and applied — passed the *new* transaction's id — the moment
/// the next `Submit` arrives, before that transaction's clusters are
/// published to the planner. This is what lets `GlobalCellLoop` commit a
/// sampled value one transaction late instead of within the transaction
/// that sampled it.
pub struct Executor {
    queue: Arc<ConcurrentQueue<ExecutorMessage>>,
    pool: Mutex<ThreadPool>,
    transactions: Mutex<HashMap<u64, TransactionBookkeeping>>,
    planner: Arc<PlannerManager>,
    cluster_names: HashMap<ClusterId, String>,
    loop_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    started: AtomicBool,
    pending_before_update_hooks: Mutex<Vec<BeforeUpdateHook>>,
}

impl Executor {
    pub fn new(pool_size: usize, planner: Arc<PlannerManager>, cluster_names: HashMap<ClusterId, String>) -> Arc<Self> {
        Arc::new(Executor {
            queue: Arc::new(ConcurrentQueue::new()),
            pool: Mutex::new(ThreadPool::new(pool_size)),
            transactions: Mutex::new(HashMap::new()),
            planner,
            cluster_names,
            loop_thread: Mutex::new(None),
            started: AtomicBool::new(false),
            pending_before_update_hooks: Mutex::new(Vec::new()),
        })
    }

    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let handle = std::thread::Builder::new()
            .name("frp-executor".into())
            .spawn(move || this.run_loop())
            .expect("failed to spawn executor thread");
        *self.loop_thread.lock() = Some(handle);
    }

    pub fn submit_transaction(self: &Arc<Self>, txn: Arc<InnerTransaction>) -> JoinHandler {
        let waiter = Waiter::new();
        self.queue.push(ExecutorMessage::Submit {
            txn,
            waiter: waiter.clone(),
        });
        JoinHandler::new(waiter)
    }

    fn post_start_update(&self, txn_id: u64, cluster: ClusterId) {
        self.queue.push(ExecutorMessage::StartUpdateCluster { txn_id, cluster });
    }

    fn post_finalize(&self, txn_id: u64) {
        self.queue.push(ExecutorMessage::Finalize { txn_id });
    }

    fn run_loop(self: Arc<Self>) {
        while let Some(message) = self.queue.pop() {
            match message {
                ExecutorMessage::Submit { txn, waiter } => {
                    let txn_id = txn.id();
                    let hooks = std::mem::take(&mut *self.pending_before_update_hooks.lock());
                    for hook in hooks {
                        hook(&txn);
                    }
                    let targets = txn.target_clusters();
                    tracing::debug!(txn_id, ?targets, "transaction submitted");
                    self.transactions.lock().insert(
                        txn_id,
                        TransactionBookkeeping {
                            txn,
                            waiter,
                            updating: HashSet::new(),
                        },
                    );
                    self.planner.on_transaction_started(txn_id, targets.clone());
                    self.planner
                        .on_transaction_updated(txn_id, TransactionUpdate::future(targets));
                }
                ExecutorMessage::StartUpdateCluster { txn_id, cluster } => {
                    let already_updating = {
                        let mut txns = self.transactions.lock();
                        match txns.get_mut(&txn_id) {
                            Some(bookkeeping) if !bookkeeping.updating.contains(&cluster) => {
                                bookkeeping.updating.insert(cluster);
                                false
                            }
                            _ => true,
                        }
                    };
                    if already_updating {
                        continue;
                    }
                    let this = self.clone();
                    self.pool.lock().request(move || {
                        this.planner
                            .on_transaction_updated(txn_id, TransactionUpdate::now(vec![cluster]));

                        let root = {
                            let txns = this.transactions.lock();
                            txns.get(&txn_id).map(|b| b.txn.clone())
                        };
                        let Some(root) = root else { return };
                        let Some(sub) = root.generate_sub_transaction(cluster) else {
                            return;
                        };

                        let result = sub.execute();
                        let discovered = root.register_execution_result(result);

                        this.planner.on_transaction_updated(
                            txn_id,
                            TransactionUpdate {
                                now: Vec::new(),
                                future: discovered,
                                finish: vec![cluster],
                            },
                        );
                    });
                }
                ExecutorMessage::Finalize { txn_id } => {
                    let bookkeeping = self.transactions.lock().remove(&txn_id);
                    let Some(bookkeeping) = bookkeeping else {
                        // Finalize messages can double-fire if a planner
                        // strategy is restarted mid-flight; dropping the
                        // duplicate is correct and silent, matching the
                        // original's "drop unknown transaction" guard.
                        continue;
                    };
                    bookkeeping.txn.finalize();
                    self.pending_before_update_hooks
                        .lock()
                        .extend(bookkeeping.txn.take_before_update_hooks());
                    bookkeeping.waiter.complete();
                    self.planner.on_transaction_finished(txn_id);
                }
            }
        }
    }

    pub fn cluster_name(&self, cluster: ClusterId) -> Option<&str> {
        self.cluster_names.get(&cluster).map(String::as_str)
    }

    pub fn request_start_update(&self, txn_id: u64, cluster: ClusterId) {
        self.post_start_update(txn_id, cluster);
    }

    pub fn request_finalize(&self, txn_id: u64) {
        self.post_finalize(txn_id);
    }

    pub fn stop(&self) {
        self.queue.notify_stop();
        if let Some(handle) = self.loop_thread.lock().take() {
            let _ = handle.join();
        }
        self.pool.lock().stop();
    }
}
