//! Scheduling policy: decides, from the mirrored state of every
//! in-flight transaction, which cluster to update next and when a
//! transaction is done. Ported in shape from
//! `original_source/src/prf/planner.hpp`/`planner.cpp` (`PlannerManager`,
//! `Planner`, `SimplePlanner`): a background "strategy" thread is
//! restarted every time the mirrored state changes, reads a snapshot,
//! and posts at most a few decisions back to the executor before
//! exiting. `RankBasedPlanner` has no counterpart in the original
//! source — it implements the rank-gated parallel scheduling the
//! original only ever described as a future direction, not a strategy
//! it shipped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::executor::Executor;
use crate::node::ClusterId;
use crate::rank::Rank;

#[derive(Default)]
pub struct TransactionUpdate {
    pub now: Vec<ClusterId>,
    pub future: Vec<ClusterId>,
    pub finish: Vec<ClusterId>,
}

impl TransactionUpdate {
    pub fn now(now: Vec<ClusterId>) -> Self {
        TransactionUpdate {
            now,
            ..Default::default()
        }
    }

    pub fn future(future: Vec<ClusterId>) -> Self {
        TransactionUpdate {
            future,
            ..Default::default()
        }
    }
}

struct TransactionState {
    now: HashSet<ClusterId>,
    future: HashSet<ClusterId>,
}

pub enum Strategy {
    /// One transaction at a time, one cluster at a time: the front
    /// (oldest still-open) transaction's lowest-ranked pending cluster,
    /// and only once nothing else in it is mid-update.
    Simple,
    /// Every transaction's lowest-ranked pending cluster may start as
    /// soon as no cluster ranked below it is still mid-update anywhere,
    /// in any transaction.
    RankBased,
}

/// Mirrors executor-reported transaction state and periodically decides
/// what the executor should do next. Not itself the thing that runs
/// work — `Executor::run_loop` does that — this only posts
/// start-update/finalize requests back to it.
pub struct PlannerManager {
    transactions: Mutex<HashMap<u64, TransactionState>>,
    order: Mutex<VecDeque<u64>>,
    cluster_ranks: Vec<Rank>,
    strategy: Strategy,
    executor: Mutex<Option<Weak<Executor>>>,
    generation: AtomicU64,
}

impl PlannerManager {
    pub fn new(cluster_ranks: Vec<Rank>, strategy: Strategy) -> Arc<Self> {
        Arc::new(PlannerManager {
            transactions: Mutex::new(HashMap::new()),
            order: Mutex::new(VecDeque::new()),
            cluster_ranks,
            strategy,
            executor: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    pub fn attach_executor(&self, executor: Weak<Executor>) {
        *self.executor.lock() = Some(executor);
    }

    pub fn on_transaction_started(self: &Arc<Self>, txn_id: u64, future: Vec<ClusterId>) {
        self.transactions.lock().insert(
            txn_id,
            TransactionState {
                now: HashSet::new(),
                future: future.into_iter().collect(),
            },
        );
        self.order.lock().push_back(txn_id);
        self.replan();
    }

    pub fn on_transaction_updated(self: &Arc<Self>, txn_id: u64, update: TransactionUpdate) {
        if let Some(state) = self.transactions.lock().get_mut(&txn_id) {
            for c in update.now {
                state.now.insert(c);
            }
            for c in update.future {
                state.future.insert(c);
            }
            for c in update.finish {
                state.now.remove(&c);
            }
        }
        self.replan();
    }

    pub fn on_transaction_finished(self: &Arc<Self>, txn_id: u64) {
        self.transactions.lock().remove(&txn_id);
        self.order.lock().retain(|id| *id != txn_id);
        self.replan();
    }

    fn rank_of(&self, cluster: ClusterId) -> Rank {
        self.cluster_ranks
            .get(cluster as usize)
            .copied()
            .unwrap_or_else(Rank::new)
    }

    /// Bumps the generation (stale strategy runs check this and bail
    /// out early rather than act on a snapshot that no longer matches
    /// reality) and spawns a fresh strategy thread over the current
    /// snapshot.
    fn replan(self: &Arc<Self>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();
        std::thread::spawn(move || this.run_strategy(generation));
    }

    fn run_strategy(&self, generation: u64) {
        let Some(executor) = self.executor.lock().as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let order: Vec<u64> = self.order.lock().iter().copied().collect();

        match self.strategy {
            Strategy::Simple => self.plan_simple(&executor, &order, generation),
            Strategy::RankBased => self.plan_rank_based(&executor, &order, generation),
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn plan_simple(&self, executor: &Arc<Executor>, order: &[u64], generation: u64) {
        let Some(&front) = order.first() else { return };
        if self.is_stale(generation) {
            return;
        }
        let transactions = self.transactions.lock();
        let Some(state) = transactions.get(&front) else { return };

        if !state.now.is_empty() {
            return;
        }
        if let Some(&next) = state
            .future
            .iter()
            .min_by_key(|c| self.rank_of(**c))
        {
            drop(transactions);
            executor.request_start_update(front, next);
        } else {
            drop(transactions);
            executor.request_finalize(front);
        }
    }

    /// Walks transactions oldest-first, tracking the lowest cluster rank
    /// any older transaction has in flight (`target_rank`) and which
    /// clusters at that rank are already claimed (`used_clusters`). A
    /// younger transaction may only start a cluster ranked at or above
    /// `target_rank`, and only the head transaction may ever be
    /// finalized — finalizing a younger transaction first would violate
    /// the total order on `finalize` that `PlannerManager::FinishTransaction`
    /// relies on the executor enforcing.
    fn plan_rank_based(&self, executor: &Arc<Executor>, order: &[u64], generation: u64) {
        if self.is_stale(generation) {
            return;
        }
        let transactions = self.transactions.lock();

        let mut target_rank: Option<Rank> = None;
        let mut used_clusters: HashSet<ClusterId> = HashSet::new();
        let mut to_start = Vec::new();
        let mut to_finalize = None;

        let lower = |target_rank: &mut Option<Rank>, used: &mut HashSet<ClusterId>, r: Rank| match *target_rank {
            Some(tr) if r < tr => {
                *target_rank = Some(r);
                used.clear();
            }
            None => *target_rank = Some(r),
            _ => {}
        };

        for (idx, &txn_id) in order.iter().enumerate() {
            let Some(state) = transactions.get(&txn_id) else { continue };

            for &c in &state.now {
                lower(&mut target_rank, &mut used_clusters, self.rank_of(c));
                used_clusters.insert(c);
            }

            for &c in &state.future {
                if used_clusters.contains(&c) {
                    continue;
                }
                let rank = self.rank_of(c);
                if target_rank.map_or(false, |tr| rank > tr) {
                    continue;
                }
                to_start.push((txn_id, c));
                lower(&mut target_rank, &mut used_clusters, rank);
                used_clusters.insert(c);
            }

            if idx == 0 && state.now.is_empty() && state.future.is_empty() {
                to_finalize = Some(txn_id);
            }
        }
        drop(transactions);

        for (txn_id, cluster) in to_start {
            executor.request_start_update(txn_id, cluster);
        }
        if let Some(txn_id) = to_finalize {
            executor.request_finalize(txn_id);
        }
    }
}
