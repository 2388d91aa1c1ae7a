//! Cluster scoping. Ported from `original_source/src/prf/cluster.hpp`'s
//! `ClusterManager`/`Cluster`, but demoted from process-wide globals to
//! state owned by a `Runtime`: construction code enters/exits clusters
//! through `Runtime::enter_cluster`, which delegates here.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::node::{ClusterId, DEFAULT_CLUSTER_ID, UNMANAGED_CLUSTER_ID};

/// Tracks the next fresh cluster id and the stack of currently-open
/// clusters for whichever thread is building the graph. A `RuntimeInner`
/// owns exactly one of these.
pub struct ClusterManager {
    next_id: AtomicU64,
    open_clusters: Mutex<Vec<ClusterId>>,
}

impl ClusterManager {
    pub fn new() -> Self {
        ClusterManager {
            // 0 is reserved for the unmanaged/sink cluster, 1 for the
            // ambient ("no scope open") ClusterId; fresh scopes start at 2.
            next_id: AtomicU64::new(2),
            open_clusters: Mutex::new(Vec::new()),
        }
    }

    pub fn next_id(&self) -> ClusterId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn current_id(&self) -> ClusterId {
        self.open_clusters
            .lock()
            .last()
            .copied()
            .unwrap_or(DEFAULT_CLUSTER_ID)
    }

    pub fn is_in_cluster(&self) -> bool {
        !self.open_clusters.lock().is_empty()
    }

    fn enter_cluster(&self, id: ClusterId) {
        self.open_clusters.lock().push(id);
    }

    fn exit_cluster(&self) {
        self.open_clusters.lock().pop();
    }

    /// Test-only: rewinds id allocation and closes any open scopes. Used
    /// by `Runtime::initialize`.
    pub(crate) fn reset(&self) {
        self.next_id.store(2, Ordering::Relaxed);
        self.open_clusters.lock().clear();
    }
}

/// RAII scope: combinators constructed while a `Cluster` guard is alive
/// are assigned to its cluster id and are free to form loop edges among
/// themselves. Dropping (or explicitly `close`ing) the guard pops the
/// scope.
pub struct Cluster<'a> {
    manager: &'a ClusterManager,
    id: ClusterId,
    closed: bool,
}

impl<'a> Cluster<'a> {
    pub(crate) fn open(manager: &'a ClusterManager) -> Self {
        let id = manager.next_id();
        manager.enter_cluster(id);
        Cluster {
            manager,
            id,
            closed: false,
        }
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub fn close(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        if !self.closed {
            self.manager.exit_cluster();
            self.closed = true;
        }
    }
}

impl<'a> Drop for Cluster<'a> {
    fn drop(&mut self) {
        self.close_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_clusters_restore_the_outer_id_on_drop() {
        let mgr = ClusterManager::new();
        assert_eq!(mgr.current_id(), DEFAULT_CLUSTER_ID);
        let outer = Cluster::open(&mgr);
        let outer_id = outer.id();
        assert_ne!(outer_id, DEFAULT_CLUSTER_ID);
        assert_eq!(mgr.current_id(), outer_id);
        {
            let inner = Cluster::open(&mgr);
            assert_eq!(mgr.current_id(), inner.id());
            assert_ne!(inner.id(), outer_id);
        }
        assert_eq!(mgr.current_id(), outer_id);
        drop(outer);
        assert_eq!(mgr.current_id(), DEFAULT_CLUSTER_ID);
    }

    #[test]
    fn explicit_close_is_equivalent_to_drop() {
        let mgr = ClusterManager::new();
        let c = Cluster::open(&mgr);
        c.close();
        assert_eq!(mgr.current_id(), DEFAULT_CLUSTER_ID);
    }

    #[test]
    fn default_ambient_cluster_differs_from_the_unmanaged_sink_cluster() {
        let mgr = ClusterManager::new();
        assert_ne!(mgr.current_id(), UNMANAGED_CLUSTER_ID);
        assert_eq!(mgr.current_id(), DEFAULT_CLUSTER_ID);
    }
}
