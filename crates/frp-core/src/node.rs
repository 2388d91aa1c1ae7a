//! The dataflow graph and its offline re-clustering/ranking pass.
//! Ported from `original_source/src/prf/node.hpp` + `node.cpp`, reworked
//! per the design notes onto an arena: `Node`s live in one `Vec` owned by
//! `NodeManager` and are addressed by the `NodeId` handle rather than a
//! raw pointer.

use std::collections::{HashMap, HashSet};

use crate::error::BuildError;
use crate::rank::Rank;

pub type ClusterId = u64;

/// Sink-kind values (`CellSink`, `StreamSink`) and user-created
/// `Transaction`s are all rooted at this cluster id. Changing this value
/// is not safe: the re-clustering pass assumes 0 is the sink cluster.
pub const UNMANAGED_CLUSTER_ID: ClusterId = 0;

/// Every combinator constructed with no `Cluster` scope open lands here
/// instead of `UNMANAGED_CLUSTER_ID`. Ported from `clusterManager`'s
/// static initializers (`global_current_id = 1`): the ambient cluster is
/// a real, schedulable cluster distinct from the sink cluster, not "no
/// cluster". Conflating the two would mean a sink's own listeners, when
/// built with no explicit scope, share the sink's cluster id and get
/// queued onto the *root* transaction's own in-cluster queue instead of
/// `targets_outside_current_cluster` — a queue nothing ever drains,
/// since only subtransactions (bound to a real, non-root cluster) call
/// `execute()`.
pub const DEFAULT_CLUSTER_ID: ClusterId = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

struct Node {
    cluster_id: ClusterId,
    in_cluster_rank: Rank,
    children: Vec<NodeId>,
    loop_children: Vec<NodeId>,
    same_clusters: Vec<NodeId>,
}

impl Node {
    fn new(cluster_id: ClusterId) -> Self {
        Node {
            cluster_id,
            in_cluster_rank: Rank::new(),
            children: Vec::new(),
            loop_children: Vec::new(),
            same_clusters: Vec::new(),
        }
    }
}

/// Owns the node arena, performs the build-time re-clustering/ranking
/// pass, and exposes the read-only results afterwards.
pub struct NodeManager {
    nodes: Vec<Node>,
    cluster_ranks: Vec<Rank>,
    cluster_names: HashMap<ClusterId, String>,
    built: bool,
}

impl NodeManager {
    pub fn new() -> Self {
        NodeManager {
            nodes: Vec::new(),
            cluster_ranks: Vec::new(),
            cluster_names: HashMap::new(),
            built: false,
        }
    }

    pub fn register_node(&mut self, cluster_id: ClusterId) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(cluster_id));
        id
    }

    pub fn register_cluster_name(&mut self, cluster_id: ClusterId, name: String) {
        self.cluster_names.insert(cluster_id, name);
    }

    pub fn cluster_id(&self, node: NodeId) -> ClusterId {
        self.nodes[node.index()].cluster_id
    }

    pub fn in_cluster_rank(&self, node: NodeId) -> Rank {
        self.nodes[node.index()].in_cluster_rank
    }

    /// `other.link_to(this)`: `other` gains `this` as a data-dependency
    /// child, i.e. `other` must run before `this` within a cluster.
    pub fn link_to(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.index()].children.push(child);
    }

    /// `other.loop_child_to(this)`: ties the two nodes into the same
    /// cluster with no ordering constraint. Fatal if they currently
    /// disagree on cluster id.
    pub fn loop_child_to(&mut self, a: NodeId, b: NodeId) -> Result<(), BuildError> {
        if self.nodes[a.index()].cluster_id != self.nodes[b.index()].cluster_id {
            return Err(BuildError::LoopCrossesClusters);
        }
        self.nodes[a.index()].same_clusters.push(b);
        self.nodes[b.index()].same_clusters.push(a);
        self.nodes[a.index()].loop_children.push(b);
        Ok(())
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn cluster_ranks(&self) -> &[Rank] {
        &self.cluster_ranks
    }

    pub fn cluster_names(&self) -> &HashMap<ClusterId, String> {
        &self.cluster_names
    }

    pub fn build(&mut self) -> Result<(), BuildError> {
        if self.nodes.is_empty() {
            return Err(BuildError::EmptyGraph);
        }
        if self.built {
            return Err(BuildError::BuildCalledTwice);
        }
        self.built = true;

        self.split_cluster_by_associates();
        self.generate_cluster_ranks();
        self.generate_in_cluster_ranks();
        Ok(())
    }

    /// Step 1 of the build: re-partition nodes into final clusters via
    /// union-find over child edges restricted to matching tentative
    /// cluster ids, plus the symmetric closure of loop edges, plus
    /// unification of all sink-origin nodes. Renumbers components so the
    /// sink component keeps (or is swapped into) id 0.
    fn split_cluster_by_associates(&mut self) {
        let n = self.nodes.len();
        let mut uf = UnionFind::new(n);

        for i in 0..n {
            let parent_cluster = self.nodes[i].cluster_id;
            for &child in &self.nodes[i].children.clone() {
                if parent_cluster == self.nodes[child.index()].cluster_id {
                    uf.union(i, child.index());
                }
            }
        }
        for i in 0..n {
            for &sc in &self.nodes[i].same_clusters.clone() {
                uf.union(i, sc.index());
            }
        }

        let mut sink_repr: Option<usize> = None;
        for i in 0..n {
            if self.nodes[i].cluster_id == UNMANAGED_CLUSTER_ID {
                match sink_repr {
                    Some(r) => uf.union(i, r),
                    None => sink_repr = Some(i),
                }
            }
        }

        let mut root_to_new: HashMap<usize, ClusterId> = HashMap::new();
        for i in 0..n {
            let root = uf.find(i);
            let next = root_to_new.len() as ClusterId;
            root_to_new.entry(root).or_insert(next);
        }

        let mut mapped_names: HashMap<ClusterId, String> = HashMap::new();
        for i in 0..n {
            let new_id = root_to_new[&uf.find(i)];
            let old_name = self
                .cluster_names
                .get(&self.nodes[i].cluster_id)
                .cloned()
                .unwrap_or_default();
            mapped_names
                .entry(new_id)
                .or_insert_with(|| if old_name.is_empty() { "NO_NAME".to_string() } else { old_name });
            self.nodes[i].cluster_id = new_id;
        }

        if let Some(sink_repr) = sink_repr {
            let sink_id = root_to_new[&uf.find(sink_repr)];
            if sink_id != UNMANAGED_CLUSTER_ID {
                let sink_name = mapped_names.remove(&sink_id);
                let unmanaged_name = mapped_names.remove(&UNMANAGED_CLUSTER_ID);
                if let Some(v) = unmanaged_name {
                    mapped_names.insert(sink_id, v);
                }
                if let Some(v) = sink_name {
                    mapped_names.insert(UNMANAGED_CLUSTER_ID, v);
                }
                for node in &mut self.nodes {
                    node.cluster_id = if node.cluster_id == sink_id {
                        UNMANAGED_CLUSTER_ID
                    } else if node.cluster_id == UNMANAGED_CLUSTER_ID {
                        sink_id
                    } else {
                        node.cluster_id
                    };
                }
            }
        } else {
            tracing::info!("no sink-kind values were registered in this graph");
        }

        self.cluster_names = mapped_names;
    }

    /// Step 2: project child edges onto the cluster graph (dropping
    /// edges whose endpoints now share a cluster — those aren't cluster
    /// edges, they're in-cluster edges handled by step 3) and relax
    /// ranks along a topological walk from the roots.
    fn generate_cluster_ranks(&mut self) {
        let max_id = self.nodes.iter().map(|n| n.cluster_id).max().unwrap_or(0);
        let num_clusters = (max_id + 1) as usize;
        self.cluster_ranks = vec![Rank::new(); num_clusters];

        let mut children: Vec<HashSet<ClusterId>> = vec![HashSet::new(); num_clusters];
        let mut parents: Vec<HashSet<ClusterId>> = vec![HashSet::new(); num_clusters];

        for node in &self.nodes {
            let this_id = node.cluster_id;
            for &child in &node.children {
                let child_id = self.nodes[child.index()].cluster_id;
                if child_id == this_id {
                    continue;
                }
                children[this_id as usize].insert(child_id);
                parents[child_id as usize].insert(this_id);
            }
        }

        let mut worklist: Vec<ClusterId> = (0..num_clusters as ClusterId)
            .filter(|&c| parents[c as usize].is_empty())
            .collect();

        while let Some(updating) = worklist.pop() {
            let these_children: Vec<ClusterId> = children[updating as usize].iter().copied().collect();
            for &child in &these_children {
                let (rank_parent, mut rank_child) = (
                    self.cluster_ranks[updating as usize],
                    self.cluster_ranks[child as usize],
                );
                rank_parent.ensure_after(&mut rank_child);
                self.cluster_ranks[child as usize] = rank_child;
            }
            for &child in &these_children {
                parents[child as usize].remove(&updating);
                if parents[child as usize].is_empty() {
                    worklist.push(child);
                }
            }
        }
    }

    /// Step 3: identical relaxation, restricted to edges whose endpoints
    /// already share a cluster.
    fn generate_in_cluster_ranks(&mut self) {
        let n = self.nodes.len();
        let mut children: Vec<HashSet<usize>> = vec![HashSet::new(); n];
        let mut parents: Vec<HashSet<usize>> = vec![HashSet::new(); n];

        for i in 0..n {
            for &child in &self.nodes[i].children {
                if self.nodes[i].cluster_id != self.nodes[child.index()].cluster_id {
                    continue;
                }
                children[i].insert(child.index());
                parents[child.index()].insert(i);
            }
        }

        let mut worklist: Vec<usize> = (0..n).filter(|&i| parents[i].is_empty()).collect();

        while let Some(updating) = worklist.pop() {
            let these_children: Vec<usize> = children[updating].iter().copied().collect();
            for &child in &these_children {
                let parent_rank = self.nodes[updating].in_cluster_rank;
                let mut child_rank = self.nodes[child].in_cluster_rank;
                parent_rank.ensure_after(&mut child_rank);
                self.nodes[child].in_cluster_rank = child_rank;
            }
            for &child in &these_children {
                parents[child].remove(&updating);
                if parents[child].is_empty() {
                    worklist.push(child);
                }
            }
        }
    }
}

/// Standard disjoint-set with path compression and union by size.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_nodes_in_one_cluster_get_increasing_in_cluster_rank() {
        let mut mgr = NodeManager::new();
        let a = mgr.register_node(1);
        let b = mgr.register_node(1);
        let c = mgr.register_node(1);
        mgr.link_to(a, b);
        mgr.link_to(b, c);
        mgr.build().unwrap();

        assert!(mgr.in_cluster_rank(a) < mgr.in_cluster_rank(b));
        assert!(mgr.in_cluster_rank(b) < mgr.in_cluster_rank(c));
    }

    #[test]
    fn cross_cluster_edge_orders_cluster_ranks() {
        let mut mgr = NodeManager::new();
        let sink = mgr.register_node(UNMANAGED_CLUSTER_ID);
        let a = mgr.register_node(1);
        let b = mgr.register_node(2);
        mgr.link_to(sink, a);
        mgr.link_to(a, b);
        mgr.build().unwrap();

        let ranks = mgr.cluster_ranks();
        assert!(ranks[mgr.cluster_id(sink) as usize] < ranks[mgr.cluster_id(a) as usize]);
        assert!(ranks[mgr.cluster_id(a) as usize] < ranks[mgr.cluster_id(b) as usize]);
    }

    #[test]
    fn a_cluster_with_internal_edges_still_ranks_correctly_against_its_children() {
        // Regression case for the self-loop the original C++ cluster-rank
        // projection would introduce: a multi-node cluster with an
        // internal child edge must not prevent its true cross-cluster
        // children from outranking it.
        let mut mgr = NodeManager::new();
        let sink = mgr.register_node(UNMANAGED_CLUSTER_ID);
        let a1 = mgr.register_node(1);
        let a2 = mgr.register_node(1);
        let b = mgr.register_node(2);
        mgr.link_to(sink, a1);
        mgr.link_to(a1, a2); // internal to cluster 1
        mgr.link_to(a2, b); // crosses to cluster 2
        mgr.build().unwrap();

        let ranks = mgr.cluster_ranks();
        assert!(ranks[mgr.cluster_id(a1) as usize] < ranks[mgr.cluster_id(b) as usize]);
    }

    #[test]
    fn sink_nodes_unify_to_cluster_zero() {
        let mut mgr = NodeManager::new();
        let s1 = mgr.register_node(UNMANAGED_CLUSTER_ID);
        let s2 = mgr.register_node(UNMANAGED_CLUSTER_ID);
        mgr.build().unwrap();
        assert_eq!(mgr.cluster_id(s1), UNMANAGED_CLUSTER_ID);
        assert_eq!(mgr.cluster_id(s2), UNMANAGED_CLUSTER_ID);
    }

    #[test]
    fn sink_component_is_swapped_into_zero_when_numbering_moves_it() {
        let mut mgr = NodeManager::new();
        // Register a non-sink cluster first so naive numbering would
        // land the sink component on id 1, not 0.
        let a = mgr.register_node(5);
        let sink = mgr.register_node(UNMANAGED_CLUSTER_ID);
        mgr.link_to(sink, a);
        mgr.build().unwrap();
        assert_eq!(mgr.cluster_id(sink), UNMANAGED_CLUSTER_ID);
    }

    #[test]
    fn loop_edge_across_clusters_is_fatal() {
        let mut mgr = NodeManager::new();
        let a = mgr.register_node(1);
        let b = mgr.register_node(2);
        assert_eq!(mgr.loop_child_to(a, b), Err(BuildError::LoopCrossesClusters));
    }

    #[test]
    fn build_twice_is_an_error() {
        let mut mgr = NodeManager::new();
        mgr.register_node(UNMANAGED_CLUSTER_ID);
        mgr.build().unwrap();
        assert_eq!(mgr.build(), Err(BuildError::BuildCalledTwice));
    }

    #[test]
    fn build_on_empty_graph_is_an_error() {
        let mut mgr = NodeManager::new();
        assert_eq!(mgr.build(), Err(BuildError::EmptyGraph));
    }
}
