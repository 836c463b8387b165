use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};

use crate::topology::types::{Channel, Node, NodeId, NodeKind, Segment, SegmentId};

/// A validated network graph with one channel per direction of every segment.
#[derive(Debug, Clone)]
pub(crate) struct Graph {
    pub(crate) graph: DiGraph<Node, Channel>,
    id2idx: HashMap<NodeId, NodeIndex>,
}

impl Graph {
    /// Creates a graph from a list of nodes and segments. This function returns an error if the
    /// given nodes and segments fail to produce a valid network. The checks are not exhaustive.
    ///
    /// Correctness properties:
    ///
    /// - Every node must have a unique ID.
    /// - Every segment must have a unique ID.
    /// - Every segment must have distinct endpoints in `nodes`.
    /// - Every node must be referenced by some segment.
    /// - For any two nodes, there must be at most one segment between them.
    /// - Every host node should only have one segment.
    pub(crate) fn new(nodes: &[Node], segments: &[Segment]) -> Result<Self, GraphError> {
        let mut g = DiGraph::new();
        let mut id2idx = HashMap::new();
        for n @ Node { id, .. } in nodes.iter().cloned() {
            let idx = g.add_node(n);
            // CORRECTNESS: Every node must have a unique ID.
            if id2idx.insert(id, idx).is_some() {
                return Err(GraphError::DuplicateNodeId(id));
            }
        }
        let mut referenced_nodes = HashSet::new();
        let mut segment_ids = HashSet::new();
        for segment in segments {
            let Segment { id, a, b, .. } = *segment;
            // CORRECTNESS: Every segment must have a unique ID.
            if !segment_ids.insert(id) {
                return Err(GraphError::DuplicateSegmentId(id));
            }
            // CORRECTNESS: Every segment must have distinct endpoints in `nodes`.
            if a == b {
                return Err(GraphError::NodeAdjacentSelf(a));
            }
            let (Some(&ia), Some(&ib)) = (id2idx.get(&a), id2idx.get(&b)) else {
                let missing = if id2idx.contains_key(&a) { b } else { a };
                return Err(GraphError::UndeclaredNode(missing));
            };
            referenced_nodes.insert(a);
            referenced_nodes.insert(b);
            // Channels are unidirectional
            g.add_edge(ia, ib, Channel::new_from(segment, a, b));
            g.add_edge(ib, ia, Channel::new_from(segment, b, a));
        }
        // CORRECTNESS: Every node must be referenced by some segment.
        for &id in id2idx.keys() {
            if !referenced_nodes.contains(&id) {
                return Err(GraphError::IsolatedNode(id));
            }
        }
        for eidx in g.edge_indices() {
            let (a, b) = g
                .edge_endpoints(eidx)
                .expect("edge indices come from the graph");
            // CORRECTNESS: For any two nodes, there must be at most one segment between them.
            if g.edges_connecting(a, b).count() > 1 {
                return Err(GraphError::DuplicateSegment {
                    n1: g[a].id,
                    n2: g[b].id,
                });
            }
            // CORRECTNESS: Every host node should only have one segment.
            let Node { id, kind } = g[a];
            if matches!(kind, NodeKind::Host) {
                let nr_outgoing = g.edges(a).count();
                if nr_outgoing > 1 {
                    return Err(GraphError::TooManyHostSegments { id, n: nr_outgoing });
                }
            }
        }
        Ok(Self { graph: g, id2idx })
    }

    pub(crate) fn idx_of(&self, id: NodeId) -> Option<NodeIndex> {
        self.id2idx.get(&id).copied()
    }

    pub(crate) fn channel_between(&self, src: NodeId, dst: NodeId) -> Option<&Channel> {
        let (a, b) = (self.idx_of(src)?, self.idx_of(dst)?);
        self.graph.find_edge(a, b).map(|e| &self.graph[e])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Duplicate node ID {0}")]
    DuplicateNodeId(NodeId),

    #[error("Duplicate segment ID {0}")]
    DuplicateSegmentId(SegmentId),

    #[error("Node {0} is connected to itself")]
    NodeAdjacentSelf(NodeId),

    #[error("Node {0} is not declared")]
    UndeclaredNode(NodeId),

    #[error("Duplicate segments between {n1} and {n2}")]
    DuplicateSegment { n1: NodeId, n2: NodeId },

    #[error("Host {id} has too many segments (expected 1, got {n})")]
    TooManyHostSegments { id: NodeId, n: usize },

    #[error("Node {0} is not connected to any other node")]
    IsolatedNode(NodeId),
}
