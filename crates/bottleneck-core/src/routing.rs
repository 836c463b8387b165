//! Global route computation over a [`Topology`]. Routes are shortest paths by hop count; hosts
//! never forward traffic.

use std::collections::{HashMap, VecDeque};

use petgraph::{
    graph::NodeIndex,
    visit::{VisitMap, Visitable},
};

use crate::topology::{ChannelId, NodeId, NodeKind, Side, Topology};

type HopMatrix = HashMap<NodeId, HopMap>;
type HopMap = HashMap<NodeId, Vec<NodeId>>;

/// A next-hop table constructed with BFS.
#[derive(Debug, Clone)]
pub struct Routes {
    inner: HopMatrix,
}

impl Routes {
    /// Builds a routing table from a topology using BFS.
    pub fn new(topology: &Topology) -> Self {
        let g = &topology.graph().graph;
        let mut hops = HopMatrix::new();
        for start in g.node_indices() {
            let mut discovered = g.visit_map();
            discovered.visit(start);

            let mut queue = VecDeque::new();
            queue.push_back(start);

            let mut distances: HashMap<NodeIndex, usize> = [(start, 0)].into_iter().collect();

            while let Some(n) = queue.pop_front() {
                let cur_distance = distances[&n];
                for succ in g.neighbors(n) {
                    if discovered.visit(succ) {
                        distances.insert(succ, cur_distance + 1);
                        if matches!(g[succ].kind, NodeKind::Router) {
                            queue.push_back(succ);
                        }
                    }
                    // You can get from `succ` to `start` through `n`
                    if distances[&succ] == cur_distance + 1 {
                        hops.entry(g[succ].id)
                            .or_default()
                            .entry(g[start].id)
                            .or_default()
                            .push(g[n].id);
                    }
                }
            }
        }
        // Keep choices in a stable order regardless of graph iteration order
        for map in hops.values_mut() {
            for choices in map.values_mut() {
                choices.sort();
                choices.dedup();
            }
        }
        Self { inner: hops }
    }

    /// The set of next hops on shortest paths from `from` to `to`.
    pub fn next_hops(&self, from: NodeId, to: NodeId) -> Option<&[NodeId]> {
        self.inner
            .get(&from)
            .and_then(|map| map.get(&to))
            .map(|hops| hops.as_slice())
    }

    /// The channels traversed from `src` to `dst`, taking the lowest-numbered next hop whenever
    /// there is a choice. Returns `None` if `dst` is unreachable.
    pub fn path(&self, topology: &Topology, src: NodeId, dst: NodeId) -> Option<Vec<ChannelId>> {
        let mut acc = Vec::new();
        let mut cur = src;
        while cur != dst {
            let &next = self.next_hops(cur, dst)?.first()?;
            let chan = topology.channel_between(cur, next)?;
            acc.push(chan.id());
            cur = next;
        }
        Some(acc)
    }

    /// Checks that every host can reach every other host.
    pub fn ensure_reachable(&self, topology: &Topology) -> Result<(), RoutingError> {
        let hosts = topology
            .hosts(Side::Left)
            .iter()
            .chain(topology.hosts(Side::Right))
            .map(|iface| iface.node)
            .collect::<Vec<_>>();
        for &src in &hosts {
            for &dst in &hosts {
                if src != dst && self.path(topology, src, dst).is_none() {
                    return Err(RoutingError::Unreachable { src, dst });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no route from node {src} to node {dst}")]
    Unreachable { src: NodeId, dst: NodeId },
}
