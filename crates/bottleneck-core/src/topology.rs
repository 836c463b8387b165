//! Dumbbell topology generation.
//!
//! A [`DumbbellSpec`] describes a dumbbell with `left_count` hosts behind router A,
//! `right_count` hosts behind router B, and one bottleneck segment between the routers.
//! [`DumbbellSpec::build`] turns it into a fully addressed [`Topology`].

pub mod address;
pub(crate) mod graph;
pub mod types;

use std::fmt::Write;
use std::net::Ipv4Addr;

use crate::config::ConfigError;
use crate::link::{EdgeLinks, LinkSpec};

pub use address::{Subnet, DEFAULT_ADDRESS_BASE};
pub use graph::GraphError;
pub use types::*;

use self::address::AddressAllocator;
use self::graph::Graph;

/// Which side of the dumbbell a leaf is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Parameters for a dumbbell topology.
#[derive(Debug, Clone, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
pub struct DumbbellSpec {
    /// Number of hosts behind router A.
    pub left_count: usize,
    /// Number of hosts behind router B.
    pub right_count: usize,
    /// The router-to-router link.
    pub bottleneck: LinkSpec,
    /// Links between left hosts and router A.
    #[builder(setter(into))]
    pub left_links: EdgeLinks,
    /// Links between right hosts and router B.
    #[builder(setter(into))]
    pub right_links: EdgeLinks,
    /// Require a one-to-one mapping between left and right hosts.
    #[builder(default)]
    #[serde(default)]
    pub symmetric: bool,
    /// The first address block; later blocks follow consecutively.
    #[builder(default = DEFAULT_ADDRESS_BASE)]
    #[serde(default = "default_address_base")]
    pub address_base: Ipv4Addr,
}

fn default_address_base() -> Ipv4Addr {
    DEFAULT_ADDRESS_BASE
}

impl DumbbellSpec {
    /// Builds the topology. Routers get node IDs 0 (A) and 1 (B), followed by the left hosts and
    /// then the right hosts. Address blocks are allocated to the bottleneck segment first, then
    /// to each left segment, then to each right segment, so identical parameters always yield
    /// identical addressing.
    pub fn build(&self) -> Result<Topology, TopologyError> {
        let (left_specs, right_specs) = self.validate()?;
        let (ra, rb) = (NodeId::new(0), NodeId::new(1));
        let left_ids = (0..self.left_count)
            .map(|i| NodeId::new(2 + i))
            .collect::<Vec<_>>();
        let right_ids = (0..self.right_count)
            .map(|i| NodeId::new(2 + self.left_count + i))
            .collect::<Vec<_>>();
        let nodes = [Node::new_router(ra), Node::new_router(rb)]
            .into_iter()
            .chain(left_ids.iter().map(|&id| Node::new_host(id)))
            .chain(right_ids.iter().map(|&id| Node::new_host(id)))
            .collect::<Vec<_>>();

        let mut alloc = AddressAllocator::new(self.address_base)?;
        let mut segments = Vec::with_capacity(1 + self.left_count + self.right_count);
        let mut push = |kind: SegmentKind,
                        a: NodeId,
                        b: NodeId,
                        spec: LinkSpec|
         -> Result<(), ConfigError> {
            segments.push(Segment {
                id: SegmentId::new(segments.len()),
                kind,
                a,
                b,
                spec,
                subnet: alloc.allocate()?,
            });
            Ok(())
        };
        push(SegmentKind::Bottleneck, ra, rb, self.bottleneck)?;
        for (i, (&host, spec)) in left_ids.iter().zip(left_specs).enumerate() {
            push(SegmentKind::Left(i), host, ra, spec)?;
        }
        for (i, (&host, spec)) in right_ids.iter().zip(right_specs).enumerate() {
            push(SegmentKind::Right(i), host, rb, spec)?;
        }

        let graph = Graph::new(&nodes, &segments)?;
        let iface = |segment: &Segment| HostIface {
            node: segment.a,
            addr: segment.a_addr(),
            segment: segment.id,
        };
        let left = segments[1..=self.left_count].iter().map(iface).collect();
        let right = segments[1 + self.left_count..].iter().map(iface).collect();
        Ok(Topology {
            routers: [ra, rb],
            left,
            right,
            segments,
            graph,
        })
    }

    fn validate(&self) -> Result<(Vec<LinkSpec>, Vec<LinkSpec>), ConfigError> {
        if self.left_count == 0 {
            return Err(ConfigError::ZeroLeafCount(Side::Left));
        }
        if self.right_count == 0 {
            return Err(ConfigError::ZeroLeafCount(Side::Right));
        }
        // CORRECTNESS: A one-to-one flow mapping must not be silently truncated.
        if self.symmetric && self.left_count != self.right_count {
            return Err(ConfigError::AsymmetricLeaves {
                left: self.left_count,
                right: self.right_count,
            });
        }
        self.bottleneck.validate()?;
        let left = self.left_links.resolve(self.left_count)?;
        let right = self.right_links.resolve(self.right_count)?;
        Ok((left, right))
    }
}

/// Builds a dumbbell with the given leaf counts and links. Equivalent to filling a
/// [`DumbbellSpec`] with default addressing and no symmetry requirement.
pub fn build(
    left_count: usize,
    right_count: usize,
    bottleneck: LinkSpec,
    left: impl Into<EdgeLinks>,
    right: impl Into<EdgeLinks>,
) -> Result<Topology, TopologyError> {
    DumbbellSpec::builder()
        .left_count(left_count)
        .right_count(right_count)
        .bottleneck(bottleneck)
        .left_links(left)
        .right_links(right)
        .build()
        .build()
}

/// A fully addressed dumbbell.
#[derive(Debug, Clone)]
pub struct Topology {
    routers: [NodeId; 2],
    left: Vec<HostIface>,
    right: Vec<HostIface>,
    segments: Vec<Segment>,
    graph: Graph,
}

impl Topology {
    /// Router A (left) and router B (right).
    pub fn routers(&self) -> [NodeId; 2] {
        self.routers
    }

    pub fn left(&self, i: usize) -> Option<&HostIface> {
        self.left.get(i)
    }

    pub fn right(&self, i: usize) -> Option<&HostIface> {
        self.right.get(i)
    }

    pub fn hosts(&self, side: Side) -> &[HostIface] {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// The router that leaves on `side` attach to.
    pub fn router(&self, side: Side) -> NodeId {
        match side {
            Side::Left => self.routers[0],
            Side::Right => self.routers[1],
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id.inner())
    }

    pub fn bottleneck(&self) -> &Segment {
        // The bottleneck is always allocated first
        &self.segments[0]
    }

    /// The bottleneck transmit queue on the router that leaves on `side` send through.
    pub fn bottleneck_egress(&self, side: Side) -> ChannelId {
        ChannelId::new(self.bottleneck().id, self.router(side))
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        let segment = self.segment(id.segment)?;
        let dst = if segment.a == id.src {
            segment.b
        } else if segment.b == id.src {
            segment.a
        } else {
            return None;
        };
        self.graph.channel_between(id.src, dst)
    }

    pub fn channel_between(&self, src: NodeId, dst: NodeId) -> Option<&Channel> {
        self.graph.channel_between(src, dst)
    }

    /// The address of `node` on its first segment. Hosts have exactly one.
    pub fn addr_of(&self, node: NodeId) -> Option<Ipv4Addr> {
        self.segments.iter().find_map(|s| s.addr_of(node))
    }

    pub(crate) fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Renders the topology as text: a header line, one line per node, then one line per
    /// segment with its block, endpoint addresses, rate and delay.
    pub fn to_snapshot(&self) -> String {
        let mut s = String::new();
        // First line: node #, router #, segment #
        writeln!(
            s,
            "{} {} {}",
            self.nr_nodes(),
            self.routers.len(),
            self.segments.len()
        )
        .unwrap();
        for node in self.nodes() {
            let kind = match node.kind {
                NodeKind::Host => "host",
                NodeKind::Router => "router",
            };
            writeln!(s, "{} {kind}", node.id).unwrap();
        }
        // id kind a b subnet a_addr b_addr rate delay
        for seg in &self.segments {
            let kind = match seg.kind {
                SegmentKind::Bottleneck => "bottleneck".to_owned(),
                SegmentKind::Left(i) => format!("left{i}"),
                SegmentKind::Right(i) => format!("right{i}"),
            };
            writeln!(
                s,
                "{} {kind} {} {} {} {} {} {} {}",
                seg.id,
                seg.a,
                seg.b,
                seg.subnet,
                seg.a_addr(),
                seg.b_addr(),
                seg.spec.rate,
                seg.spec.delay
            )
            .unwrap();
        }
        s
    }

    delegate::delegate! {
        to self.graph.graph {
            #[call(node_weights)]
            pub fn nodes(&self) -> impl Iterator<Item = &Node>;

            #[call(edge_weights)]
            pub fn channels(&self) -> impl Iterator<Item = &Channel>;

            #[call(node_count)]
            pub fn nr_nodes(&self) -> usize;
        }

        to self.segments {
            #[call(len)]
            pub fn nr_segments(&self) -> usize;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("invalid topology parameters")]
    Config(#[from] ConfigError),

    #[error("invalid network graph")]
    Graph(#[from] GraphError),
}
