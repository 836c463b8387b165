use std::net::Ipv4Addr;

use crate::link::LinkSpec;
use crate::topology::address::Subnet;
use crate::units::{BitsPerSec, Nanosecs};

identifier!(NodeId, usize);
identifier!(SegmentId, usize);

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
}

impl Node {
    pub fn new_host(id: NodeId) -> Self {
        Self {
            id,
            kind: NodeKind::Host,
        }
    }

    pub fn new_router(id: NodeId) -> Self {
        Self {
            id,
            kind: NodeKind::Router,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Host,
    Router,
}

/// Where a segment sits in a dumbbell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// The router-to-router link.
    Bottleneck,
    /// The link joining left leaf `i` to its router.
    Left(usize),
    /// The link joining right leaf `i` to its router.
    Right(usize),
}

/// A bidirectional point-to-point link with its own address block. Endpoint `a` is assigned host
/// `.1` of the block and endpoint `b` host `.2`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Segment {
    pub id: SegmentId,
    pub kind: SegmentKind,
    pub a: NodeId,
    pub b: NodeId,
    pub spec: LinkSpec,
    pub subnet: Subnet,
}

impl Segment {
    pub fn a_addr(&self) -> Ipv4Addr {
        self.subnet.host(1)
    }

    pub fn b_addr(&self) -> Ipv4Addr {
        self.subnet.host(2)
    }

    /// The address `node` holds on this segment, if it is an endpoint.
    pub fn addr_of(&self, node: NodeId) -> Option<Ipv4Addr> {
        if node == self.a {
            Some(self.a_addr())
        } else if node == self.b {
            Some(self.b_addr())
        } else {
            None
        }
    }

    pub fn connects(&self, x: NodeId, y: NodeId) -> bool {
        self.a == x && self.b == y || self.a == y && self.b == x
    }
}

/// A host's single interface, as handed out to the flow provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct HostIface {
    pub node: NodeId,
    pub addr: Ipv4Addr,
    pub segment: SegmentId,
}

/// Identifies one direction of a segment, and with it the transmit queue feeding that direction.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_new::new,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ChannelId {
    pub segment: SegmentId,
    pub src: NodeId,
}

/// A unidirectional channel. Every segment yields two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Channel {
    pub segment: SegmentId,
    pub src: NodeId,
    pub dst: NodeId,
    pub rate: BitsPerSec,
    pub delay: Nanosecs,
}

impl Channel {
    pub(crate) fn new_from(segment: &Segment, src: NodeId, dst: NodeId) -> Self {
        Self {
            segment: segment.id,
            src,
            dst,
            rate: segment.spec.rate,
            delay: segment.spec.delay,
        }
    }

    pub fn id(&self) -> ChannelId {
        ChannelId::new(self.segment, self.src)
    }
}
