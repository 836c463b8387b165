//! Bulk flow provisioning.
//!
//! A [`FlowProvisioner`] maps flow indices onto the hosts of a [`Topology`] and hands out one
//! [`FlowDescriptor`] per flow. [`install`] registers the matching sender and sink applications
//! with an engine.

use std::net::SocketAddrV4;

use derivative::Derivative;

use crate::config::ConfigError;
use crate::counters::FlowKey;
use crate::engine::{EngineError, NetworkEngine};
use crate::topology::{HostIface, Side, Topology};
use crate::units::Nanosecs;

identifier!(FlowId, usize);

/// Flow `i` listens on `DEFAULT_BASE_PORT + i` unless configured otherwise.
pub const DEFAULT_BASE_PORT: u16 = 10000;

/// Transport protocol of a bulk flow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Derivative, serde::Serialize, serde::Deserialize,
)]
#[derivative(Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[derivative(Default)]
    Tcp,
    Quic,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Quic => "quic",
        }
    }
}

/// Which side of the dumbbell sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Derivative, serde::Serialize, serde::Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    /// Right hosts send to left hosts.
    #[derivative(Default)]
    RightToLeft,
    /// Left hosts send to right hosts.
    LeftToRight,
}

impl Orientation {
    fn sides(&self) -> (Side, Side) {
        match self {
            Orientation::RightToLeft => (Side::Right, Side::Left),
            Orientation::LeftToRight => (Side::Left, Side::Right),
        }
    }
}

/// Overrides for one flow's active interval.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FlowTiming {
    pub start: Option<Nanosecs>,
    pub stop: Option<Nanosecs>,
}

/// One bulk transfer, from a sender on `src` to a sink on `dst`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FlowDescriptor {
    pub id: FlowId,
    pub src: HostIface,
    pub dst: HostIface,
    /// The sink's port.
    pub port: u16,
    pub protocol: Protocol,
    pub start: Nanosecs,
    pub stop: Nanosecs,
}

impl FlowDescriptor {
    /// The key under which a counter source reports this flow's data direction. The sender's
    /// port is ephemeral, so it is left as zero.
    pub fn key(&self) -> FlowKey {
        FlowKey {
            src: SocketAddrV4::new(self.src.addr, 0),
            dst: SocketAddrV4::new(self.dst.addr, self.port),
            protocol: self.protocol,
        }
    }

    /// The sink's socket address.
    pub fn sink_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.dst.addr, self.port)
    }
}

/// Assigns flows to hosts and ports.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct FlowProvisioner {
    #[builder(default = DEFAULT_BASE_PORT)]
    base_port: u16,
    #[builder(default)]
    orientation: Orientation,
    /// Per-flow overrides, indexed by flow. Missing entries use the global interval.
    #[builder(default)]
    timing: Vec<FlowTiming>,
}

impl Default for FlowProvisioner {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FlowProvisioner {
    /// Creates `flow_count` descriptors. Flow `i` sends from sender host `i % senders` to
    /// receiver host `i % receivers` on port `base_port + i`, active from `start` to `stop`
    /// unless overridden.
    pub fn provision(
        &self,
        topology: &Topology,
        flow_count: usize,
        protocol: Protocol,
        start: Nanosecs,
        stop: Nanosecs,
    ) -> Result<Vec<FlowDescriptor>, ConfigError> {
        if flow_count == 0 {
            return Err(ConfigError::NoFlows);
        }
        // CORRECTNESS: Ports must be unique, so the whole range must fit.
        if self.base_port as usize + flow_count > u16::MAX as usize + 1 {
            return Err(ConfigError::PortRangeOverflow {
                base: self.base_port,
                count: flow_count,
            });
        }
        let (tx_side, rx_side) = self.orientation.sides();
        let senders = topology.hosts(tx_side);
        let receivers = topology.hosts(rx_side);
        (0..flow_count)
            .map(|i| {
                let timing = self.timing.get(i).copied().unwrap_or_default();
                let start = timing.start.unwrap_or(start);
                let stop = timing.stop.unwrap_or(stop);
                if start >= stop {
                    return Err(ConfigError::EmptyInterval { flow: i });
                }
                Ok(FlowDescriptor {
                    id: FlowId::new(i),
                    src: senders[i % senders.len()],
                    dst: receivers[i % receivers.len()],
                    port: self.base_port + i as u16,
                    protocol,
                    start,
                    stop,
                })
            })
            .collect()
    }
}

/// Registers a bulk sender and a sink for every flow.
pub fn install<E>(flows: &[FlowDescriptor], engine: &mut E) -> Result<(), EngineError>
where
    E: NetworkEngine,
{
    for flow in flows {
        engine.install_sink(flow)?;
        engine.install_bulk_sender(flow)?;
        log::debug!(
            "Installed flow {} ({} -> {})",
            flow.id,
            flow.src.addr,
            flow.sink_addr()
        );
    }
    Ok(())
}
