//! The measurement interface an engine exposes to samplers.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::flows::{FlowId, Protocol};
use crate::topology::ChannelId;
use crate::units::{BitsPerSec, Bytes, Nanosecs, Packets};

/// Queues are identified by the channel they feed.
pub type QueueId = ChannelId;

/// Identifies one direction of a transport connection. A source port of zero matches any
/// source port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FlowKey {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub protocol: Protocol,
}

impl FlowKey {
    /// This key with the source port cleared.
    pub fn any_src_port(&self) -> Self {
        Self {
            src: SocketAddrV4::new(*self.src.ip(), 0),
            ..*self
        }
    }
}

/// Cumulative counters for one flow key.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FlowCounters {
    pub key: FlowKey,
    pub tx_bytes: Bytes,
    pub rx_bytes: Bytes,
    pub first_tx: Option<Nanosecs>,
    pub last_tx: Option<Nanosecs>,
    pub first_rx: Option<Nanosecs>,
    pub last_rx: Option<Nanosecs>,
}

impl FlowCounters {
    pub fn new(key: FlowKey) -> Self {
        Self {
            key,
            tx_bytes: Bytes::ZERO,
            rx_bytes: Bytes::ZERO,
            first_tx: None,
            last_tx: None,
            first_rx: None,
            last_rx: None,
        }
    }
}

/// A read-only view of an engine's cumulative counters.
pub trait CounterSource {
    /// Every flow key the engine has seen, in no particular order.
    fn flow_counters(&self) -> Vec<FlowCounters>;

    /// The current occupancy of a transmit queue, or `None` if it does not exist.
    fn queue_len(&self, queue: QueueId) -> Option<Packets>;

    /// The sender's current congestion window, or `None` if the flow is not running.
    fn cwnd(&self, flow: FlowId) -> Option<Bytes>;
}

/// One line of the end-of-run summary.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FlowSummary {
    /// The provisioned flow this key belongs to, if any.
    pub flow: Option<FlowId>,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub tx_bytes: Bytes,
    pub rx_bytes: Bytes,
    /// Bytes sent over the time between the first and the last transmission.
    pub throughput: BitsPerSec,
}

impl FlowSummary {
    pub fn new(counters: &FlowCounters, flow: Option<FlowId>) -> Self {
        let throughput = match (counters.first_tx, counters.last_tx) {
            (Some(first), Some(last)) if last > first => {
                let secs = (last - first).into_secs_f64();
                BitsPerSec::from_f64(counters.tx_bytes.into_f64() * 8.0 / secs)
            }
            _ => BitsPerSec::ZERO,
        };
        Self {
            flow,
            src: *counters.key.src.ip(),
            dst: *counters.key.dst.ip(),
            tx_bytes: counters.tx_bytes,
            rx_bytes: counters.rx_bytes,
            throughput,
        }
    }

    /// `src dst tx_bytes rx_bytes throughput_bps`
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.src,
            self.dst,
            self.tx_bytes.into_u64(),
            self.rx_bytes.into_u64(),
            self.throughput.into_u64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Secs;

    fn key() -> FlowKey {
        FlowKey {
            src: SocketAddrV4::new(Ipv4Addr::new(10, 1, 4, 1), 49153),
            dst: SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 1), 10000),
            protocol: Protocol::Tcp,
        }
    }

    #[test]
    fn wildcard_clears_only_the_source_port() {
        let k = key().any_src_port();
        assert_eq!(k.src.port(), 0);
        assert_eq!(k.src.ip(), key().src.ip());
        assert_eq!(k.dst, key().dst);
    }

    #[test]
    fn summary_throughput_uses_tx_interval() {
        let mut c = FlowCounters::new(key());
        c.tx_bytes = Bytes::new(1_250_000);
        c.rx_bytes = Bytes::new(1_200_000);
        c.first_tx = Some(Nanosecs::ZERO);
        c.last_tx = Some(Secs::new(2).into());
        let s = FlowSummary::new(&c, Some(FlowId::ZERO));
        assert_eq!(s.throughput, BitsPerSec::new(5_000_000));
        assert_eq!(s.to_line(), "10.1.4.1 10.1.2.1 1250000 1200000 5000000");
    }

    #[test]
    fn summary_without_interval_is_zero() {
        let mut c = FlowCounters::new(key());
        c.tx_bytes = Bytes::new(1448);
        c.first_tx = Some(Secs::new(1).into());
        c.last_tx = Some(Secs::new(1).into());
        assert_eq!(FlowSummary::new(&c, None).throughput, BitsPerSec::ZERO);
    }
}
