//! An in-process engine that models bulk transfers as fluids.
//!
//! Harness callbacks run from a discrete-event [`Scheduler`]. Between callbacks the network is
//! integrated in fixed steps:
//!
//! - every active flow offers `cwnd / rtt` bytes per second, where `rtt` is its base RTT plus the
//!   queueing delay on its path;
//! - every directed channel queues `arrival - capacity` bytes per second, up to its limit;
//! - a channel with a backlog forwards at capacity, and each flow gets its share of that;
//! - windows grow exponentially until the first loss, then by one segment per RTT, and halve
//!   (at most once per RTT) when a queue on the path overflows.

use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};

use bottleneck_core::{
    config::{QueueConfig, StackConfig},
    counters::{CounterSource, FlowCounters, FlowKey, QueueId},
    engine::{Callback, Engine, EngineError, NetworkEngine, Scheduler},
    flows::{FlowDescriptor, FlowId},
    routing::{Routes, RoutingError},
    topology::{ChannelId, Topology},
    units::{Bytes, Millisecs, Nanosecs, Packets},
};
use rustc_hash::{FxHashMap, FxHashSet};

#[cfg(test)]
mod tests;

/// TCP/IP header bytes carried by every segment.
pub const HEADER_BYTES: u64 = 52;

/// The first ephemeral port handed to senders.
pub const EPHEMERAL_PORT_BASE: u16 = 49153;

/// A fluid-model network engine.
#[derive(typed_builder::TypedBuilder)]
pub struct FluidEngine {
    /// The integration step.
    #[builder(default = Millisecs::new(1).into(), setter(into))]
    step: Nanosecs,
    #[builder(default, setter(skip))]
    now: Nanosecs,
    #[builder(default, setter(skip))]
    scheduler: Scheduler<FluidEngine>,
    #[builder(default, setter(skip))]
    stack: StackConfig,
    #[builder(default, setter(skip))]
    queue: QueueConfig,
    #[builder(default, setter(skip))]
    topology: Option<Topology>,
    #[builder(default, setter(skip))]
    routes: Option<Routes>,
    #[builder(default, setter(skip))]
    queues: FxHashMap<ChannelId, FluidQueue>,
    #[builder(default, setter(skip))]
    flows: Vec<FluidFlow>,
    #[builder(default, setter(skip))]
    sinks: FxHashSet<SocketAddrV4>,
    #[builder(default, setter(skip))]
    pcap_dir: Option<PathBuf>,
}

impl Default for FluidEngine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for FluidEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FluidEngine")
            .field("now", &self.now)
            .field("step", &self.step)
            .field("scheduler", &self.scheduler)
            .field("flows", &self.flows.len())
            .field("queues", &self.queues.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
struct FluidQueue {
    /// Payload bytes per second.
    capacity: f64,
    /// Bytes.
    limit: f64,
    /// Bytes.
    backlog: f64,
    /// Bytes on the wire per segment.
    packet: f64,
}

#[derive(Debug, Clone)]
struct FluidFlow {
    desc: FlowDescriptor,
    path: Vec<ChannelId>,
    /// Seconds.
    base_rtt: f64,
    /// Bytes.
    cwnd: f64,
    /// Bytes.
    ssthresh: f64,
    /// Bytes.
    max_window: f64,
    recovery_until: Nanosecs,
    tx: f64,
    rx: f64,
    first_tx: Option<Nanosecs>,
    last_tx: Option<Nanosecs>,
    first_rx: Option<Nanosecs>,
    last_rx: Option<Nanosecs>,
}

impl FluidFlow {
    fn is_active(&self, now: Nanosecs) -> bool {
        self.desc.start <= now && now < self.desc.stop
    }

    /// Seconds.
    fn rtt(&self, queues: &FxHashMap<ChannelId, FluidQueue>) -> f64 {
        self.base_rtt
            + self
                .path
                .iter()
                .filter_map(|c| queues.get(c))
                .map(|q| q.backlog / q.capacity)
                .sum::<f64>()
    }

    fn src_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(
            self.desc.src.addr,
            EPHEMERAL_PORT_BASE.wrapping_add(self.desc.id.inner() as u16),
        )
    }

    fn data_counters(&self) -> FlowCounters {
        let mut c = FlowCounters::new(FlowKey {
            src: self.src_addr(),
            dst: self.desc.sink_addr(),
            protocol: self.desc.protocol,
        });
        c.tx_bytes = Bytes::new(self.tx as u64);
        c.rx_bytes = Bytes::new(self.rx as u64);
        c.first_tx = self.first_tx;
        c.last_tx = self.last_tx;
        c.first_rx = self.first_rx;
        c.last_rx = self.last_rx;
        c
    }

    /// The reverse direction, carrying one header-only acknowledgment per `del_ack` segments.
    fn ack_counters(&self, stack: &StackConfig) -> Option<FlowCounters> {
        let per_ack = (stack.segment_size.into_u64() * stack.del_ack_count.max(1) as u64) as f64;
        let acks = (self.rx / per_ack).floor() as u64;
        if acks == 0 {
            return None;
        }
        let mut c = FlowCounters::new(FlowKey {
            src: self.desc.sink_addr(),
            dst: self.src_addr(),
            protocol: self.desc.protocol,
        });
        c.tx_bytes = Bytes::new(acks * HEADER_BYTES);
        c.rx_bytes = c.tx_bytes;
        c.first_tx = self.first_rx;
        c.last_tx = self.last_rx;
        c.first_rx = self.first_rx;
        c.last_rx = self.last_rx;
        Some(c)
    }
}

impl FluidEngine {
    /// An engine with a 1 ms integration step.
    pub fn new() -> Self {
        Self::default()
    }

    /// The directory packet captures were requested for, if any.
    pub fn pcap_dir(&self) -> Option<&Path> {
        self.pcap_dir.as_deref()
    }

    fn segment(&self) -> f64 {
        self.stack.segment_size.into_f64()
    }

    fn advance_to(&mut self, target: Nanosecs) {
        while self.now < target {
            let dt = self.step.min(target - self.now);
            self.integrate(dt);
            self.now += dt;
        }
    }

    fn integrate(&mut self, dt: Nanosecs) {
        let secs = dt.into_secs_f64();
        let now = self.now;
        let seg = self.segment();
        let pacing = if self.stack.pacing.enabled {
            self.stack.pacing.max_rate.map(|r| r.into_f64() / 8.0)
        } else {
            None
        };

        // Offered rates
        let rates = self
            .flows
            .iter()
            .map(|f| {
                if !f.is_active(now) || !self.sinks.contains(&f.desc.sink_addr()) {
                    return 0.0;
                }
                let rate = f.cwnd / f.rtt(&self.queues);
                pacing.map_or(rate, |max| rate.min(max))
            })
            .collect::<Vec<_>>();
        let mut arrivals = FxHashMap::<ChannelId, f64>::default();
        for (f, &rate) in self.flows.iter().zip(&rates) {
            for &c in &f.path {
                *arrivals.entry(c).or_default() += rate;
            }
        }

        // Queues
        let mut share = FxHashMap::<ChannelId, f64>::default();
        let mut overflowed = FxHashSet::<ChannelId>::default();
        for (&id, q) in self.queues.iter_mut() {
            let arrival = arrivals.get(&id).copied().unwrap_or_default();
            let out = if q.backlog > 0.0 {
                q.capacity
            } else {
                arrival.min(q.capacity)
            };
            let backlog = q.backlog + (arrival - q.capacity) * secs;
            if backlog > q.limit {
                q.backlog = q.limit;
                overflowed.insert(id);
            } else {
                q.backlog = backlog.max(0.0);
            }
            if arrival > 0.0 {
                share.insert(id, (out / arrival).min(1.0));
            }
        }

        // Flows
        let end = now + dt;
        for (f, rate) in self.flows.iter_mut().zip(rates) {
            if rate == 0.0 {
                continue;
            }
            let delivered = rate
                * f.path
                    .iter()
                    .map(|c| share.get(c).copied().unwrap_or(1.0))
                    .fold(1.0, f64::min);
            f.tx += rate * secs;
            f.first_tx.get_or_insert(now);
            f.last_tx = Some(end);
            if delivered > 0.0 {
                f.rx += delivered * secs;
                f.first_rx.get_or_insert(now);
                f.last_rx = Some(end);
            }

            let rtt = f.rtt(&self.queues);
            if f.path.iter().any(|c| overflowed.contains(c)) {
                // One reduction per window of data
                if now >= f.recovery_until {
                    f.ssthresh = (f.cwnd / 2.0).max(2.0 * seg);
                    f.cwnd = f.ssthresh;
                    f.recovery_until = now + Nanosecs::from_secs_f64(rtt);
                }
            } else if f.cwnd < f.ssthresh {
                f.cwnd += f.cwnd * secs / rtt;
            } else {
                f.cwnd += seg * secs / rtt;
            }
            f.cwnd = f.cwnd.min(f.max_window);
        }
    }

    fn installed(&self) -> Result<(&Topology, &Routes), EngineError> {
        let topology = self
            .topology
            .as_ref()
            .ok_or(EngineError::State("no topology installed"))?;
        let routes = self
            .routes
            .as_ref()
            .ok_or(EngineError::State("routes have not been computed"))?;
        Ok((topology, routes))
    }
}

impl Engine for FluidEngine {
    fn now(&self) -> Nanosecs {
        self.now
    }

    fn schedule_at(&mut self, time: Nanosecs, callback: Callback<Self>) {
        self.scheduler.push(time.max(self.now), callback);
    }

    fn run(&mut self, stop: Nanosecs) -> Result<(), EngineError> {
        loop {
            let target = match self.scheduler.next_time() {
                Some(t) if t <= stop => t,
                _ => stop,
            };
            self.advance_to(target);
            while let Some((_, callback)) = self.scheduler.pop_due(self.now) {
                callback(self)?;
            }
            if self.now >= stop {
                break;
            }
        }
        log::debug!("Fluid engine stopped at {}", self.now);
        Ok(())
    }

    fn destroy(mut self) -> Result<(), EngineError> {
        let discarded = self.scheduler.clear();
        log::debug!("Discarded {discarded} pending callbacks");
        Ok(())
    }
}

impl CounterSource for FluidEngine {
    fn flow_counters(&self) -> Vec<FlowCounters> {
        self.flows
            .iter()
            .filter(|f| f.first_tx.is_some())
            .flat_map(|f| {
                std::iter::once(f.data_counters()).chain(f.ack_counters(&self.stack))
            })
            .collect()
    }

    fn queue_len(&self, queue: QueueId) -> Option<Packets> {
        self.queues
            .get(&queue)
            .map(|q| Packets::new((q.backlog / q.packet).floor() as u64))
    }

    fn cwnd(&self, flow: FlowId) -> Option<Bytes> {
        self.flows
            .iter()
            .find(|f| f.desc.id == flow && f.is_active(self.now))
            .map(|f| Bytes::new(f.cwnd as u64))
    }
}

impl NetworkEngine for FluidEngine {
    fn configure_stack(
        &mut self,
        stack: &StackConfig,
        queue: &QueueConfig,
    ) -> Result<(), EngineError> {
        if self.topology.is_some() {
            return Err(EngineError::State(
                "stacks must be configured before the topology is installed",
            ));
        }
        self.stack = stack.clone();
        self.queue = queue.clone();
        Ok(())
    }

    fn install_topology(&mut self, topology: &Topology) -> Result<(), EngineError> {
        let packet = (self.stack.segment_size.into_u64() + HEADER_BYTES) as f64;
        let efficiency = self.segment() / packet;
        self.queues = topology
            .channels()
            .map(|chan| {
                let limit = topology
                    .segment(chan.segment)
                    .and_then(|s| s.spec.queue_limit)
                    .unwrap_or(self.queue.limit)
                    + self.queue.device_limit;
                let q = FluidQueue {
                    capacity: chan.rate.into_f64() / 8.0 * efficiency,
                    limit: limit.into_f64() * packet,
                    backlog: 0.0,
                    packet,
                };
                (chan.id(), q)
            })
            .collect();
        self.topology = Some(topology.clone());
        self.routes = None;
        Ok(())
    }

    fn compute_routes(&mut self) -> Result<(), EngineError> {
        let topology = self
            .topology
            .as_ref()
            .ok_or(EngineError::State("no topology installed"))?;
        let routes = Routes::new(topology);
        routes.ensure_reachable(topology)?;
        self.routes = Some(routes);
        Ok(())
    }

    fn install_bulk_sender(&mut self, flow: &FlowDescriptor) -> Result<(), EngineError> {
        let (topology, routes) = self.installed()?;
        let (src, dst) = (flow.src.node, flow.dst.node);
        let path = routes
            .path(topology, src, dst)
            .ok_or(RoutingError::Unreachable { src, dst })?;
        let back = routes
            .path(topology, dst, src)
            .ok_or(RoutingError::Unreachable { src: dst, dst: src })?;
        let packet = Bytes::new(self.stack.segment_size.into_u64() + HEADER_BYTES);
        let base_rtt = path
            .iter()
            .chain(&back)
            .filter_map(|&c| topology.channel(c))
            .map(|chan| chan.delay.into_secs_f64())
            .sum::<f64>()
            + path
                .iter()
                .filter_map(|&c| topology.channel(c))
                .map(|chan| chan.rate.length(packet).into_secs_f64())
                .sum::<f64>();
        let seg = self.segment();
        let max_window = self.stack.snd_buf.min(self.stack.rcv_buf).into_f64();
        self.flows.push(FluidFlow {
            desc: flow.clone(),
            path,
            base_rtt,
            cwnd: (self.stack.initial_cwnd as f64 * seg).min(max_window),
            ssthresh: f64::INFINITY,
            max_window,
            recovery_until: Nanosecs::ZERO,
            tx: 0.0,
            rx: 0.0,
            first_tx: None,
            last_tx: None,
            first_rx: None,
            last_rx: None,
        });
        Ok(())
    }

    fn install_sink(&mut self, flow: &FlowDescriptor) -> Result<(), EngineError> {
        self.installed()?;
        self.sinks.insert(flow.sink_addr());
        Ok(())
    }

    fn enable_pcap(&mut self, dir: &Path) -> Result<(), EngineError> {
        log::warn!("The fluid engine has no packets to capture");
        self.pcap_dir = Some(dir.to_path_buf());
        Ok(())
    }
}
