use std::cell::RefCell;
use std::net::SocketAddrV4;
use std::path::Path;
use std::rc::Rc;

use crate::config::{QueueConfig, StackConfig};
use crate::counters::{CounterSource, FlowCounters, QueueId};
use crate::engine::{Callback, Engine, EngineError, NetworkEngine, Scheduler};
use crate::flows::{FlowDescriptor, FlowId};
use crate::link::LinkSpec;
use crate::topology::{DumbbellSpec, SegmentId, Topology};
use crate::units::{Bytes, Mbps, Millisecs, Nanosecs, Packets};

/// A dumbbell with a 10 Mbps/10 ms bottleneck and 1000 Mbps/5 ms edges.
pub(crate) fn dumbbell(left: usize, right: usize) -> DumbbellSpec {
    let edge = LinkSpec::new(Mbps::new(1000), Millisecs::new(5));
    DumbbellSpec::builder()
        .left_count(left)
        .right_count(right)
        .bottleneck(LinkSpec::new(Mbps::new(10), Millisecs::new(10)))
        .left_links(edge)
        .right_links(edge)
        .build()
}

pub(crate) type CallLog = Rc<RefCell<Vec<String>>>;

/// An engine whose flows send at a constant rate while active. Every harness call is logged.
pub(crate) struct FakeEngine {
    now: Nanosecs,
    scheduler: Scheduler<FakeEngine>,
    flows: Vec<FlowDescriptor>,
    bytes_per_sec: u64,
    calls: CallLog,
}

impl FakeEngine {
    pub(crate) fn new(bytes_per_sec: u64) -> (Self, CallLog) {
        let calls = CallLog::default();
        let engine = Self {
            now: Nanosecs::ZERO,
            scheduler: Scheduler::new(),
            flows: Vec::new(),
            bytes_per_sec,
            calls: Rc::clone(&calls),
        };
        (engine, calls)
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn sent(&self, flow: &FlowDescriptor) -> Option<(Bytes, Nanosecs)> {
        if self.now < flow.start {
            return None;
        }
        let end = self.now.min(flow.stop);
        let elapsed = (end - flow.start).into_u64() as u128;
        let bytes = self.bytes_per_sec as u128 * elapsed / 1_000_000_000;
        Some((Bytes::new(bytes as u64), end))
    }
}

impl std::fmt::Debug for FakeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeEngine").field("now", &self.now).finish()
    }
}

impl Engine for FakeEngine {
    fn now(&self) -> Nanosecs {
        self.now
    }

    fn schedule_at(&mut self, time: Nanosecs, callback: Callback<Self>) {
        self.scheduler.push(time.max(self.now), callback);
    }

    fn run(&mut self, stop: Nanosecs) -> Result<(), EngineError> {
        self.log(format!("run {stop}"));
        while let Some((time, callback)) = self.scheduler.pop_due(stop) {
            self.now = time;
            callback(self)?;
        }
        self.now = stop;
        Ok(())
    }

    fn destroy(mut self) -> Result<(), EngineError> {
        self.scheduler.clear();
        self.log("destroy".to_owned());
        Ok(())
    }
}

impl CounterSource for FakeEngine {
    fn flow_counters(&self) -> Vec<FlowCounters> {
        self.flows
            .iter()
            .filter_map(|flow| {
                let (bytes, last) = self.sent(flow)?;
                let mut key = flow.key();
                // An ephemeral sender port, as a real stack would pick
                key.src = SocketAddrV4::new(*key.src.ip(), 49153 + flow.id.inner() as u16);
                let mut c = FlowCounters::new(key);
                c.tx_bytes = bytes;
                c.rx_bytes = bytes;
                c.first_tx = Some(flow.start);
                c.last_tx = Some(last);
                c.first_rx = Some(flow.start);
                c.last_rx = Some(last);
                Some(c)
            })
            .collect()
    }

    fn queue_len(&self, queue: QueueId) -> Option<Packets> {
        (queue.segment == SegmentId::ZERO).then_some(Packets::new(3))
    }

    fn cwnd(&self, flow: FlowId) -> Option<Bytes> {
        self.flows
            .iter()
            .any(|f| f.id == flow && f.start <= self.now && self.now < f.stop)
            .then_some(Bytes::new(14_480))
    }
}

impl NetworkEngine for FakeEngine {
    fn configure_stack(
        &mut self,
        stack: &StackConfig,
        queue: &QueueConfig,
    ) -> Result<(), EngineError> {
        let kind = format!("{:?}", queue.kind).to_lowercase();
        self.log(format!(
            "configure_stack {} {kind} {}",
            stack.cc.as_str(),
            queue.limit
        ));
        Ok(())
    }

    fn install_topology(&mut self, topology: &Topology) -> Result<(), EngineError> {
        self.log(format!("install_topology {}", topology.nr_nodes()));
        Ok(())
    }

    fn compute_routes(&mut self) -> Result<(), EngineError> {
        self.log("compute_routes".to_owned());
        Ok(())
    }

    fn install_bulk_sender(&mut self, flow: &FlowDescriptor) -> Result<(), EngineError> {
        self.log(format!("install_bulk_sender {} {}", flow.id, flow.src.addr));
        self.flows.push(flow.clone());
        Ok(())
    }

    fn install_sink(&mut self, flow: &FlowDescriptor) -> Result<(), EngineError> {
        self.log(format!("install_sink {} {}", flow.id, flow.sink_addr()));
        Ok(())
    }

    fn enable_pcap(&mut self, dir: &Path) -> Result<(), EngineError> {
        self.log(format!("enable_pcap {}", dir.display()));
        Ok(())
    }
}
