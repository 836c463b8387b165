//! Interfaces to the simulation engine that runs an experiment, and a virtual-time event queue
//! engines can use to hold harness callbacks.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::path::Path;

use crate::config::{QueueConfig, StackConfig};
use crate::counters::CounterSource;
use crate::flows::FlowDescriptor;
use crate::routing::RoutingError;
use crate::telemetry::ResourceError;
use crate::topology::Topology;
use crate::units::Nanosecs;

/// A callback run by the engine at a scheduled virtual time.
pub type Callback<E> = Box<dyn FnOnce(&mut E) -> Result<(), ResourceError>>;

/// A discrete-event engine. Callbacks run in increasing virtual time; callbacks scheduled for
/// the same time run in the order they were scheduled.
pub trait Engine {
    /// The current virtual time.
    fn now(&self) -> Nanosecs;

    /// Schedules `callback` to run at `time`. Times in the past are clamped to `now`.
    fn schedule_at(&mut self, time: Nanosecs, callback: Callback<Self>);

    /// Runs until `stop`. Callbacks scheduled after `stop` never run.
    fn run(&mut self, stop: Nanosecs) -> Result<(), EngineError>;

    /// Tears the engine down, discarding anything still scheduled.
    fn destroy(self) -> Result<(), EngineError>
    where
        Self: Sized;
}

/// An engine that simulates a network and can be configured by the harness.
pub trait NetworkEngine: Engine + CounterSource {
    /// Sets transport and queue defaults. Must be called before anything is installed.
    fn configure_stack(
        &mut self,
        stack: &StackConfig,
        queue: &QueueConfig,
    ) -> Result<(), EngineError>;

    /// Creates nodes, devices, stacks and addresses for `topology`.
    fn install_topology(&mut self, topology: &Topology) -> Result<(), EngineError>;

    /// Computes routes between all nodes of the installed topology.
    fn compute_routes(&mut self) -> Result<(), EngineError>;

    /// Installs a bulk sender on `flow.src`, active from `flow.start` to `flow.stop`.
    fn install_bulk_sender(&mut self, flow: &FlowDescriptor) -> Result<(), EngineError>;

    /// Installs a sink on `flow.dst` listening on `flow.port`.
    fn install_sink(&mut self, flow: &FlowDescriptor) -> Result<(), EngineError>;

    /// Enables packet captures on the bottleneck, written under `dir`.
    fn enable_pcap(&mut self, dir: &Path) -> Result<(), EngineError>;
}

/// A fatal engine failure. Simulations are deterministic, so these are never retried.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to compute routes")]
    Routing(#[from] RoutingError),

    #[error("a scheduled callback failed")]
    Resource(#[from] ResourceError),

    #[error("the engine is in the wrong state: {0}")]
    State(&'static str),

    #[error("engine backend failure")]
    Backend(#[from] anyhow::Error),
}

/// A queue of callbacks ordered by `(time, insertion order)`.
pub struct Scheduler<E> {
    heap: BinaryHeap<Reverse<Event<E>>>,
    next_seq: u64,
}

struct Event<E> {
    time: Nanosecs,
    seq: u64,
    callback: Callback<E>,
}

impl<E> PartialEq for Event<E> {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.seq) == (other.time, other.seq)
    }
}

impl<E> Eq for Event<E> {}

impl<E> PartialOrd for Event<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Event<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn push(&mut self, time: Nanosecs, callback: Callback<E>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Event {
            time,
            seq,
            callback,
        }));
    }

    /// The time of the earliest pending callback.
    #[inline]
    pub fn next_time(&self) -> Option<Nanosecs> {
        self.heap.peek().map(|Reverse(e)| e.time)
    }

    /// Removes the earliest callback if it is due at or before `until`.
    pub fn pop_due(&mut self, until: Nanosecs) -> Option<(Nanosecs, Callback<E>)> {
        match self.next_time() {
            Some(t) if t <= until => self
                .heap
                .pop()
                .map(|Reverse(Event { time, callback, .. })| (time, callback)),
            _ => None,
        }
    }

    /// Drops every pending callback and returns how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.heap.len();
        self.heap.clear();
        n
    }
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Scheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.heap.len())
            .field("next_time", &self.next_time())
            .finish()
    }
}
