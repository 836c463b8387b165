//! Periodic telemetry.
//!
//! A [`Probe`] is woken at every tick of a sampling chain started by [`attach`]. It reads the
//! engine's [`CounterSource`] and appends [`SampleRecord`]s to its own [`SeriesSink`]. Every
//! chain re-arms itself at `now + period` until the engine stops running callbacks.
//!
//! Three probes are provided:
//!
//! - [`ThroughputSampler`] turns cumulative per-flow byte counters into rates, one series per
//!   tracked flow.
//! - [`CwndSampler`] records each flow's congestion window in segments.
//! - [`QueueSampler`] records the occupancy of a single queue.

mod rate;
mod sink;

use std::cell::RefCell;
use std::rc::Rc;

use derivative::Derivative;
use rustc_hash::FxHashMap;

use crate::counters::{CounterSource, FlowCounters, FlowKey, QueueId};
use crate::engine::{Callback, Engine};
use crate::flows::{FlowDescriptor, FlowId};
use crate::units::{Bytes, Nanosecs};

pub use rate::{FlowSampleState, RateTracker, Sample, SkipReason};
pub use sink::{DirSink, MemorySink, Quantity, ResourceError, SampleRecord, SeriesKey, SeriesSink};

/// Something woken at every sampling tick.
pub trait Probe {
    fn on_tick(&mut self, now: Nanosecs, source: &dyn CounterSource) -> Result<(), ResourceError>;
}

/// Starts a sampling chain: `probe` ticks at `first_tick` and every `period` after that.
pub fn attach<E, P>(engine: &mut E, probe: Rc<RefCell<P>>, first_tick: Nanosecs, period: Nanosecs)
where
    E: Engine + CounterSource + 'static,
    P: Probe + 'static,
{
    engine.schedule_at(first_tick, tick(probe, period));
}

fn tick<E, P>(probe: Rc<RefCell<P>>, period: Nanosecs) -> Callback<E>
where
    E: Engine + CounterSource + 'static,
    P: Probe + 'static,
{
    Box::new(move |engine: &mut E| {
        let now = engine.now();
        probe.borrow_mut().on_tick(now, &*engine)?;
        // A zero period would never let time advance
        if period == Nanosecs::ZERO {
            return Ok(());
        }
        // Past the end of representable time the chain just ends
        if let Some(next) = now.checked_add(period) {
            engine.schedule_at(next, tick(probe, period));
        }
        Ok(())
    })
}

/// Which cumulative byte counter throughput is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Derivative, serde::Serialize, serde::Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteCounter {
    /// Bytes sent.
    #[derivative(Default)]
    Tx,
    /// Bytes received.
    Rx,
}

impl ByteCounter {
    fn read(&self, counters: &FlowCounters) -> Bytes {
        match self {
            ByteCounter::Tx => counters.tx_bytes,
            ByteCounter::Rx => counters.rx_bytes,
        }
    }
}

/// Samples the throughput of every tracked flow.
#[derive(Debug)]
pub struct ThroughputSampler<S> {
    tracked: FxHashMap<FlowKey, FlowId>,
    tracker: RateTracker,
    counter: ByteCounter,
    sink: S,
    skipped: usize,
}

impl<S: SeriesSink> ThroughputSampler<S> {
    pub fn new(counter: ByteCounter, sink: S) -> Self {
        Self {
            tracked: FxHashMap::default(),
            tracker: RateTracker::new(),
            counter,
            sink,
            skipped: 0,
        }
    }

    /// Creates a sampler tracking the data direction of every flow in `flows`.
    pub fn for_flows(flows: &[FlowDescriptor], counter: ByteCounter, sink: S) -> Self {
        let mut sampler = Self::new(counter, sink);
        for flow in flows {
            sampler.track(flow.key(), flow.id);
        }
        sampler
    }

    /// Tracks `key` as flow `id`. A zero source port in `key` matches any source port.
    pub fn track(&mut self, key: FlowKey, id: FlowId) {
        self.tracked.insert(key, id);
    }

    /// The flow a counter key belongs to, if it is tracked.
    pub fn lookup(&self, key: &FlowKey) -> Option<FlowId> {
        self.tracked
            .get(key)
            .or_else(|| self.tracked.get(&key.any_src_port()))
            .copied()
    }

    /// How many observations produced no rate.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

impl<S: SeriesSink> Probe for ThroughputSampler<S> {
    fn on_tick(&mut self, now: Nanosecs, source: &dyn CounterSource) -> Result<(), ResourceError> {
        for counters in source.flow_counters() {
            // Untracked keys (acknowledgment streams, for one) are ignored
            let Some(flow) = self.lookup(&counters.key) else {
                continue;
            };
            match self.tracker.observe(flow, now, self.counter.read(&counters)) {
                Sample::Rate(value) => self.sink.append(SampleRecord {
                    time: now,
                    series: SeriesKey::throughput(flow),
                    value,
                })?,
                Sample::Primed => log::debug!("Flow {flow} primed at {now}"),
                Sample::Skipped(reason) => {
                    self.skipped += 1;
                    log::warn!("Skipped a sample of flow {flow} at {now}: {reason:?}");
                }
            }
        }
        Ok(())
    }
}

/// Samples each flow's congestion window, in segments.
#[derive(Debug)]
pub struct CwndSampler<S> {
    flows: Vec<FlowId>,
    segment_size: Bytes,
    sink: S,
}

impl<S: SeriesSink> CwndSampler<S> {
    pub fn new(flows: Vec<FlowId>, segment_size: Bytes, sink: S) -> Self {
        Self {
            flows,
            segment_size,
            sink,
        }
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

impl<S: SeriesSink> Probe for CwndSampler<S> {
    fn on_tick(&mut self, now: Nanosecs, source: &dyn CounterSource) -> Result<(), ResourceError> {
        for &flow in &self.flows {
            // Flows that have not started (or have finished) have no window
            if let Some(cwnd) = source.cwnd(flow) {
                self.sink.append(SampleRecord {
                    time: now,
                    series: SeriesKey::cwnd(flow),
                    value: cwnd.into_f64() / self.segment_size.into_f64(),
                })?;
            }
        }
        Ok(())
    }
}

/// Samples the occupancy of one queue.
#[derive(Debug)]
pub struct QueueSampler<S> {
    queue: QueueId,
    sink: S,
}

impl<S: SeriesSink> QueueSampler<S> {
    pub fn new(queue: QueueId, sink: S) -> Self {
        Self { queue, sink }
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

impl<S: SeriesSink> Probe for QueueSampler<S> {
    fn on_tick(&mut self, now: Nanosecs, source: &dyn CounterSource) -> Result<(), ResourceError> {
        if let Some(len) = source.queue_len(self.queue) {
            self.sink.append(SampleRecord {
                time: now,
                series: SeriesKey::queue_len(),
                value: len.into_f64(),
            })?;
        }
        Ok(())
    }
}
