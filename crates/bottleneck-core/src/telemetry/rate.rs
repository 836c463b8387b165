use rustc_hash::FxHashMap;

use crate::flows::FlowId;
use crate::units::{Bytes, Nanosecs};

/// The last observation of one flow's cumulative byte counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowSampleState {
    pub last_bytes: Bytes,
    pub last_time: Nanosecs,
}

/// Why an observation produced no rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SkipReason {
    /// No time passed since the previous observation.
    ZeroElapsed,
    /// The counter went backwards; the flow was re-primed.
    CounterRegressed,
}

/// The outcome of one observation.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub enum Sample {
    /// First observation of a flow; nothing to compare against.
    Primed,
    /// Bits per second since the previous observation.
    Rate(f64),
    Skipped(SkipReason),
}

impl Sample {
    pub fn rate(&self) -> Option<f64> {
        match *self {
            Sample::Rate(r) => Some(r),
            _ => None,
        }
    }
}

/// Converts cumulative byte counters into rates, keeping one [`FlowSampleState`] per flow.
/// Observations of one flow never read or write another flow's state.
#[derive(Debug, Default, Clone)]
pub struct RateTracker {
    states: FxHashMap<FlowId, FlowSampleState>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, flow: FlowId, now: Nanosecs, bytes: Bytes) -> Sample {
        let fresh = FlowSampleState {
            last_bytes: bytes,
            last_time: now,
        };
        let Some(state) = self.states.get_mut(&flow) else {
            self.states.insert(flow, fresh);
            return Sample::Primed;
        };
        // CORRECTNESS: Never divide by a zero (or negative) interval.
        if now <= state.last_time {
            return Sample::Skipped(SkipReason::ZeroElapsed);
        }
        let Some(delta) = bytes.checked_sub(state.last_bytes) else {
            *state = fresh;
            return Sample::Skipped(SkipReason::CounterRegressed);
        };
        let elapsed = (now - state.last_time).into_secs_f64();
        *state = fresh;
        Sample::Rate(delta.into_f64() * 8.0 / elapsed)
    }

    pub fn state(&self, flow: FlowId) -> Option<&FlowSampleState> {
        self.states.get(&flow)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
