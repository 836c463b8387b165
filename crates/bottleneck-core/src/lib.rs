#![warn(unreachable_pub, missing_debug_implementations)]

//! The core Bottleneck library. This crate builds dumbbell topologies, provisions bulk flows on
//! them and samples their telemetry while [an experiment](Experiment::run) drives a
//! [simulation engine](NetworkEngine) to its stop time.

#[macro_use]
mod ident;

pub mod config;
pub mod counters;
pub mod engine;
pub mod experiment;
pub mod flows;
pub mod link;
pub mod routing;
pub mod telemetry;
pub mod topology;
pub mod units;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{
    CcKind, ConfigError, ExperimentConfig, FlowConfig, OutputConfig, Pacing, QueueConfig,
    QueueDiscKind, StackConfig, TelemetryConfig,
};
pub use counters::{CounterSource, FlowCounters, FlowKey, FlowSummary, QueueId};
pub use engine::{Callback, Engine, EngineError, NetworkEngine, Scheduler};
pub use experiment::{Error, Experiment, Report};
pub use flows::{FlowDescriptor, FlowId, FlowProvisioner, FlowTiming, Orientation, Protocol};
pub use link::{EdgeLinks, LinkSpec};
pub use routing::{Routes, RoutingError};
pub use telemetry::{ByteCounter, ResourceError, Sample, SeriesKey};
pub use topology::{DumbbellSpec, Side, Topology, TopologyError};
