//! This module defines the typed experiment configuration ([`ExperimentConfig`]). Every option
//! an experiment recognizes is a field here; the whole configuration is validated once, before
//! any engine is touched.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use derivative::Derivative;

use crate::flows::{FlowTiming, Orientation, Protocol, DEFAULT_BASE_PORT};
use crate::telemetry::ByteCounter;
use crate::topology::{DumbbellSpec, Side};
use crate::units::{BitsPerSec, Bytes, Millisecs, Nanosecs, Packets, Secs};

/// A complete experiment description.
#[derive(Debug, Clone, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
pub struct ExperimentConfig {
    /// The dumbbell to build.
    pub topology: DumbbellSpec,
    /// The bulk flows to start.
    pub flows: FlowConfig,
    /// Transport stack defaults.
    #[builder(default)]
    #[serde(default)]
    pub stack: StackConfig,
    /// Queue discipline on every device.
    #[builder(default)]
    #[serde(default)]
    pub queue: QueueConfig,
    /// Which quantities to sample, and how often.
    #[builder(default)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Where results go.
    #[builder(default)]
    #[serde(default)]
    pub output: OutputConfig,
    /// The time at which applications stop and the engine halts.
    #[builder(default = Secs::new(100).into(), setter(into))]
    #[serde(default = "default_stop_time")]
    pub stop_time: Nanosecs,
}

fn default_stop_time() -> Nanosecs {
    Secs::new(100).into()
}

impl ExperimentConfig {
    /// Checks every option that can be checked without building anything. Topology parameters
    /// are checked again when the topology is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stop_time == Nanosecs::ZERO {
            return Err(ConfigError::ZeroStopTime);
        }
        if self.flows.count == 0 {
            return Err(ConfigError::NoFlows);
        }
        self.stack.validate()?;
        self.queue.validate()?;
        self.telemetry.validate()?;
        if self.telemetry.period > self.stop_time {
            return Err(ConfigError::PeriodExceedsStopTime {
                period: self.telemetry.period,
                stop_time: self.stop_time,
            });
        }
        let topo = &self.topology;
        if topo.left_count == 0 {
            return Err(ConfigError::ZeroLeafCount(Side::Left));
        }
        if topo.right_count == 0 {
            return Err(ConfigError::ZeroLeafCount(Side::Right));
        }
        if topo.symmetric && topo.left_count != topo.right_count {
            return Err(ConfigError::AsymmetricLeaves {
                left: topo.left_count,
                right: topo.right_count,
            });
        }
        Ok(())
    }
}

/// Bulk flow parameters.
#[derive(Debug, Clone, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
pub struct FlowConfig {
    /// Number of flows.
    pub count: usize,
    #[builder(default)]
    #[serde(default)]
    pub protocol: Protocol,
    /// Flow `i` uses port `base_port + i`.
    #[builder(default = DEFAULT_BASE_PORT)]
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[builder(default)]
    #[serde(default)]
    pub orientation: Orientation,
    /// Per-flow start/stop overrides, indexed by flow.
    #[builder(default)]
    #[serde(default)]
    pub timing: Vec<FlowTiming>,
}

fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

/// Congestion control algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Derivative, serde::Serialize, serde::Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "lowercase")]
pub enum CcKind {
    /// TCP NewReno.
    NewReno,
    /// CUBIC.
    Cubic,
    /// BBR.
    #[derivative(Default)]
    Bbr,
    /// TCP Vegas.
    Vegas,
    /// TCP Westwood.
    Westwood,
    /// DCTCP.
    Dctcp,
}

impl CcKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CcKind::NewReno => "newreno",
            CcKind::Cubic => "cubic",
            CcKind::Bbr => "bbr",
            CcKind::Vegas => "vegas",
            CcKind::Westwood => "westwood",
            CcKind::Dctcp => "dctcp",
        }
    }
}

/// Sender pacing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Pacing {
    pub enabled: bool,
    /// The maximum pacing rate. Required when pacing is enabled.
    #[serde(default)]
    pub max_rate: Option<BitsPerSec>,
}

/// Transport stack defaults, applied to every socket.
#[derive(Debug, Clone, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StackConfig {
    #[builder(default)]
    pub cc: CcKind,
    #[builder(default = Bytes::new(4_194_304))]
    pub snd_buf: Bytes,
    #[builder(default = Bytes::new(6_291_456))]
    pub rcv_buf: Bytes,
    /// Initial congestion window, in segments.
    #[builder(default = 10)]
    pub initial_cwnd: u32,
    #[builder(default = Bytes::new(1448))]
    pub segment_size: Bytes,
    #[builder(default = 2)]
    pub del_ack_count: u32,
    #[builder(default)]
    pub pacing: Pacing,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StackConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_size == Bytes::ZERO {
            return Err(ConfigError::ZeroSegmentSize);
        }
        if self.initial_cwnd == 0 {
            return Err(ConfigError::ZeroInitialCwnd);
        }
        if self.snd_buf < self.segment_size || self.rcv_buf < self.segment_size {
            return Err(ConfigError::BufferTooSmall);
        }
        match self.pacing {
            Pacing {
                enabled: true,
                max_rate: None | Some(BitsPerSec::ZERO),
            } => Err(ConfigError::PacingWithoutRate),
            _ => Ok(()),
        }
    }
}

/// Queue discipline kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Derivative, serde::Serialize, serde::Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueDiscKind {
    /// Drop-tail FIFO.
    #[derivative(Default)]
    Fifo,
    /// Random early detection.
    Red,
    /// CoDel.
    CoDel,
    /// Flow-queue CoDel.
    FqCoDel,
    /// Three-band priority FIFO.
    PfifoFast,
}

/// Queue configuration for every device.
#[derive(Debug, Clone, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    #[builder(default)]
    pub kind: QueueDiscKind,
    /// The queue discipline's capacity.
    #[builder(default = Packets::new(100))]
    pub limit: Packets,
    /// The device transmit queue below the discipline.
    #[builder(default = Packets::new(1))]
    pub device_limit: Packets,
    /// Byte queue limits on the device queue.
    #[builder(default = true)]
    pub bql: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl QueueConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.limit == Packets::ZERO || self.device_limit == Packets::ZERO {
            return Err(ConfigError::ZeroQueueLimit);
        }
        Ok(())
    }
}

/// Sampling configuration.
#[derive(Debug, Clone, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// The interval between ticks.
    #[builder(default = Millisecs::new(200).into(), setter(into))]
    pub period: Nanosecs,
    /// The time of the first tick.
    #[builder(default = Nanosecs::new(1_000), setter(into))]
    pub first_tick: Nanosecs,
    #[builder(default = true)]
    pub throughput: bool,
    #[builder(default = true)]
    pub cwnd: bool,
    #[builder(default = true)]
    pub queue: bool,
    /// The counter throughput is computed from.
    #[builder(default)]
    pub counter: ByteCounter,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TelemetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.period == Nanosecs::ZERO {
            return Err(ConfigError::ZeroSamplingPeriod);
        }
        Ok(())
    }
}

/// Output locations.
#[derive(Debug, Clone, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    #[builder(default = PathBuf::from("bbr-results"), setter(into))]
    pub dir: PathBuf,
    /// Write into a fresh subdirectory named after the local wall-clock time.
    #[builder(default)]
    pub timestamped: bool,
    /// Ask the engine for packet captures on the bottleneck.
    #[builder(default)]
    pub pcap: bool,
    /// Write `topology.txt`.
    #[builder(default = true)]
    pub topology_snapshot: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Invalid or contradictory experiment parameters, detected before the engine runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("the {0:?} side of the dumbbell has no leaves")]
    ZeroLeafCount(Side),

    #[error("a symmetric dumbbell needs equal leaf counts (left {left}, right {right})")]
    AsymmetricLeaves { left: usize, right: usize },

    #[error("link rates must be positive")]
    NonPositiveRate,

    #[error("queue limits must be positive")]
    ZeroQueueLimit,

    #[error("expected 1 or {expected} edge links, got {got}")]
    EdgeLinkCount { expected: usize, got: usize },

    #[error("address base {0} is not the start of a /24 block")]
    UnalignedAddressBase(Ipv4Addr),

    #[error("ran out of /24 address blocks")]
    AddressSpaceExhausted,

    #[error("ports {base}..{base}+{count} do not fit in 16 bits")]
    PortRangeOverflow { base: u16, count: usize },

    #[error("flow {flow} stops at or before it starts")]
    EmptyInterval { flow: usize },

    #[error("at least one flow is required")]
    NoFlows,

    #[error("the segment size must be positive")]
    ZeroSegmentSize,

    #[error("the initial congestion window must be positive")]
    ZeroInitialCwnd,

    #[error("socket buffers must hold at least one segment")]
    BufferTooSmall,

    #[error("pacing is enabled without a maximum rate")]
    PacingWithoutRate,

    #[error("the sampling period must be positive")]
    ZeroSamplingPeriod,

    #[error("the stop time must be positive")]
    ZeroStopTime,

    #[error("the sampling period {period} is longer than the run ({stop_time})")]
    PeriodExceedsStopTime { period: Nanosecs, stop_time: Nanosecs },
}
