//! An interface to the backend ns-3 simulation.
//!
//! This crate is tightly coupled to the interface provided by the `bottleneck` scratch program:
//! it reads attribute defaults from `config.txt`, the dumbbell from `topology.txt` and the bulk
//! flows from `flows.txt`, writes its time series next to them, and ends with one flow-monitor
//! line per classified flow in `flowmon.txt`.

#![warn(unreachable_pub, missing_debug_implementations, missing_docs)]

use std::fmt::Write;
use std::fs;
use std::net::{AddrParseError, SocketAddrV4};
use std::num::ParseIntError;
use std::path::PathBuf;

use bottleneck_core::{
    config::{CcKind, ExperimentConfig, QueueDiscKind},
    counters::{FlowCounters, FlowKey},
    flows::{FlowDescriptor, Protocol},
    telemetry::ByteCounter,
    topology::Topology,
    units::{Bytes, Nanosecs},
};

/// The scratch program run when none is given.
pub const DEFAULT_PROGRAM: &str = "bottleneck";

/// An ns-3 run of one experiment.
#[derive(Debug, typed_builder::TypedBuilder)]
pub struct Ns3Experiment {
    /// The root of the ns-3 source tree, containing the `ns3` driver script.
    #[builder(setter(into))]
    pub ns3_dir: PathBuf,
    /// The directory in which to write simulation configs and data.
    #[builder(setter(into))]
    pub data_dir: PathBuf,
    /// The scratch program to run.
    #[builder(default = DEFAULT_PROGRAM.to_owned(), setter(into))]
    pub program: String,
    /// The experiment configuration. It must already be validated.
    pub config: ExperimentConfig,
    /// The dumbbell built from `config`.
    pub topology: Topology,
    /// The flows provisioned on `topology`.
    pub flows: Vec<FlowDescriptor>,
}

impl Ns3Experiment {
    /// Run the simulation, returning the counters of every flow ns-3 classified.
    ///
    /// This routine can fail due to IO errors, a failing ns-3 process or errors parsing ns-3
    /// data.
    pub fn run(&self) -> Result<Vec<FlowCounters>, Error> {
        // Set up directory
        let mk_path = |file: &str| self.data_dir.join(file);
        fs::create_dir_all(&self.data_dir)?;

        fs::write(mk_path("config.txt"), translate_config(&self.config))?;
        fs::write(mk_path("topology.txt"), self.topology.to_snapshot())?;
        fs::write(mk_path("flows.txt"), translate_flows(&self.flows))?;

        // Run ns-3
        self.invoke_ns3()?;

        // Parse and return results
        let s = fs::read_to_string(mk_path("flowmon.txt"))?;
        let counters = parse_ns3_records(&s)?;
        Ok(counters)
    }

    fn invoke_ns3(&self) -> cmd_lib::CmdResult {
        // We need to canonicalize the directories because we run `cd` below.
        let data_dir = fs::canonicalize(&self.data_dir)?;
        let ns3_dir = fs::canonicalize(&self.ns3_dir)?;
        let args = format!("scratch/{} --root={}", self.program, data_dir.display());
        let log = data_dir.join("output.txt");
        cmd_lib::run_cmd! {
            cd ${ns3_dir};
            ./ns3 run ${args} > ${log} 2>&1
        }
    }
}

/// The error type for [Ns3Experiment::run].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error parsing ns-3 formats.
    #[error("failed to parse ns-3 format")]
    ParseNs3(#[from] ParseNs3Error),

    /// IO error, including a failing ns-3 process.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn cc_type_id(cc: CcKind) -> &'static str {
    match cc {
        CcKind::NewReno => "ns3::TcpNewReno",
        CcKind::Cubic => "ns3::TcpCubic",
        CcKind::Bbr => "ns3::TcpBbr",
        CcKind::Vegas => "ns3::TcpVegas",
        CcKind::Westwood => "ns3::TcpWestwoodPlus",
        CcKind::Dctcp => "ns3::TcpDctcp",
    }
}

fn queue_disc_type_id(kind: QueueDiscKind) -> &'static str {
    match kind {
        QueueDiscKind::Fifo => "ns3::FifoQueueDisc",
        QueueDiscKind::Red => "ns3::RedQueueDisc",
        QueueDiscKind::CoDel => "ns3::CoDelQueueDisc",
        QueueDiscKind::FqCoDel => "ns3::FqCoDelQueueDisc",
        QueueDiscKind::PfifoFast => "ns3::PfifoFastQueueDisc",
    }
}

fn translate_config(cfg: &ExperimentConfig) -> String {
    let mut s = String::new();
    let stack = &cfg.stack;
    let socket_type = match cfg.flows.protocol {
        Protocol::Tcp => "ns3::TcpL4Protocol::SocketType",
        Protocol::Quic => "ns3::QuicL4Protocol::SocketType",
    };
    // Attribute defaults: path value
    writeln!(s, "{socket_type} {}", cc_type_id(stack.cc)).unwrap();
    writeln!(s, "ns3::TcpSocket::SndBufSize {}", stack.snd_buf.into_u64()).unwrap();
    writeln!(s, "ns3::TcpSocket::RcvBufSize {}", stack.rcv_buf.into_u64()).unwrap();
    writeln!(s, "ns3::TcpSocket::InitialCwnd {}", stack.initial_cwnd).unwrap();
    writeln!(s, "ns3::TcpSocket::DelAckCount {}", stack.del_ack_count).unwrap();
    writeln!(s, "ns3::TcpSocket::SegmentSize {}", stack.segment_size.into_u64()).unwrap();
    writeln!(s, "ns3::TcpSocketState::EnablePacing {}", stack.pacing.enabled).unwrap();
    if let Some(rate) = stack.pacing.max_rate {
        writeln!(s, "ns3::TcpSocketState::MaxPacingRate {rate}").unwrap();
    }
    let queue = &cfg.queue;
    writeln!(s, "ns3::DropTailQueue<Packet>::MaxSize {}", queue.device_limit).unwrap();
    writeln!(s, "{}::MaxSize {}", queue_disc_type_id(queue.kind), queue.limit).unwrap();

    // Program parameters: name value
    let tel = &cfg.telemetry;
    let counter = match tel.counter {
        ByteCounter::Tx => "tx",
        ByteCounter::Rx => "rx",
    };
    writeln!(s, "Bql {}", queue.bql).unwrap();
    writeln!(s, "StopTime {}", cfg.stop_time).unwrap();
    writeln!(s, "FirstTick {}", tel.first_tick).unwrap();
    writeln!(s, "SamplingPeriod {}", tel.period).unwrap();
    writeln!(s, "SampleThroughput {}", tel.throughput).unwrap();
    writeln!(s, "SampleCwnd {}", tel.cwnd).unwrap();
    writeln!(s, "SampleQueue {}", tel.queue).unwrap();
    writeln!(s, "ByteCounter {counter}").unwrap();
    writeln!(s, "Pcap {}", cfg.output.pcap).unwrap();
    s
}

fn translate_flows(flows: &[FlowDescriptor]) -> String {
    let nr_flows = flows.len();
    // First line: # of flows
    // id0 src0 dst0 dst_port0 protocol0 start0 stop0
    // id1 src1 dst1 dst_port1 protocol1 start1 stop1
    let mut lines = std::iter::once(nr_flows.to_string())
        .chain(flows.iter().map(|f| {
            format!(
                "{} {} {} {} {} {} {}",
                f.id,
                f.src.node,
                f.dst.node,
                f.port,
                f.protocol.as_str(),
                f.start.into_secs_f64(),
                f.stop.into_secs_f64()
            )
        }))
        .collect::<Vec<_>>()
        .join("\n");
    lines.push('\n');
    lines
}

fn parse_ns3_records(s: &str) -> Result<Vec<FlowCounters>, ParseNs3Error> {
    s.lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_ns3_record)
        .collect()
}

fn parse_ns3_record(s: &str) -> Result<FlowCounters, ParseNs3Error> {
    // protocol, src, dst, tx (B), rx (B), first_tx, last_tx, first_rx, last_rx (ns)
    const NR_NS3_FIELDS: usize = 9;
    let fields = s.split_whitespace().collect::<Vec<_>>();
    let nr_fields = fields.len();
    if nr_fields != NR_NS3_FIELDS {
        return Err(ParseNs3Error::WrongNrFields {
            expected: NR_NS3_FIELDS,
            got: nr_fields,
        });
    }
    let protocol = match fields[0] {
        "tcp" => Protocol::Tcp,
        "quic" => Protocol::Quic,
        other => return Err(ParseNs3Error::UnknownProtocol(other.to_owned())),
    };
    let mut counters = FlowCounters::new(FlowKey {
        src: fields[1].parse::<SocketAddrV4>()?,
        dst: fields[2].parse::<SocketAddrV4>()?,
        protocol,
    });
    counters.tx_bytes = Bytes::new(fields[3].parse()?);
    counters.rx_bytes = Bytes::new(fields[4].parse()?);
    counters.first_tx = parse_time(fields[5])?;
    counters.last_tx = parse_time(fields[6])?;
    counters.first_rx = parse_time(fields[7])?;
    counters.last_rx = parse_time(fields[8])?;
    Ok(counters)
}

// `-` marks a direction that never saw a packet
fn parse_time(field: &str) -> Result<Option<Nanosecs>, ParseIntError> {
    if field == "-" {
        return Ok(None);
    }
    field.parse().map(|ns| Some(Nanosecs::new(ns)))
}

/// Error parsing ns-3 formats.
#[derive(Debug, thiserror::Error)]
pub enum ParseNs3Error {
    /// Incorrect number of fields.
    #[error("Wrong number of fields (expected {expected}, got {got}")]
    WrongNrFields {
        /// Expected number of fields.
        expected: usize,
        /// Actual number of fields.
        got: usize,
    },

    /// Protocol name not recognized.
    #[error("Unknown protocol {0}")]
    UnknownProtocol(String),

    /// Error parsing field value.
    #[error("Failed to parse field")]
    ParseInt(#[from] ParseIntError),

    /// Error parsing a socket address.
    #[error("Failed to parse address")]
    ParseAddr(#[from] AddrParseError),
}
