//! Command-line options of the `bottleneck` binary.

use std::path::PathBuf;

use bottleneck_core::{
    config::{CcKind, FlowConfig, Pacing, QueueDiscKind},
    flows::Protocol,
    link::{EdgeLinks, LinkSpec},
    topology::DumbbellSpec,
    units::{BitsPerSec, Mbps, Microsecs, Millisecs, Packets, Secs},
    ExperimentConfig,
};

use clap::value_parser;

use crate::{read_config, Backend, Error};

// Largest flag values that still fit in nanoseconds or bits per second
const MAX_SECS: u64 = u64::MAX / 1_000_000_000;
const MAX_MILLIS: u64 = u64::MAX / 1_000_000;
const MAX_MICROS: u64 = u64::MAX / 1_000;
const MAX_MEGA: u64 = u64::MAX / 1_000_000;

#[derive(Debug, clap::Parser)]
#[command(name = "bottleneck", author, version, about, long_about = None)]
pub struct Session {
    /// Experiment file (.json or .dhall). Topology, flow and stack flags are ignored when given
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hosts behind the left router
    #[arg(long, default_value_t = 1)]
    n_left: usize,
    /// Hosts behind the right router
    #[arg(long, default_value_t = 1)]
    n_right: usize,
    /// Number of flows [default: one per left host]
    #[arg(long)]
    flows: Option<usize>,

    /// Bottleneck rate in Mbit/s
    #[arg(long, default_value_t = 10, value_parser = value_parser!(u64).range(..=MAX_MEGA))]
    bottleneck_rate: u64,
    /// Bottleneck one-way delay in ms
    #[arg(long, default_value_t = 10, value_parser = value_parser!(u64).range(..=MAX_MILLIS))]
    bottleneck_delay: u64,
    /// Edge link rate in Mbit/s
    #[arg(long, default_value_t = 1000, value_parser = value_parser!(u64).range(..=MAX_MEGA))]
    edge_rate: u64,
    /// Edge link delay in ms; repeat to give one per leaf
    #[arg(long, default_values_t = [5], value_parser = value_parser!(u64).range(..=MAX_MILLIS))]
    edge_delay: Vec<u64>,

    /// Congestion control algorithm
    #[arg(long, default_value = "bbr", value_parser = parse_enum::<CcKind>)]
    cc: CcKind,
    /// Transport protocol
    #[arg(long, default_value = "tcp", value_parser = parse_enum::<Protocol>)]
    protocol: Protocol,
    #[arg(long, default_value_t = 2)]
    del_ack_count: u32,
    /// Queue discipline on every device
    #[arg(long, default_value = "fifo", value_parser = parse_enum::<QueueDiscKind>)]
    queue_disc: QueueDiscKind,
    /// Queue discipline limit in packets
    #[arg(long, default_value_t = 100)]
    queue_limit: u64,
    /// Enable sender pacing
    #[arg(long)]
    pacing: bool,
    /// Maximum pacing rate in Mbit/s
    #[arg(long, value_parser = value_parser!(u64).range(..=MAX_MEGA))]
    pacing_rate: Option<u64>,

    /// Sampling period in ms
    #[arg(long, default_value_t = 200, value_parser = value_parser!(u64).range(..=MAX_MILLIS))]
    period: u64,
    /// Stop time in seconds
    #[arg(long, default_value_t = 100, value_parser = value_parser!(u64).range(..=MAX_SECS))]
    stop_time: u64,
    /// Request packet captures
    #[arg(long)]
    pcap: bool,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Write into a subdirectory named after the current time
    #[arg(long)]
    timestamped: bool,

    #[arg(long, value_enum, default_value_t = BackendKind::Fluid)]
    backend: BackendKind,
    /// Root of the ns-3 tree, for the ns3 backend
    #[arg(long)]
    ns3_dir: Option<PathBuf>,
    /// Integration step of the fluid backend in us
    #[arg(long, default_value_t = 1000, value_parser = value_parser!(u64).range(..=MAX_MICROS))]
    step: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum BackendKind {
    Fluid,
    Ns3,
}

impl Session {
    /// The experiment to run, read from `--config` or assembled from flags. Output flags apply
    /// either way.
    pub fn config(&self) -> Result<ExperimentConfig, Error> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => self.config_from_flags(),
        };
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        config.output.pcap |= self.pcap;
        config.output.timestamped |= self.timestamped;
        Ok(config)
    }

    pub fn backend(&self) -> Result<Backend, Error> {
        match self.backend {
            BackendKind::Fluid => Ok(Backend::Fluid {
                step: Microsecs::new(self.step).into(),
            }),
            BackendKind::Ns3 => {
                let ns3_dir = self.ns3_dir.clone().ok_or(Error::MissingNs3Dir)?;
                Ok(Backend::Ns3 { ns3_dir })
            }
        }
    }

    fn config_from_flags(&self) -> ExperimentConfig {
        let edge = |ms: u64| LinkSpec::new(Mbps::new(self.edge_rate), Millisecs::new(ms));
        let edges = match self.edge_delay.as_slice() {
            [ms] => EdgeLinks::Uniform(edge(*ms)),
            delays => EdgeLinks::PerFlow(delays.iter().map(|&ms| edge(ms)).collect()),
        };
        let topology = DumbbellSpec::builder()
            .left_count(self.n_left)
            .right_count(self.n_right)
            .bottleneck(LinkSpec::new(
                Mbps::new(self.bottleneck_rate),
                Millisecs::new(self.bottleneck_delay),
            ))
            .left_links(edges.clone())
            .right_links(edges)
            .build();
        let flows = FlowConfig::builder()
            .count(self.flows.unwrap_or(self.n_left))
            .protocol(self.protocol)
            .build();
        let mut config = ExperimentConfig::builder()
            .topology(topology)
            .flows(flows)
            .stop_time(Secs::new(self.stop_time))
            .build();
        config.stack.cc = self.cc;
        config.stack.del_ack_count = self.del_ack_count;
        config.stack.pacing = Pacing {
            enabled: self.pacing,
            max_rate: self.pacing_rate.map(|r| BitsPerSec::from(Mbps::new(r))),
        };
        config.queue.kind = self.queue_disc;
        config.queue.limit = Packets::new(self.queue_limit);
        config.telemetry.period = Millisecs::new(self.period).into();
        config
    }
}

// Enum flags take the same names as experiment files
fn parse_enum<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_owned())).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use bottleneck_core::units::Nanosecs;

    use super::*;

    #[test]
    fn flags_build_a_config() -> anyhow::Result<()> {
        let session = Session::try_parse_from([
            "bottleneck",
            "--n-left",
            "2",
            "--n-right",
            "2",
            "--edge-delay",
            "5",
            "--edge-delay",
            "25",
            "--cc",
            "cubic",
            "--queue-disc",
            "codel",
            "--stop-time",
            "10",
            "--output-dir",
            "out",
        ])?;
        let config = session.config()?;
        config.validate()?;
        assert_eq!(config.flows.count, 2);
        assert_eq!(config.stack.cc, CcKind::Cubic);
        assert_eq!(config.queue.kind, QueueDiscKind::CoDel);
        assert_eq!(config.stop_time, Secs::new(10).into());
        assert_eq!(config.output.dir, PathBuf::from("out"));
        let EdgeLinks::PerFlow(links) = &config.topology.left_links else {
            panic!("expected per-flow edge links");
        };
        assert_eq!(links[1].delay, Millisecs::new(25).into());
        assert_eq!(
            session.backend()?,
            Backend::Fluid {
                step: Nanosecs::new(1_000_000)
            }
        );
        Ok(())
    }

    #[test]
    fn single_edge_delay_is_uniform() -> anyhow::Result<()> {
        let config = Session::try_parse_from(["bottleneck"])?.config()?;
        assert!(matches!(config.topology.left_links, EdgeLinks::Uniform(_)));
        assert_eq!(config.flows.count, 1);
        Ok(())
    }

    #[test]
    fn ns3_needs_a_tree() -> anyhow::Result<()> {
        let session = Session::try_parse_from(["bottleneck", "--backend", "ns3"])?;
        assert!(matches!(session.backend(), Err(Error::MissingNs3Dir)));
        Ok(())
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        for (flag, value) in [
            ("--stop-time", "20000000000"),
            ("--period", "20000000000000"),
            ("--edge-delay", "20000000000000"),
            ("--bottleneck-rate", "20000000000000"),
        ] {
            assert!(
                Session::try_parse_from(["bottleneck", flag, value]).is_err(),
                "{flag} {value}"
            );
        }
        let max = MAX_SECS.to_string();
        let session = Session::try_parse_from(["bottleneck", "--stop-time", max.as_str()]);
        assert!(session.is_ok());
    }

    #[test]
    fn unknown_cc_is_rejected() {
        assert!(Session::try_parse_from(["bottleneck", "--cc", "reno2"]).is_err());
    }
}
