//! This module runs one experiment from a validated [`ExperimentConfig`] to a [`Report`].

use std::cell::RefCell;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::config::{ConfigError, ExperimentConfig, OutputConfig};
use crate::counters::{FlowCounters, FlowKey, FlowSummary};
use crate::engine::{EngineError, NetworkEngine};
use crate::flows::{self, FlowDescriptor, FlowId, FlowProvisioner, Orientation};
use crate::telemetry::{
    self, CwndSampler, DirSink, QueueSampler, ResourceError, SeriesSink, ThroughputSampler,
};
use crate::topology::{Side, Topology, TopologyError};
use crate::units::Nanosecs;

/// The format of timestamped output directory names.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y-%I-%M-%S";

/// A single, non-restartable experiment.
#[derive(Debug, Clone)]
pub struct Experiment {
    config: ExperimentConfig,
}

impl Experiment {
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Validates the configuration, builds the topology and provisions its flows without
    /// touching any engine.
    pub fn plan(&self) -> Result<(Topology, Vec<FlowDescriptor>), Error> {
        let cfg = &self.config;
        cfg.validate()?;
        let topology = cfg.topology.build()?;
        log::info!(
            "Built a {}x{} dumbbell ({} segments)",
            cfg.topology.left_count,
            cfg.topology.right_count,
            topology.nr_segments()
        );
        let flows = FlowProvisioner::builder()
            .base_port(cfg.flows.base_port)
            .orientation(cfg.flows.orientation)
            .timing(cfg.flows.timing.clone())
            .build()
            .provision(
                &topology,
                cfg.flows.count,
                cfg.flows.protocol,
                Nanosecs::ZERO,
                cfg.stop_time,
            )?;
        Ok((topology, flows))
    }

    /// Runs the experiment on `engine` and tears the engine down afterwards.
    ///
    /// The steps are, in order: [plan](Self::plan) the experiment, configure stack defaults,
    /// install the topology, compute routes, install flows, prepare the output directory, attach
    /// samplers, run to the stop time, and write the per-flow summary. Nothing touches the engine
    /// if planning fails.
    pub fn run<E>(self, mut engine: E) -> Result<Report, Error>
    where
        E: NetworkEngine + 'static,
    {
        let (topology, flows) = self.plan()?;
        let cfg = self.config;

        log::info!(
            "Configuring stacks ({}, {:?} queues)",
            cfg.stack.cc.as_str(),
            cfg.queue.kind
        );
        engine.configure_stack(&cfg.stack, &cfg.queue)?;
        engine.install_topology(&topology)?;
        engine.compute_routes()?;
        flows::install(&flows, &mut engine)?;
        log::info!("Installed {} {} flows", flows.len(), cfg.flows.protocol.as_str());

        let output_dir = prepare_output_dir(&cfg.output)?;
        if cfg.output.topology_snapshot {
            write_topology(&output_dir, &topology)?;
        }
        if cfg.output.pcap {
            engine.enable_pcap(&output_dir)?;
        }

        let tel = &cfg.telemetry;
        let throughput = if tel.throughput {
            let sampler = Rc::new(RefCell::new(ThroughputSampler::for_flows(
                &flows,
                tel.counter,
                DirSink::new(&output_dir)?,
            )));
            telemetry::attach(&mut engine, Rc::clone(&sampler), tel.first_tick, tel.period);
            Some(sampler)
        } else {
            None
        };
        let cwnd = if tel.cwnd {
            let sampler = Rc::new(RefCell::new(CwndSampler::new(
                flows.iter().map(|f| f.id).collect(),
                cfg.stack.segment_size,
                DirSink::new(&output_dir)?,
            )));
            telemetry::attach(&mut engine, Rc::clone(&sampler), tel.first_tick, tel.period);
            Some(sampler)
        } else {
            None
        };
        let queue = if tel.queue {
            // Data crosses the bottleneck from the sending side's router
            let side = match cfg.flows.orientation {
                Orientation::RightToLeft => Side::Right,
                Orientation::LeftToRight => Side::Left,
            };
            let sampler = Rc::new(RefCell::new(QueueSampler::new(
                topology.bottleneck_egress(side),
                DirSink::new(&output_dir)?,
            )));
            telemetry::attach(&mut engine, Rc::clone(&sampler), tel.first_tick, tel.period);
            Some(sampler)
        } else {
            None
        };

        log::info!("Running until {}", cfg.stop_time);
        engine.run(cfg.stop_time)?;

        let mut skipped_samples = 0;
        if let Some(sampler) = &throughput {
            let mut sampler = sampler.borrow_mut();
            skipped_samples = sampler.skipped();
            sampler.sink_mut().flush()?;
        }
        if let Some(sampler) = &cwnd {
            sampler.borrow_mut().sink_mut().flush()?;
        }
        if let Some(sampler) = &queue {
            sampler.borrow_mut().sink_mut().flush()?;
        }
        if skipped_samples > 0 {
            log::warn!("{skipped_samples} throughput samples were skipped");
        }

        let summaries = summarize(&flows, engine.flow_counters());
        write_summary(&output_dir, &summaries)?;

        engine.destroy()?;
        Ok(Report {
            output_dir,
            flows,
            summaries,
            skipped_samples,
        })
    }
}

/// Summaries for every key the counter source reported: provisioned flows first, in flow order,
/// then everything else ordered by address.
pub fn summarize(flows: &[FlowDescriptor], counters: Vec<FlowCounters>) -> Vec<FlowSummary> {
    let by_key = flows
        .iter()
        .map(|f| (f.key(), f.id))
        .collect::<FxHashMap<FlowKey, FlowId>>();
    counters
        .iter()
        .map(|c| {
            let flow = by_key
                .get(&c.key)
                .or_else(|| by_key.get(&c.key.any_src_port()))
                .copied();
            (c.key, FlowSummary::new(c, flow))
        })
        .sorted_by_key(|(key, s)| (s.flow.is_none(), s.flow, key.src, key.dst))
        .map(|(_, s)| s)
        .collect()
}

/// Creates the output directory, under a timestamped subdirectory if requested.
pub fn prepare_output_dir(output: &OutputConfig) -> Result<PathBuf, ResourceError> {
    let dir = if output.timestamped {
        let stamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        output.dir.join(stamp)
    } else {
        output.dir.clone()
    };
    fs::create_dir_all(&dir).map_err(|source| ResourceError::CreateDir {
        path: dir.clone(),
        source,
    })?;
    log::info!("Writing results to {}", dir.display());
    Ok(dir)
}

/// Writes `summary.txt` into `dir`, one [`FlowSummary::to_line`] per line.
pub fn write_summary(dir: &Path, summaries: &[FlowSummary]) -> Result<(), ResourceError> {
    let mut lines = summaries
        .iter()
        .map(|s| s.to_line())
        .collect::<Vec<_>>()
        .join("\n");
    lines.push('\n');
    write_file(&dir.join("summary.txt"), &lines)?;
    for s in summaries.iter().filter(|s| s.flow.is_some()) {
        log::info!(
            "{} -> {}: {} tx, {} rx, {}",
            s.src,
            s.dst,
            s.tx_bytes,
            s.rx_bytes,
            s.throughput
        );
    }
    Ok(())
}

/// Writes `topology.txt` into `dir`.
pub fn write_topology(dir: &Path, topology: &Topology) -> Result<(), ResourceError> {
    write_file(&dir.join("topology.txt"), &topology.to_snapshot())
}

fn write_file(path: &Path, contents: &str) -> Result<(), ResourceError> {
    let mut f = File::create(path).map_err(|source| ResourceError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    f.write_all(contents.as_bytes())
        .map_err(|source| ResourceError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// What an experiment produced.
#[derive(Debug, Clone)]
pub struct Report {
    /// The directory all files were written to.
    pub output_dir: PathBuf,
    pub flows: Vec<FlowDescriptor>,
    /// One entry per counter key, provisioned flows first.
    pub summaries: Vec<FlowSummary>,
    /// Throughput observations that produced no rate.
    pub skipped_samples: usize,
}

impl Report {
    pub fn summary_of(&self, flow: FlowId) -> Option<&FlowSummary> {
        self.summaries.iter().find(|s| s.flow == Some(flow))
    }
}

/// An error type for [`Experiment::run`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    #[error("failed to build the topology")]
    Topology(#[from] TopologyError),

    #[error("failed to write results")]
    Resource(#[from] ResourceError),

    #[error("engine failure")]
    Engine(#[source] EngineError),
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        match e {
            // Callbacks fail only when samplers cannot write
            EngineError::Resource(e) => Error::Resource(e),
            e => Error::Engine(e),
        }
    }
}
