//! Runs whole experiments in ns-3.
//!
//! ns-3 owns its clock and its samplers, so it cannot be driven callback by callback. Instead the
//! experiment is planned here, handed to the scratch program through [`ns3_frontend`], and the
//! flow-monitor counters it reports are summarized like any other engine's.

use std::path::PathBuf;

use bottleneck_core::{
    engine::EngineError,
    experiment::{self, Error, Experiment, Report},
    ExperimentConfig,
};
use ns3_frontend::{Ns3Experiment, DEFAULT_PROGRAM};

/// An ns-3 installation.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct Ns3Backend {
    /// The root of the ns-3 source tree.
    #[builder(setter(into))]
    ns3_dir: PathBuf,
    /// The scratch program implementing the experiment.
    #[builder(default = DEFAULT_PROGRAM.to_owned(), setter(into))]
    program: String,
}

impl Ns3Backend {
    /// Runs `config` to completion. Time series are written by ns-3 into the output directory;
    /// the summary is written here.
    pub fn run(&self, config: ExperimentConfig) -> Result<Report, Error> {
        let experiment = Experiment::new(config);
        let (topology, flows) = experiment.plan()?;
        let output_dir = experiment::prepare_output_dir(&experiment.config().output)?;

        log::info!("Running {} in ns-3", self.program);
        let sim = Ns3Experiment::builder()
            .ns3_dir(&self.ns3_dir)
            .data_dir(&output_dir)
            .program(self.program.clone())
            .config(experiment.config().clone())
            .topology(topology)
            .flows(flows.clone())
            .build();
        let counters = sim
            .run()
            .map_err(|e| EngineError::Backend(anyhow::Error::new(e)))?;

        let summaries = experiment::summarize(&flows, counters);
        experiment::write_summary(&output_dir, &summaries)?;
        Ok(Report {
            output_dir,
            flows,
            summaries,
            skipped_samples: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bottleneck_core::{
        config::{ConfigError, FlowConfig},
        link::LinkSpec,
        topology::DumbbellSpec,
        units::{Mbps, Millisecs, Secs},
    };

    fn config(dir: &std::path::Path) -> ExperimentConfig {
        let edge = LinkSpec::new(Mbps::new(1000), Millisecs::new(5));
        let mut cfg = ExperimentConfig::builder()
            .topology(
                DumbbellSpec::builder()
                    .left_count(1)
                    .right_count(1)
                    .bottleneck(LinkSpec::new(Mbps::new(10), Millisecs::new(10)))
                    .left_links(edge)
                    .right_links(edge)
                    .build(),
            )
            .flows(FlowConfig::builder().count(1).build())
            .stop_time(Secs::new(1))
            .build();
        cfg.output.dir = dir.join("results");
        cfg
    }

    #[test]
    fn missing_ns3_is_a_backend_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = Ns3Backend::builder()
            .ns3_dir(dir.path().join("no-ns3-here"))
            .build();
        let res = backend.run(config(dir.path()));
        assert!(matches!(res, Err(Error::Engine(EngineError::Backend(_)))));
        // Inputs are rendered before ns-3 is invoked
        let results = dir.path().join("results");
        for file in ["config.txt", "topology.txt", "flows.txt"] {
            assert!(results.join(file).exists(), "{file} is missing");
        }
        Ok(())
    }

    #[test]
    fn invalid_config_writes_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cfg = config(dir.path());
        cfg.flows.count = 0;
        let backend = Ns3Backend::builder().ns3_dir(dir.path()).build();
        let res = backend.run(cfg);
        assert!(matches!(res, Err(Error::Config(ConfigError::NoFlows))));
        assert!(!dir.path().join("results").exists());
        Ok(())
    }
}
