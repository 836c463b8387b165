//! Reads experiment descriptions and runs them on a chosen backend.

use std::path::{Path, PathBuf};

use bottleneck_core::{Experiment, ExperimentConfig, Report};
use engine_impls::{FluidEngine, Ns3Backend};

pub mod session;

pub use session::Session;

/// Reads an [`ExperimentConfig`] from a JSON or Dhall file, picked by extension.
pub fn read_config(path: impl AsRef<Path>) -> Result<ExperimentConfig, Error> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)?,
        Some("dhall") => serde_dhall::from_str(&contents).parse()?,
        _ => return Err(Error::UnknownFileType(path.into())),
    };
    Ok(config)
}

pub fn run_from_file(config: impl AsRef<Path>, backend: &Backend) -> Result<Report, Error> {
    run(read_config(config)?, backend)
}

pub fn run(config: ExperimentConfig, backend: &Backend) -> Result<Report, Error> {
    log::info!("Using backend {backend:?}");
    let report = match backend {
        Backend::Fluid { step } => {
            let engine = FluidEngine::builder().step(*step).build();
            Experiment::new(config).run(engine)?
        }
        Backend::Ns3 { ns3_dir } => Ns3Backend::builder()
            .ns3_dir(ns3_dir)
            .build()
            .run(config)?,
    };
    Ok(report)
}

/// Where an experiment runs.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The in-process fluid engine, integrating in steps of `step`.
    Fluid {
        step: bottleneck_core::units::Nanosecs,
    },
    /// An ns-3 source tree with the experiment's scratch program.
    Ns3 { ns3_dir: PathBuf },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown file type: {0}")]
    UnknownFileType(PathBuf),

    #[error("Dhall error")]
    Dhall(#[from] serde_dhall::Error),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("the ns3 backend needs --ns3-dir")]
    MissingNs3Dir,

    #[error("failed to run the experiment")]
    Experiment(#[from] bottleneck_core::Error),
}
