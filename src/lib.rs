//! Runtracer drives a target program under an instrumentation engine, one corpus
//! file at a time, and leaves a coverage trace per input in the output directory.
//!
//! Hanging runs are coerced by closing the target's windows and killed when that
//! does not help. Several independent workers may share one input and output
//! directory, coordinating only through the existence of trace files.

#[macro_use]
extern crate lazy_static;

pub mod config;
pub mod coordinator;
pub mod corpus;
pub mod process;
pub mod supervisor;
pub mod suppressor;
pub mod utils;
pub mod window;

#[cfg(test)]
mod testutil;

use std::fs::create_dir_all;

use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::coordinator::{Coordinator, Stats};
use crate::process::ProcFs;
use crate::supervisor::Supervisor;
use crate::utils::StopSoon;

/// Errors that end the whole run. Everything going wrong with a single input is
/// a `supervisor::RunOutcome` instead.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("cancelled")]
    Cancelled,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Traces the whole corpus described by `config`, stopping early once `stop` is
/// requested.
pub fn start(config: Config, stop: StopSoon) -> Result<Stats, TraceError> {
    config.check()?;
    create_dir_all(&config.output_dir).map_err(|err| ConfigError::OutputDir {
        dir: config.output_dir.display().to_string(),
        err,
    })?;

    log::info!("initializing tracer");
    let items = corpus::enumerate(&config, &mut rand::thread_rng())?;

    let procs = ProcFs::new();
    let windows = window::closer(&config);
    let supervisor = Supervisor::new(&config, &procs, windows, &stop);
    let mut coordinator = Coordinator::new(supervisor);

    if config.create_base {
        coordinator.trace_baseline()?;
    }
    coordinator.run(&items)?;
    Ok(coordinator.into_stats())
}
