//! Corpus enumeration and the advisory claim rule shared by parallel workers.
//!
//! Claiming is "at-least-once": a worker treats an input as taken as soon as a
//! trace file for it exists, there is no lock. Two workers racing on the same
//! input may both trace it, which is accepted.

use std::ffi::{OsStr, OsString};
use std::fs::{metadata, read_dir};
use std::path::{Path, PathBuf};

use rand::{seq::SliceRandom, Rng};

use crate::config::{Config, ConfigError};

/// One input file, named relative to the input directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CorpusItem {
    name: OsString,
}

impl CorpusItem {
    pub fn new<T: Into<OsString>>(name: T) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &OsStr {
        &self.name
    }

    pub fn input_path(&self, config: &Config) -> PathBuf {
        config.input_path(&self.name)
    }

    pub fn trace_path(&self, config: &Config) -> PathBuf {
        config.trace_path(&self.name)
    }
}

/// Whether `path` holds a usable trace, i.e. exists and is not empty.
pub fn has_trace(path: &Path) -> bool {
    metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Whether the trace at `trace` means this worker should leave the input alone.
///
/// In parallel mode any trace file counts, even an empty one another worker just
/// created. In skip mode only a non-empty trace does.
pub fn is_claimed(config: &Config, trace: &Path) -> bool {
    (config.parallel && trace.exists()) || (config.skip_traced && has_trace(trace))
}

/// Snapshots the input directory.
///
/// Names come back sorted, or shuffled with `rng` in parallel mode so that
/// workers sharing the directory spread over it.
pub fn enumerate<R: Rng + ?Sized>(
    config: &Config,
    rng: &mut R,
) -> Result<Vec<CorpusItem>, ConfigError> {
    let missing = || ConfigError::MissingInputDir(config.input_dir.display().to_string());
    if !config.input_dir.is_dir() {
        return Err(missing());
    }
    let entries = read_dir(&config.input_dir).map_err(|_| missing())?;

    let mut items = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        match entry.file_type() {
            Ok(t) if t.is_file() => {}
            _ => continue,
        }
        let item = CorpusItem::new(entry.file_name());
        if is_claimed(config, &item.trace_path(config)) {
            continue;
        }
        items.push(item);
    }

    if config.parallel {
        items.shuffle(rng);
    } else {
        items.sort();
    }
    log::info!("corpus initialized, tracing {} files", items.len());
    Ok(items)
}
