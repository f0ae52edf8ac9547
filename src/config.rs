//! Runtime policy, read once at startup.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Suffix appended to an input name to form its trace file name.
pub const DEFAULT_TRACE_SUFFIX: &str = "-trace.txt";
/// Name of the trace produced by the no-input baseline run.
pub const DEFAULT_BASE_TRACE: &str = "base.txt";

/// Location of the instrumentation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Executable that instruments and launches the target.
    pub launcher: PathBuf,
    /// Coverage tool loaded by the launcher.
    pub tool: PathBuf,
}

impl EngineConfig {
    /// Standard layout of a pin installation with the RunTracer tool built.
    pub fn from_install_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            launcher: dir.join("pin"),
            tool: dir
                .join("source")
                .join("tools")
                .join("RunTracer")
                .join("obj-intel64")
                .join("ccovtrace.so"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory of input files to trace.
    pub input_dir: PathBuf,
    /// Directory trace files are written to, shared between parallel workers.
    pub output_dir: PathBuf,
    pub trace_suffix: String,
    pub base_trace: String,
    pub engine: EngineConfig,
    /// Application under trace.
    pub target: PathBuf,
    /// Per run time budget, counted in polls of `poll_interval` (seconds by default).
    pub max_time: u64,
    /// Progress is reported every `report_every` items.
    pub report_every: u64,
    /// Tool used to close windows, `None` disables window closing entirely.
    pub window_tool: Option<PathBuf>,

    pub poll_interval: Duration,
    pub cpu_sample: Duration,
    /// Cpu usage in percent below which a process is considered idle.
    pub cpu_threshold: f32,
    pub resolve_attempts: u32,

    /// Trace the target once without any input before the corpus.
    pub create_base: bool,
    /// Run a dialog suppressor alongside every supervised process.
    pub kill_windows: bool,
    pub parallel: bool,
    pub delete_traced: bool,
    pub delete_failed: bool,
    pub skip_traced: bool,
    /// Run each input without instrumentation first.
    pub test_each: bool,
    /// Report progress every `report_every` inputs.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("downloads"),
            output_dir: PathBuf::from("traced"),
            trace_suffix: DEFAULT_TRACE_SUFFIX.to_string(),
            base_trace: DEFAULT_BASE_TRACE.to_string(),
            engine: EngineConfig::from_install_dir("pintool"),
            target: PathBuf::new(),
            max_time: 120,
            report_every: 100,
            window_tool: Some(PathBuf::from("wmctrl")),

            poll_interval: Duration::from_secs(1),
            cpu_sample: Duration::from_millis(500),
            cpu_threshold: 1.0,
            resolve_attempts: 5,

            create_base: false,
            kill_windows: false,
            parallel: false,
            delete_traced: false,
            delete_failed: false,
            skip_traced: false,
            test_each: false,
            verbose: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("input directory not found: {0}")]
    MissingInputDir(String),
    #[error("target not found: {0}")]
    MissingTarget(String),
    #[error("instrumentation engine not found: {0}")]
    MissingEngine(String),
    #[error("invalid max time '{0}': should be greater than 0")]
    InvalidMaxTime(u64),
    #[error("invalid report interval '{0}': should be greater than 0")]
    InvalidReportInterval(u64),
    #[error("failed to create output directory {dir}: {err}")]
    OutputDir { dir: String, err: std::io::Error },
}

impl Config {
    pub fn check(&self) -> Result<(), ConfigError> {
        if !self.input_dir.is_dir() {
            return Err(ConfigError::MissingInputDir(
                self.input_dir.display().to_string(),
            ));
        }
        if !self.target.is_file() {
            return Err(ConfigError::MissingTarget(self.target.display().to_string()));
        }
        if !self.engine.launcher.is_file() {
            return Err(ConfigError::MissingEngine(
                self.engine.launcher.display().to_string(),
            ));
        }
        if !self.engine.tool.exists() {
            return Err(ConfigError::MissingEngine(
                self.engine.tool.display().to_string(),
            ));
        }
        if self.max_time == 0 {
            return Err(ConfigError::InvalidMaxTime(self.max_time));
        }
        if self.report_every == 0 {
            return Err(ConfigError::InvalidReportInterval(self.report_every));
        }
        Ok(())
    }

    /// Path of the trace file belonging to input `name`.
    pub fn trace_path<T: AsRef<OsStr>>(&self, name: T) -> PathBuf {
        let mut file_name = name.as_ref().to_os_string();
        file_name.push(&self.trace_suffix);
        self.output_dir.join(file_name)
    }

    pub fn input_path<T: AsRef<OsStr>>(&self, name: T) -> PathBuf {
        self.input_dir.join(name.as_ref())
    }

    pub fn base_trace_path(&self) -> PathBuf {
        self.output_dir.join(&self.base_trace)
    }

    /// Base name of the target, used to find it among running processes.
    pub fn target_name(&self) -> String {
        self.target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
