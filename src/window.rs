//! Asking a process to close its top-level windows.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::config::Config;

/// Window-close facility.
pub trait CloseWindows: Send + Sync {
    /// Requests graceful closure of every top-level window owned by `pid`,
    /// returning how many requests were sent. Never waits for the windows to
    /// actually close.
    fn close_windows(&self, pid: u32) -> Result<usize, WindowError>;
}

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("window tool '{0}' not available")]
    Unavailable(String),
    #[error("window tool failed: {0}")]
    Failed(String),
    #[error("spawn: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Picks the facility configured in `config`.
pub fn closer(config: &Config) -> Arc<dyn CloseWindows> {
    match config.window_tool.as_ref() {
        Some(tool) => Arc::new(Wmctrl::new(tool.clone())),
        None => Arc::new(NoWindows),
    }
}

/// Does nothing, for headless hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWindows;

impl CloseWindows for NoWindows {
    fn close_windows(&self, _pid: u32) -> Result<usize, WindowError> {
        Ok(0)
    }
}

/// Closes windows through the EWMH `wmctrl` tool.
#[derive(Debug)]
pub struct Wmctrl {
    bin: PathBuf,
    warned: AtomicBool,
}

impl Wmctrl {
    pub fn new(bin: PathBuf) -> Self {
        Self {
            bin,
            warned: AtomicBool::new(false),
        }
    }

    fn list(&self) -> Result<String, WindowError> {
        let output = Command::new(&self.bin)
            .args(&["-l", "-p"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    WindowError::Unavailable(self.bin.display().to_string())
                } else {
                    WindowError::Spawn(e)
                }
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WindowError::Failed(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl CloseWindows for Wmctrl {
    fn close_windows(&self, pid: u32) -> Result<usize, WindowError> {
        let list = match self.list() {
            Err(WindowError::Unavailable(tool)) => {
                if !self.warned.swap(true, Ordering::Relaxed) {
                    log::warn!("{} not found, windows will not be closed", tool);
                }
                return Err(WindowError::Unavailable(tool));
            }
            r => r?,
        };

        let mut sent = 0;
        for (id, _) in parse_window_list(&list)
            .into_iter()
            .filter(|&(_, owner)| owner == pid)
        {
            let status = Command::new(&self.bin)
                .args(&["-i", "-c", &id])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            match status {
                Ok(s) if s.success() => sent += 1,
                Ok(s) => log::debug!("closing window {} of {}: {}", id, pid, s),
                Err(e) => log::debug!("closing window {} of {}: {}", id, pid, e),
            }
        }
        Ok(sent)
    }
}

/// Parses `wmctrl -l -p` output into `(window id, owner pid)` pairs.
fn parse_window_list(list: &str) -> Vec<(String, u32)> {
    list.lines()
        .filter_map(|l| {
            let mut cols = l.split_whitespace();
            let id = cols.next()?;
            let _desktop = cols.next()?;
            let pid = cols.next()?.parse().ok()?;
            Some((id.to_string(), pid))
        })
        .collect()
}
