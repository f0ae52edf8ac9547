//! Observing processes the supervisor did not necessarily spawn.

use std::time::Duration;

use thiserror::Error;

pub mod linux;

pub use linux::ProcFs;

/// Read-only view of the process table.
///
/// Killing is left to whoever owns a process, see `supervisor::launch`.
pub trait ProcessTable {
    /// Whether `pid` exists and has not exited. Zombies count as exited.
    fn is_alive(&self, pid: u32) -> bool;
    /// Cpu usage of `pid` in percent of one core, sampled over `sample`.
    fn cpu_usage(&self, pid: u32, sample: Duration) -> Result<f32, ProcError>;
    /// Pids of live processes named `name`, ignoring ascii case, in ascending order.
    fn find_by_name(&self, name: &str) -> Vec<u32>;
    fn parent_of(&self, pid: u32) -> Option<u32>;

    /// Whether `ancestor` is `pid` or one of its ancestors.
    fn descends_from(&self, pid: u32, ancestor: u32) -> bool {
        const MAX_DEPTH: usize = 64;

        let mut current = pid;
        for _ in 0..MAX_DEPTH {
            if current == ancestor {
                return true;
            }
            match self.parent_of(current) {
                Some(p) if p != 0 && p != current => current = p,
                _ => return false,
            }
        }
        false
    }
}

#[derive(Debug, Error)]
pub enum ProcError {
    #[error("no such process: {0}")]
    NoSuchProcess(u32),
    #[error("malformed status of process {0}")]
    Malformed(u32),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
