use std::fs::{read, read_dir, read_to_string};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use nix::unistd::{sysconf, SysconfVar};

use super::{ProcError, ProcessTable};

/// Length limit of `/proc/<pid>/comm`, longer names are truncated to it.
const TASK_COMM_LEN: usize = 15;

/// `ProcessTable` backed by procfs.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
    clk_tck: f64,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcFs {
    pub fn new() -> Self {
        let clk_tck = match sysconf(SysconfVar::CLK_TCK) {
            Ok(Some(t)) if t > 0 => t as f64,
            _ => 100.0,
        };
        Self {
            root: PathBuf::from("/proc"),
            clk_tck,
        }
    }

    fn stat(&self, pid: u32) -> Result<Stat, ProcError> {
        let path = self.root.join(pid.to_string()).join("stat");
        let content = read_to_string(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ProcError::NoSuchProcess(pid)
            } else {
                ProcError::Io(e)
            }
        })?;
        parse_stat(&content).ok_or(ProcError::Malformed(pid))
    }

    /// Name the way psutil reports it: `comm`, or the base name of argv[0] when
    /// `comm` was truncated.
    fn name(&self, pid: u32) -> Option<String> {
        let dir = self.root.join(pid.to_string());
        let comm = read_to_string(dir.join("comm")).ok()?;
        let comm = comm.trim_end_matches('\n').to_string();
        if comm.len() >= TASK_COMM_LEN {
            if let Some(full) = read(dir.join("cmdline"))
                .ok()
                .and_then(|c| argv0_name(&c))
                .filter(|n| n.starts_with(&comm))
            {
                return Some(full);
            }
        }
        Some(comm)
    }

    fn pids(&self) -> Vec<u32> {
        let mut pids = match read_dir(&self.root) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
                .collect::<Vec<u32>>(),
            Err(e) => {
                log::debug!("failed to list {}: {}", self.root.display(), e);
                Vec::new()
            }
        };
        pids.sort_unstable();
        pids
    }
}

impl ProcessTable for ProcFs {
    fn is_alive(&self, pid: u32) -> bool {
        match self.stat(pid) {
            Ok(stat) => !matches!(stat.state, 'Z' | 'X' | 'x'),
            Err(_) => false,
        }
    }

    fn cpu_usage(&self, pid: u32, sample: Duration) -> Result<f32, ProcError> {
        let before = self.stat(pid)?;
        let start = Instant::now();
        sleep(sample);
        let after = self.stat(pid)?;
        let elapsed = start.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return Ok(0.0);
        }
        let ticks = after.cpu_ticks().saturating_sub(before.cpu_ticks()) as f64;
        Ok((ticks / self.clk_tck / elapsed * 100.0) as f32)
    }

    fn find_by_name(&self, name: &str) -> Vec<u32> {
        self.pids()
            .into_iter()
            .filter(|&pid| {
                self.name(pid)
                    .map(|n| n.eq_ignore_ascii_case(name))
                    .unwrap_or(false)
                    && self.is_alive(pid)
            })
            .collect()
    }

    fn parent_of(&self, pid: u32) -> Option<u32> {
        self.stat(pid).ok().map(|s| s.ppid)
    }
}

/// The fields of `/proc/<pid>/stat` we care about.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Stat {
    state: char,
    ppid: u32,
    utime: u64,
    stime: u64,
}

impl Stat {
    fn cpu_ticks(&self) -> u64 {
        self.utime + self.stime
    }
}

fn parse_stat(content: &str) -> Option<Stat> {
    // comm may contain spaces and parentheses, fields restart after the last ')'.
    let end = content.rfind(')')?;
    let fields = content[end + 1..].split_whitespace().collect::<Vec<_>>();
    if fields.len() < 13 {
        return None;
    }
    Some(Stat {
        state: fields[0].chars().next()?,
        ppid: fields[1].parse().ok()?,
        utime: fields[11].parse().ok()?,
        stime: fields[12].parse().ok()?,
    })
}

fn argv0_name(cmdline: &[u8]) -> Option<String> {
    let argv0 = cmdline.split(|&b| b == 0).next()?;
    if argv0.is_empty() {
        return None;
    }
    let argv0 = String::from_utf8_lossy(argv0);
    Path::new(argv0.as_ref())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}
