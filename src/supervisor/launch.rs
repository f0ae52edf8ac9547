//! Spawning and killing the processes of one run.
//!
//! The process we spawn is not always the one worth watching: the
//! instrumentation engine launches the target as its own child. A run therefore
//! tracks either the launcher itself or a target resolved from it.

use std::os::unix::prelude::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::Duration;

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{setsid, Pid};

use crate::config::Config;
use crate::process::ProcessTable;
use crate::utils::{
    debug,
    io::{read_background, BackgroundIoHandle},
};

/// Command running the target under the instrumentation engine, tracing into
/// `trace`. Without `input` the target is started bare, for the baseline trace.
pub fn engine_command(config: &Config, input: Option<&Path>, trace: &Path) -> Command {
    let mut cmd = Command::new(&config.engine.launcher);
    cmd.arg("-t")
        .arg(&config.engine.tool)
        .arg("-o")
        .arg(trace)
        .arg("--")
        .arg(&config.target);
    if let Some(input) = input {
        cmd.arg(input);
    }
    cmd
}

/// Command running the target on `input` without instrumentation.
pub fn target_command(config: &Config, input: &Path) -> Command {
    let mut cmd = Command::new(&config.target);
    cmd.arg(input);
    cmd
}

/// What a run keeps an eye on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracked {
    /// The spawned process itself.
    Launcher(u32),
    /// A process found by name below (or besides) the launcher.
    Resolved(u32),
}

impl Tracked {
    pub fn pid(self) -> u32 {
        match self {
            Tracked::Launcher(pid) | Tracked::Resolved(pid) => pid,
        }
    }
}

/// A spawned process, killed together with everything it started when dropped
/// before being reaped.
pub struct Launched {
    child: Child,
    resolved: Option<u32>,
    reaped: bool,
    stdout: Option<BackgroundIoHandle>,
    stderr: Option<BackgroundIoHandle>,
}

impl Launched {
    /// Spawns `cmd` in a new session, so the whole process group can be killed
    /// and terminal interrupts only reach us. With `capture` its output is kept
    /// for diagnostics, otherwise discarded.
    pub fn spawn(mut cmd: Command, capture: bool) -> std::io::Result<Self> {
        cmd.stdin(Stdio::null());
        if capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        if debug() {
            log::debug!("spawning command:\n{:?}", cmd);
        }
        unsafe {
            cmd.pre_exec(|| {
                let _ = setsid();
                Ok(())
            });
        }
        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().map(read_background);
        let stderr = child.stderr.take().map(read_background);
        Ok(Self {
            child,
            resolved: None,
            reaped: false,
            stdout,
            stderr,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Remembers the resolved target so it is killed along with the launcher.
    pub fn adopt(&mut self, tracked: Tracked) {
        if let Tracked::Resolved(pid) = tracked {
            if pid != self.pid() {
                self.resolved = Some(pid);
            }
        }
    }

    /// Whether the launcher has not exited yet, reaping it if it has.
    pub fn is_running(&mut self) -> bool {
        if self.reaped {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                log::debug!("{} exited: {}", self.pid(), status);
                self.reaped = true;
                false
            }
            Err(e) => {
                log::debug!("failed to wait {}: {}", self.pid(), e);
                false
            }
        }
    }

    /// Whether `tracked` is still alive.
    pub fn is_alive<P: ProcessTable>(&mut self, tracked: Tracked, procs: &P) -> bool {
        match tracked {
            Tracked::Launcher(_) => self.is_running(),
            Tracked::Resolved(pid) => {
                let alive = procs.is_alive(pid);
                if !alive && self.resolved == Some(pid) {
                    self.resolved = None;
                }
                alive
            }
        }
    }

    /// Kills the resolved target, the launcher and its process group, then reaps
    /// the launcher.
    pub fn kill<P: ProcessTable>(&mut self, procs: &P) {
        const SETTLE_POLLS: usize = 50;
        const SETTLE_INTERVAL: Duration = Duration::from_millis(20);

        self.kill_all();
        // the resolved target is not our child, give it a moment to go away.
        if let Some(pid) = self.resolved.take() {
            for _ in 0..SETTLE_POLLS {
                if !procs.is_alive(pid) {
                    break;
                }
                sleep(SETTLE_INTERVAL);
            }
        }
    }

    /// Last output captured from the launcher.
    pub fn output(&self) -> String {
        let mut out = String::new();
        for h in self.stdout.iter().chain(self.stderr.iter()) {
            out.push_str(&h.current_string());
        }
        out
    }

    fn kill_all(&mut self) {
        if let Some(pid) = self.resolved {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                log::debug!("failed to kill {}: {}", pid, e);
            }
        }
        if self.reaped {
            return;
        }
        let pgid = Pid::from_raw(self.pid() as i32);
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            log::debug!("failed to kill group {}: {}", pgid, e);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for Launched {
    fn drop(&mut self) {
        self.kill_all();
    }
}
