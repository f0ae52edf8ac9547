//! Supervising one run of the target, instrumented or not.

use std::fs::{create_dir_all, remove_file};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::corpus::has_trace;
use crate::process::ProcessTable;
use crate::suppressor::DialogSuppressor;
use crate::utils::StopSoon;
use crate::window::{CloseWindows, WindowError};
use crate::TraceError;

use self::launch::{engine_command, target_command, Launched, Tracked};
use self::phase::{pretest_plan, trace_plan, PhaseMachine, Stage};

pub mod launch;
pub mod phase;

/// Polls granted to the engine launcher to flush the trace once the tracked
/// target has exited.
pub const ENGINE_FLUSH_POLLS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Process exited on its own and, for traced runs, left a non-empty trace.
    Success,
    /// Still alive after every phase, killed.
    TimedOut,
    /// Uninstrumented run did not finish in time, killed.
    PreTestFailed,
    /// Input vanished or was claimed by another worker.
    Skipped,
    /// Process exited without leaving a usable trace.
    ArtifactMissing,
    /// Target or engine could not be spawned.
    LaunchFailed,
}

/// How the poll loop of a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    Exited,
    Expired,
}

pub struct Supervisor<'a, P> {
    config: &'a Config,
    procs: &'a P,
    windows: Arc<dyn CloseWindows>,
    stop: &'a StopSoon,
}

impl<'a, P: ProcessTable> Supervisor<'a, P> {
    pub fn new(
        config: &'a Config,
        procs: &'a P,
        windows: Arc<dyn CloseWindows>,
        stop: &'a StopSoon,
    ) -> Self {
        Self {
            config,
            procs,
            windows,
            stop,
        }
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn stop(&self) -> &'a StopSoon {
        self.stop
    }

    /// Runs the target on `input` without instrumentation, killing it if it hangs.
    ///
    /// A hanging input is a poison input: it is removed when `delete_failed` is
    /// configured. `Success` means the target exited on its own.
    pub fn pretest(&self, input: &Path) -> Result<RunOutcome, TraceError> {
        if !input.exists() {
            return Ok(RunOutcome::Skipped);
        }
        let mut run = match Launched::spawn(target_command(self.config, input), false) {
            Ok(run) => run,
            Err(e) => {
                log::warn!("failed to start {}: {}", self.config.target.display(), e);
                return Ok(RunOutcome::LaunchFailed);
            }
        };
        self.stop.nap(self.config.poll_interval)?;

        let tracked = Tracked::Launcher(run.pid());
        let mut suppressor = self.suppress(tracked);
        let ended = self.supervise(&mut run, tracked, pretest_plan(self.config.max_time))?;
        if let Some(s) = suppressor.as_mut() {
            s.halt();
        }

        if ended == Ended::Exited {
            return Ok(RunOutcome::Success);
        }
        run.kill(self.procs);
        log::warn!("test failed: {}", file_name(input));
        if self.config.delete_failed {
            log::warn!("removing failed file {}", input.display());
            if let Err(e) = remove_file(input) {
                log::warn!("failed to remove {}: {}", input.display(), e);
            }
        }
        Ok(RunOutcome::PreTestFailed)
    }

    /// Runs the target on `input` under the instrumentation engine, tracing into
    /// `trace`. Without `input` the target is traced bare.
    pub fn trace(&self, input: Option<&Path>, trace: &Path) -> Result<RunOutcome, TraceError> {
        if let Some(input) = input {
            if !input.exists() {
                return Ok(RunOutcome::Skipped);
            }
        }
        if let Some(dir) = trace.parent() {
            if let Err(e) = create_dir_all(dir) {
                log::warn!("failed to create {}: {}", dir.display(), e);
                return Ok(RunOutcome::LaunchFailed);
            }
        }
        let label = input.map(file_name).unwrap_or_else(|| "<base>".to_string());

        let cmd = engine_command(self.config, input, trace);
        let mut run = match Launched::spawn(cmd, true) {
            Ok(run) => run,
            Err(e) => {
                log::warn!(
                    "failed to start {}: {}",
                    self.config.engine.launcher.display(),
                    e
                );
                return Ok(RunOutcome::LaunchFailed);
            }
        };
        let tracked = self.resolve(&mut run)?;
        run.adopt(tracked);

        let mut suppressor = self.suppress(tracked);
        let ended = self.supervise(&mut run, tracked, trace_plan(self.config.max_time))?;
        if let Some(s) = suppressor.as_mut() {
            s.halt();
        }

        if ended == Ended::Expired {
            run.kill(self.procs);
            log::warn!("failed on file: {}", label);
            log::debug!("engine output:\n{}", run.output());
            return Ok(RunOutcome::TimedOut);
        }
        self.flush(&mut run)?;

        if !has_trace(trace) {
            log::warn!("failed on file: {}, no trace produced", label);
            log::debug!("engine output:\n{}", run.output());
            return Ok(RunOutcome::ArtifactMissing);
        }
        if let Some(input) = input {
            if self.config.delete_traced && input.exists() {
                if let Err(e) = remove_file(input) {
                    log::warn!("failed to remove {}: {}", input.display(), e);
                }
            }
        }
        Ok(RunOutcome::Success)
    }

    /// Finds the process worth watching among the ones the launcher started.
    ///
    /// Matches on the base name of the target, preferring descendants of the
    /// launcher. Any other process of that name is only accepted on the last
    /// attempt, so parallel workers rarely pick up each other's targets. Falls
    /// back to the launcher when nothing turns up.
    fn resolve(&self, run: &mut Launched) -> Result<Tracked, TraceError> {
        let launcher = run.pid();
        let name = self.config.target_name();
        let attempts = self.config.resolve_attempts.max(1);

        self.stop.nap(self.config.poll_interval)?;
        for attempt in 1..=attempts {
            let found = self.procs.find_by_name(&name);
            let mut pick = found
                .iter()
                .copied()
                .find(|&pid| self.procs.descends_from(pid, launcher));
            if pick.is_none() && attempt == attempts {
                pick = found.first().copied();
            }
            match pick {
                Some(pid) if pid == launcher => return Ok(Tracked::Launcher(pid)),
                Some(pid) => {
                    log::debug!("{} resolved to {}, launcher {}", name, pid, launcher);
                    return Ok(Tracked::Resolved(pid));
                }
                None => {}
            }
            if !run.is_running() {
                break;
            }
            log::debug!("{} not found yet, attempt {}/{}", name, attempt, attempts);
            if attempt != attempts {
                self.stop.nap(self.config.poll_interval)?;
            }
        }
        log::debug!("tracking launcher {} of {}", launcher, name);
        Ok(Tracked::Launcher(launcher))
    }

    /// Starts a dialog suppressor for `tracked` when configured. A run goes on
    /// without one if the thread cannot be started.
    fn suppress(&self, tracked: Tracked) -> Option<DialogSuppressor> {
        if !self.config.kill_windows {
            return None;
        }
        match DialogSuppressor::start(
            tracked.pid(),
            Arc::clone(&self.windows),
            self.config.poll_interval,
        ) {
            Ok(s) => Some(s),
            Err(e) => {
                log::warn!("failed to start dialog suppressor for {}: {}", tracked.pid(), e);
                None
            }
        }
    }

    /// Polls `tracked` through the stages of `plan` until it exits or the plan
    /// runs out.
    fn supervise(
        &self,
        run: &mut Launched,
        tracked: Tracked,
        plan: Vec<Stage>,
    ) -> Result<Ended, TraceError> {
        let pid = tracked.pid();
        let mut machine = PhaseMachine::new(plan);
        loop {
            self.stop.check()?;
            if !run.is_alive(tracked, self.procs) {
                return Ok(Ended::Exited);
            }
            let phase = match machine.phase() {
                Some(phase) => phase,
                None => return Ok(Ended::Expired),
            };

            let holds = if phase.samples_cpu() {
                match self.procs.cpu_usage(pid, self.config.cpu_sample) {
                    Ok(cpu) => phase.holds(cpu, self.config.cpu_threshold),
                    Err(e) => {
                        // probably exited mid-sample, the next poll will tell.
                        log::debug!("sampling {}: {}", pid, e);
                        true
                    }
                }
            } else {
                self.close_windows(pid);
                true
            };
            if holds {
                self.stop.nap(self.config.poll_interval)?;
            }
            machine.record(holds);
        }
    }

    fn close_windows(&self, pid: u32) {
        match self.windows.close_windows(pid) {
            Ok(0) | Err(WindowError::Unavailable(_)) => {}
            Ok(n) => log::debug!("{} close request(s) sent to {}", n, pid),
            Err(e) => log::debug!("closing windows of {}: {}", pid, e),
        }
    }

    /// Gives the launcher a moment to finish writing the trace after the target
    /// exited.
    fn flush(&self, run: &mut Launched) -> Result<(), TraceError> {
        for _ in 0..ENGINE_FLUSH_POLLS {
            if !run.is_running() {
                return Ok(());
            }
            self.stop.nap(self.config.poll_interval)?;
        }
        if run.is_running() {
            log::debug!("engine {} still running, killing it", run.pid());
            run.kill(self.procs);
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
