//! Walking the corpus, one supervised run at a time.

use std::fmt;
use std::fs::remove_file;
use std::path::Path;

use crate::config::Config;
use crate::corpus::{has_trace, is_claimed, CorpusItem};
use crate::process::ProcessTable;
use crate::supervisor::{RunOutcome, Supervisor};
use crate::TraceError;

/// Outcome counters of one pass over the corpus.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stats {
    pub traced: u64,
    pub timed_out: u64,
    pub pretest_failed: u64,
    pub artifact_missing: u64,
    pub launch_failed: u64,
    /// Inputs gone or claimed by another worker by the time we got to them.
    pub skipped: u64,
    pub deleted: u64,
}

impl Stats {
    pub fn record(&mut self, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Success => self.traced += 1,
            RunOutcome::TimedOut => self.timed_out += 1,
            RunOutcome::PreTestFailed => self.pretest_failed += 1,
            RunOutcome::Skipped => self.skipped += 1,
            RunOutcome::ArtifactMissing => self.artifact_missing += 1,
            RunOutcome::LaunchFailed => self.launch_failed += 1,
        }
    }

    pub fn failed(&self) -> u64 {
        self.timed_out + self.pretest_failed + self.artifact_missing + self.launch_failed
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "traced: {}, timed out: {}, pre-test failed: {}, no trace: {}, launch failed: {}, skipped: {}, deleted: {}",
            self.traced,
            self.timed_out,
            self.pretest_failed,
            self.artifact_missing,
            self.launch_failed,
            self.skipped,
            self.deleted
        )
    }
}

/// Whether the `count`th item (from 1) gets a progress line.
pub fn should_report(count: u64, every: u64) -> bool {
    every == 1 || (every > 1 && count % every == 1)
}

/// Progress line for the `count`th of `total` items, only in verbose mode.
pub fn progress_line(config: &Config, count: u64, total: u64) -> Option<String> {
    if !config.verbose || !should_report(count, config.report_every) {
        return None;
    }
    Some(format!(
        "working on file {} of {} ({:.2}%)",
        count,
        total,
        count as f64 * 100.0 / total as f64
    ))
}

pub struct Coordinator<'a, P> {
    config: &'a Config,
    supervisor: Supervisor<'a, P>,
    stats: Stats,
}

impl<'a, P: ProcessTable> Coordinator<'a, P> {
    pub fn new(supervisor: Supervisor<'a, P>) -> Self {
        Self {
            config: supervisor.config(),
            supervisor,
            stats: Stats::default(),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn into_stats(self) -> Stats {
        self.stats
    }

    /// Traces the target without any input, as a baseline for coverage diffs.
    pub fn trace_baseline(&mut self) -> Result<RunOutcome, TraceError> {
        log::info!("creating base file [{}]", self.config.base_trace);
        let outcome = self
            .supervisor
            .trace(None, &self.config.base_trace_path())?;
        if outcome == RunOutcome::Success {
            log::info!("base file created");
        }
        Ok(outcome)
    }

    /// Traces every item of `items` in order. Per-item failures are counted, only
    /// cancellation stops the pass.
    pub fn run(&mut self, items: &[CorpusItem]) -> Result<(), TraceError> {
        let total = items.len() as u64;
        let mut count = 1;

        log::info!("starting trace");
        for item in items {
            self.supervisor.stop().check()?;

            let input = item.input_path(self.config);
            if !input.exists() {
                // another worker traced and deleted it.
                self.stats.skipped += 1;
                continue;
            }
            let trace = item.trace_path(self.config);
            if let Some(line) = progress_line(self.config, count, total) {
                log::info!("{}", line);
            }

            if is_claimed(self.config, &trace) {
                log::debug!("{} claimed by another worker", trace.display());
                self.stats.skipped += 1;
            } else {
                let outcome = self.process(&input, &trace)?;
                self.stats.record(outcome);
            }

            if self.config.delete_traced && has_trace(&trace) && input.exists() {
                match remove_file(&input) {
                    Ok(_) => self.stats.deleted += 1,
                    Err(e) => log::warn!("failed to remove {}: {}", input.display(), e),
                }
            }
            count += 1;
        }
        log::info!(
            "trace finished, {} failed ({})",
            self.stats.failed(),
            self.stats
        );
        Ok(())
    }

    fn process(&self, input: &Path, trace: &Path) -> Result<RunOutcome, TraceError> {
        if self.config.test_each {
            match self.supervisor.pretest(input)? {
                o @ RunOutcome::PreTestFailed | o @ RunOutcome::Skipped => return Ok(o),
                _ => {}
            }
        }
        self.supervisor.trace(Some(input), trace)
    }
}

#[cfg(test)]
mod tests {
    use super::{progress_line, should_report, Coordinator, Stats};
    use crate::config::Config;
    use crate::corpus::{enumerate, CorpusItem};
    use crate::process::ProcFs;
    use crate::supervisor::{RunOutcome, Supervisor};
    use crate::testutil::{self, Workspace};
    use crate::utils::StopSoon;
    use crate::window::NoWindows;
    use crate::TraceError;
    use rand::{rngs::StdRng, SeedableRng};
    use std::fs::{read_dir, read_to_string, write};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn progress_points() {
        let reported = |every| {
            (1..=7)
                .filter(|&c| should_report(c, every))
                .collect::<Vec<u64>>()
        };
        assert_eq!(reported(1), vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(reported(3), vec![1, 4, 7]);
        assert_eq!(reported(100), vec![1]);
    }

    #[test]
    fn progress_only_when_verbose() {
        let mut conf = Config {
            report_every: 2,
            ..Default::default()
        };
        assert_eq!(progress_line(&conf, 1, 4), None);
        conf.verbose = true;
        assert_eq!(
            progress_line(&conf, 1, 4).as_deref(),
            Some("working on file 1 of 4 (25.00%)")
        );
        assert_eq!(progress_line(&conf, 2, 4), None);
        assert!(progress_line(&conf, 3, 4).is_some());
    }

    #[test]
    fn stats_summary() {
        let mut stats = Stats::default();
        stats.record(RunOutcome::Success);
        stats.record(RunOutcome::TimedOut);
        stats.record(RunOutcome::ArtifactMissing);
        assert_eq!(stats.failed(), 2);
        assert!(stats.to_string().starts_with("traced: 1, timed out: 1"));
    }

    #[test]
    fn items_run_in_enumeration_order() {
        let _g = testutil::serial();
        let ws = Workspace::new("quick.sh", testutil::QUICK_TARGET);
        let conf = ws.config();
        for name in &["c.doc", "a.doc", "b.doc"] {
            ws.add_input(name);
        }
        let (procs, stop) = (ProcFs::new(), StopSoon::new());
        let items = enumerate(&conf, &mut StdRng::seed_from_u64(0)).unwrap();
        let mut coordinator =
            Coordinator::new(Supervisor::new(&conf, &procs, Arc::new(NoWindows), &stop));

        coordinator.run(&items).unwrap();
        assert_eq!(
            read_to_string(ws.order_log()).unwrap(),
            "a.doc\nb.doc\nc.doc\n"
        );
        assert_eq!(coordinator.stats().traced, 3);
    }

    #[test]
    fn unwritable_output_dir_moves_on() {
        let _g = testutil::serial();
        let ws = Workspace::new("quick.sh", testutil::QUICK_TARGET);
        let conf = ws.config();
        write(&conf.output_dir, "not a directory").unwrap();
        ws.add_input("a.doc");
        ws.add_input("b.doc");
        let (procs, stop) = (ProcFs::new(), StopSoon::new());
        let items = enumerate(&conf, &mut StdRng::seed_from_u64(0)).unwrap();
        let mut coordinator =
            Coordinator::new(Supervisor::new(&conf, &procs, Arc::new(NoWindows), &stop));

        coordinator.run(&items).unwrap();
        let stats = coordinator.into_stats();
        assert_eq!((stats.launch_failed, stats.traced), (2, 0));
        assert_eq!(stats.failed(), 2);
        assert!(!ws.order_log().exists());
    }

    #[test]
    fn stop_request_cancels_the_pass() {
        let _g = testutil::serial();
        let ws = Workspace::new("quick.sh", testutil::QUICK_TARGET);
        let conf = ws.config();
        ws.add_input("a.doc");
        let (procs, stop) = (ProcFs::new(), StopSoon::new());
        let items = enumerate(&conf, &mut StdRng::seed_from_u64(0)).unwrap();
        let mut coordinator =
            Coordinator::new(Supervisor::new(&conf, &procs, Arc::new(NoWindows), &stop));

        stop.stop_req();
        assert!(matches!(coordinator.run(&items), Err(TraceError::Cancelled)));
        assert!(!ws.order_log().exists());
        assert_eq!(coordinator.stats(), &Stats::default());
    }

    #[test]
    fn second_pass_skips_traced_inputs() {
        let _g = testutil::serial();
        let ws = Workspace::new("quick.sh", testutil::QUICK_TARGET);
        let mut conf = ws.config();
        conf.skip_traced = true;
        ws.add_input("once.doc");
        let (procs, stop) = (ProcFs::new(), StopSoon::new());

        for _ in 0..2 {
            let items = vec![CorpusItem::new("once.doc")];
            let mut coordinator =
                Coordinator::new(Supervisor::new(&conf, &procs, Arc::new(NoWindows), &stop));
            coordinator.run(&items).unwrap();
        }
        assert_eq!(read_to_string(ws.order_log()).unwrap(), "once.doc\n");
    }

    #[test]
    fn delete_traced_also_cleans_up_claimed_inputs() {
        let _g = testutil::serial();
        let ws = Workspace::new("quick.sh", testutil::QUICK_TARGET);
        let mut conf = ws.config();
        conf.skip_traced = true;
        conf.delete_traced = true;
        let input = ws.add_input("old.doc");
        std::fs::create_dir(&conf.output_dir).unwrap();
        write(conf.trace_path("old.doc"), "trace").unwrap();
        let (procs, stop) = (ProcFs::new(), StopSoon::new());
        let mut coordinator =
            Coordinator::new(Supervisor::new(&conf, &procs, Arc::new(NoWindows), &stop));

        coordinator.run(&[CorpusItem::new("old.doc")]).unwrap();
        assert!(!input.exists());
        assert!(!ws.order_log().exists());
        let stats = coordinator.into_stats();
        assert_eq!((stats.skipped, stats.deleted), (1, 1));
    }

    #[test]
    fn failed_pretest_is_not_traced() {
        let _g = testutil::serial();
        let ws = Workspace::new("hang.sh", testutil::HANGING_TARGET);
        let mut conf = ws.config();
        conf.test_each = true;
        conf.delete_failed = true;
        conf.max_time = 16;
        let input = ws.add_input("poison.doc");
        let (procs, stop) = (ProcFs::new(), StopSoon::new());
        let mut coordinator =
            Coordinator::new(Supervisor::new(&conf, &procs, Arc::new(NoWindows), &stop));

        coordinator.run(&[CorpusItem::new("poison.doc")]).unwrap();
        assert!(!input.exists());
        assert!(!ws.order_log().exists());
        assert_eq!(coordinator.stats().pretest_failed, 1);
    }

    #[test]
    fn baseline_is_traced_without_input() {
        let _g = testutil::serial();
        let ws = Workspace::new("quick.sh", testutil::QUICK_TARGET);
        let conf = ws.config();
        let (procs, stop) = (ProcFs::new(), StopSoon::new());
        let mut coordinator =
            Coordinator::new(Supervisor::new(&conf, &procs, Arc::new(NoWindows), &stop));

        assert_eq!(coordinator.trace_baseline().unwrap(), RunOutcome::Success);
        assert_eq!(read_to_string(ws.order_log()).unwrap(), "base\n");
        assert!(conf.base_trace_path().exists());
    }

    #[test]
    fn parallel_workers_share_the_corpus() {
        let _g = testutil::serial();
        let ws = Workspace::new("quick.sh", testutil::QUICK_TARGET);
        let mut conf = ws.config();
        conf.parallel = true;
        for i in 0..10 {
            ws.add_input(&format!("{}.doc", i));
        }

        let workers = (0..2u64)
            .map(|seed| {
                let conf = conf.clone();
                thread::spawn(move || {
                    let (procs, stop) = (ProcFs::new(), StopSoon::new());
                    let items = enumerate(&conf, &mut StdRng::seed_from_u64(seed)).unwrap();
                    let mut coordinator = Coordinator::new(Supervisor::new(
                        &conf,
                        &procs,
                        Arc::new(NoWindows),
                        &stop,
                    ));
                    coordinator.run(&items).unwrap();
                    coordinator.into_stats()
                })
            })
            .collect::<Vec<_>>();
        let handled = workers
            .into_iter()
            .map(|w| {
                let stats = w.join().unwrap();
                stats.traced + stats.skipped
            })
            .sum::<u64>();

        let traces = read_dir(&conf.output_dir).unwrap().count();
        assert_eq!(traces, 10);
        let log = read_to_string(ws.order_log()).unwrap();
        for i in 0..10 {
            assert!(log.lines().any(|l| l == format!("{}.doc", i)));
        }
        assert!(handled >= 10);
    }
}
