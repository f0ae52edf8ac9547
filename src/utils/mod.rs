use std::os::raw::c_int;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::TraceError;

pub mod io;

/// Environment variable that turns on debug output.
pub const RUNTRACER_DEBUG: &str = "RUNTRACER_DEBUG";

lazy_static! {
    static ref DEBUG: bool = std::env::var(RUNTRACER_DEBUG).is_ok();
}

pub fn debug() -> bool {
    *DEBUG
}

/// Process-wide cancellation request.
///
/// Cloned into everything that waits, so one operator interrupt unwinds every
/// nested polling loop.
#[derive(Debug, Clone, Default)]
pub struct StopSoon(Arc<AtomicBool>);

impl StopSoon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_soon(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn stop_req(&self) {
        self.0.store(true, Ordering::Relaxed)
    }

    /// Fails with `TraceError::Cancelled` once a stop was requested.
    pub fn check(&self) -> Result<(), TraceError> {
        if self.stop_soon() {
            Err(TraceError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration`, waking up early if a stop is requested.
    pub fn nap(&self, duration: Duration) -> Result<(), TraceError> {
        const SLICE: Duration = Duration::from_millis(50);

        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let left = deadline - now;
            sleep(if left < SLICE { left } else { SLICE });
        }
    }
}

/// Spawns the thread that turns termination signals into a stop request.
pub fn setup_signal_handler(stop: StopSoon) -> std::io::Result<()> {
    use signal_hook::consts::*;
    use signal_hook::iterator::exfiltrator::WithOrigin;
    use signal_hook::iterator::SignalsInfo;

    fn named_signal(sig: c_int) -> String {
        signal_hook::low_level::signal_name(sig)
            .map(|n| format!("{}({})", n, sig))
            .unwrap_or_else(|| sig.to_string())
    }

    let mut signals = SignalsInfo::<WithOrigin>::new(TERM_SIGNALS)?;
    std::thread::Builder::new()
        .name("runtracer-signals".into())
        .spawn(move || {
            if let Some(info) = signals.into_iter().next() {
                let from = if let Some(p) = info.process {
                    format!("(pid: {}, uid: {})", p.pid, p.uid)
                } else {
                    "unknown".to_string()
                };
                log::info!(
                    "{} recved, from: {}, cause: {:?}",
                    named_signal(info.signal),
                    from,
                    info.cause
                );
                stop.stop_req();
            }
        })?;
    Ok(())
}
