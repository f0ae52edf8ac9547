//! Background dialog suppression.
//!
//! A suppressor keeps asking the windows of one process to close, so modal
//! dialogs popped up by the target (error boxes, "save changes?" prompts) do not
//! keep it alive until the time budget runs out.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::window::{CloseWindows, WindowError};

pub struct DialogSuppressor {
    pid: u32,
    // dropping the sender stops the loop.
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DialogSuppressor {
    /// Starts closing windows of `pid` every `period`.
    pub fn start(
        pid: u32,
        windows: Arc<dyn CloseWindows>,
        period: Duration,
    ) -> std::io::Result<Self> {
        let (cancel, cancel_recv) = channel::<()>();
        let handle = thread::Builder::new()
            .name(format!("dialog-suppressor-{}", pid))
            .spawn(move || loop {
                match windows.close_windows(pid) {
                    Ok(0) => {}
                    Ok(n) => log::debug!("suppressor: {} window(s) of {} closed", n, pid),
                    Err(WindowError::Unavailable(_)) => {}
                    Err(e) => log::debug!("suppressor: {}", e),
                }
                match cancel_recv.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            })?;
        log::debug!("dialog suppressor started for {}", pid);
        Ok(Self {
            pid,
            cancel: Some(cancel),
            handle: Some(handle),
        })
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stops the loop and waits for it. Safe to call any number of times.
    pub fn halt(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("dialog suppressor of {} panicked", self.pid);
            }
            log::debug!("dialog suppressor halted for {}", self.pid);
        }
    }
}

impl Drop for DialogSuppressor {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::DialogSuppressor;
    use crate::window::{CloseWindows, WindowError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread::sleep;
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl CloseWindows for Counting {
        fn close_windows(&self, pid: u32) -> Result<usize, WindowError> {
            assert_eq!(pid, 42);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    }

    #[test]
    fn closes_until_halted() {
        let windows = Arc::new(Counting::default());
        let mut s =
            DialogSuppressor::start(42, windows.clone(), Duration::from_millis(10)).unwrap();
        sleep(Duration::from_millis(100));
        assert!(s.is_running());
        s.halt();
        assert!(!s.is_running());

        let calls = windows.calls.load(Ordering::SeqCst);
        assert!(calls >= 2, "calls {}", calls);
        sleep(Duration::from_millis(50));
        assert_eq!(windows.calls.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn halt_is_idempotent() {
        let windows = Arc::new(Counting::default());
        let mut s = DialogSuppressor::start(42, windows, Duration::from_secs(3600)).unwrap();
        s.halt();
        s.halt();
        drop(s);
    }

    #[test]
    fn halt_after_loop_stopped() {
        struct Panicking;
        impl CloseWindows for Panicking {
            fn close_windows(&self, _pid: u32) -> Result<usize, WindowError> {
                panic!("window system gone");
            }
        }

        let mut s =
            DialogSuppressor::start(42, Arc::new(Panicking), Duration::from_millis(1)).unwrap();
        sleep(Duration::from_millis(50));
        s.halt();
        s.halt();
    }
}
