//! Draining child output in the background.

use std::fs::File;
use std::future::pending;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::sync::{Arc, Barrier, Mutex, Once};

use tokio::runtime::{Builder, Runtime};

use crate::utils::debug;

/// Upper bound of bytes kept per stream, older output is dropped first.
pub const MAX_CAPTURE: usize = 64 * 1024;

pub fn read_background<T: IntoRawFd>(f: T) -> BackgroundIoHandle {
    let fd = f.into_raw_fd();
    let f = unsafe { File::from_raw_fd(fd) };
    let mut f = tokio::fs::File::from_std(f);
    let buf = Arc::new(Mutex::new(Vec::with_capacity(1024)));
    let buf1 = Arc::clone(&buf);

    runtime().spawn(async move {
        use tokio::io::AsyncReadExt;

        let mut chunk = [0_u8; 4096];
        while let Ok(sz) = f.read(&mut chunk).await {
            if sz == 0 {
                break;
            }
            let mut shared_buf = buf1.lock().unwrap_or_else(|e| e.into_inner());
            shared_buf.extend_from_slice(&chunk[..sz]);
            if shared_buf.len() > MAX_CAPTURE {
                let excess = shared_buf.len() - MAX_CAPTURE;
                shared_buf.drain(..excess);
            }
        }

        if debug() {
            log::debug!("read_background exited");
        }
    });

    BackgroundIoHandle::new(buf)
}

pub struct BackgroundIoHandle {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl BackgroundIoHandle {
    fn new(buf: Arc<Mutex<Vec<u8>>>) -> Self {
        Self { buf }
    }

    /// Takes everything read so far.
    pub fn current_data(&self) -> Vec<u8> {
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        buf.split_off(0)
    }

    pub fn current_string(&self) -> String {
        String::from_utf8_lossy(&self.current_data()).into_owned()
    }
}

lazy_static! {
    static ref RUNTIME: Runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to init tokio runtime.");
}
static ONCE: Once = Once::new();

fn init_runtime() {
    ONCE.call_once(|| {
        let barrier = Arc::new(Barrier::new(2));
        let barrier1 = Arc::clone(&barrier);
        let task = async move {
            barrier1.wait();
            pending::<()>().await
        };
        std::thread::Builder::new()
            .name("runtracer-bg-thread".into())
            .spawn(move || RUNTIME.block_on(task))
            .expect("failed to spawn runtracer background thread");

        // A single-threaded runtime polls the inner future for the first thread
        // which invokes block_on. If the worker thread does not invoke "block_on"
        // before other threads, other threads can "steal" the execution. Here we
        // wait for the worker thread to be ready, which takes the job of polling
        // from now on.
        barrier.wait();
        log::debug!("backgound io initalized");
    });
}

pub fn runtime() -> &'static Runtime {
    init_runtime();
    &*RUNTIME
}
