//! Throwaway engines, targets and corpora for tests that spawn processes.

use std::fs::{create_dir, set_permissions, write, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tempfile::TempDir;

use crate::config::{Config, EngineConfig};

/// Stand-in for the instrumentation engine: `engine -t TOOL -o OUT -- TARGET [INPUT]`.
///
/// Logs the input name to `order.log` next to itself, runs the target as a child
/// and writes a 500 byte trace once it is gone.
pub const FAKE_ENGINE: &str = r#"#!/bin/sh
while [ "$#" -gt 0 ]; do
    case "$1" in
        -o) out="$2"; shift 2 ;;
        -t) shift 2 ;;
        --) shift; break ;;
        *) shift ;;
    esac
done
if [ "$#" -gt 1 ]; then name=$(basename "$2"); else name=base; fi
echo "$name" >> "$(dirname "$0")/order.log"
"$@"
head -c 500 /dev/zero > "$out"
"#;

/// Like `FAKE_ENGINE` but never writes a trace.
pub const SILENT_ENGINE: &str = r#"#!/bin/sh
while [ "$#" -gt 0 ]; do
    case "$1" in
        --) shift; break ;;
        *) shift ;;
    esac
done
"$@"
"#;

pub const QUICK_TARGET: &str = "#!/bin/sh\nexit 0\n";

pub const HANGING_TARGET: &str = "#!/bin/sh\nwhile :; do sleep 1; done\n";

/// Keeps one core busy without ever exiting.
pub const BUSY_TARGET: &str = "#!/bin/sh\nwhile :; do :; done\n";

lazy_static! {
    static ref SERIAL: Mutex<()> = Mutex::new(());
}

/// Serializes tests that spawn processes or look them up by name.
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn write_script(path: &Path, content: &str) {
    write(path, content).unwrap();
    set_permissions(path, Permissions::from_mode(0o755)).unwrap();
}

/// Temporary input/output directories with an engine and a target script.
pub struct Workspace {
    dir: TempDir,
    target: PathBuf,
    engine: PathBuf,
}

impl Workspace {
    /// `target_name` should stay below 15 bytes so it is found by name.
    pub fn new(target_name: &str, target: &str) -> Self {
        Self::with_engine(target_name, target, FAKE_ENGINE)
    }

    pub fn with_engine(target_name: &str, target: &str, engine: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        create_dir(dir.path().join("in")).unwrap();
        write(dir.path().join("tool.so"), "").unwrap();
        let target_path = dir.path().join(target_name);
        write_script(&target_path, target);
        let engine_path = dir.path().join("engine.sh");
        write_script(&engine_path, engine);
        Self {
            dir,
            target: target_path,
            engine: engine_path,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> Config {
        Config {
            input_dir: self.path().join("in"),
            output_dir: self.path().join("out"),
            engine: EngineConfig {
                launcher: self.engine.clone(),
                tool: self.path().join("tool.so"),
            },
            target: self.target.clone(),
            window_tool: None,
            poll_interval: Duration::from_millis(20),
            cpu_sample: Duration::from_millis(20),
            resolve_attempts: 3,
            ..Default::default()
        }
    }

    pub fn add_input(&self, name: &str) -> PathBuf {
        let path = self.path().join("in").join(name);
        write(&path, name).unwrap();
        path
    }

    /// Inputs seen by the fake engine, one per line in launch order.
    pub fn order_log(&self) -> PathBuf {
        self.path().join("order.log")
    }
}
