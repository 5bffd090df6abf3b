//! Shared harness for the privileged cgroup integration tests.
//!
//! These tests need root and a kernel willing to mount fresh cgroup v1
//! hierarchies. [`TestHierarchy::mount`] probes for that and returns `None`
//! when the environment cannot host one, so tests skip instead of failing on
//! developer machines and v2-only systems.

#![allow(dead_code)] // each test binary uses its own subset of the harness

use cgkit_core::cgroups;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard, Once};
use std::time::{Duration, Instant};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// A subsystem can only be attached to one hierarchy at a time, so tests that
// mount their own must run one at a time even under the parallel harness.
static HIERARCHY_LOCK: Mutex<()> = Mutex::new(());

/// A freshly mounted cgroup hierarchy on a scratch path, unmounted on drop.
///
/// Holds a process-wide lock for its lifetime so concurrently running tests
/// do not contend for the same subsystems.
pub struct TestHierarchy {
    // Owns the scratch directory the mount point lives in.
    _scratch: tempfile::TempDir,
    path: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl TestHierarchy {
    /// Mounts a hierarchy with the given subsystems attached.
    ///
    /// Returns `None` when the current environment cannot host one: not
    /// running as root, cgroups unsupported, a subsystem disabled or already
    /// attached elsewhere, or the kernel refusing the v1 mount.
    pub fn mount(subsystems: &str) -> Option<Self> {
        let lock = HIERARCHY_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if unsafe { libc::geteuid() } != 0 {
            return None;
        }
        if !cgroups::available() {
            return None;
        }
        if !cgroups::enabled(subsystems).unwrap_or(false) {
            return None;
        }
        if cgroups::busy(subsystems).unwrap_or(true) {
            return None;
        }

        let scratch = tempfile::tempdir().ok()?;
        let path = scratch.path().join("hierarchy");
        cgroups::mount(&path, subsystems).ok()?;

        Some(Self {
            _scratch: scratch,
            path,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TestHierarchy {
    fn drop(&mut self) {
        // Best-effort teardown; leftover cgroups are removed bottom-up so the
        // unmount has a chance even when a test failed halfway.
        if let Ok(leftover) = cgroups::nested(&self.path, "") {
            for cgroup in &leftover {
                let _ = std::fs::remove_dir(self.path.join(cgroup));
            }
        }
        let _ = cgroups::unmount(&self.path);
    }
}

/// A disposable child process, killed and reaped on drop.
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    /// Spawns a long-sleeping child to populate cgroups with.
    pub fn spawn_sleep() -> std::io::Result<Self> {
        let child = Command::new("sleep")
            .arg("1000")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(Self { child })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// SIGSTOPs the child and waits until /proc reports it stopped.
    pub fn stop(&self) -> bool {
        let rc = unsafe { libc::kill(self.pid() as libc::pid_t, libc::SIGSTOP) };
        if rc != 0 {
            return false;
        }
        self.wait_for_state('T', Duration::from_secs(5))
    }

    /// Polls /proc/[pid]/stat until the state char matches or time runs out.
    pub fn wait_for_state(&self, wanted: char, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            let state = cgkit_core::proc::process_state(self.pid());
            if state.map(|s| s == wanted).unwrap_or(false) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    /// Reaps the child, blocking until it exited.
    pub fn wait_for_exit(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait()
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Number of open file descriptors in this process.
pub fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .map(|entries| entries.count())
        .unwrap_or(0)
}
