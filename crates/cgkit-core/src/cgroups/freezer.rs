//! Freezer subsystem driver.
//!
//! Drives `freezer.state` to `FROZEN` or `THAWED`. The kernel reports a third
//! state, `FREEZING`, while it is stuck on tasks it cannot freeze; the main
//! cause is tasks in the stopped/traced state (`T` in `/proc/[pid]/stat`),
//! which the scheduler will never dispatch. The driver unsticks those with
//! SIGCONT and retries on a caller-supplied interval until the retry budget
//! runs out.

use super::{read_unchecked, tasks, verify, write_unchecked};
use crate::proc;
use cgkit_common::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

pub(crate) const FREEZER_STATE: &str = "freezer.state";

const FROZEN: &str = "FROZEN";
const FREEZING: &str = "FREEZING";
const THAWED: &str = "THAWED";

/// Freezes every task in the cgroup.
///
/// Resolves `Ok(true)` once `freezer.state` reads `FROZEN`, or `Ok(false)` if
/// the cgroup did not freeze within `retries + 1` attempts spaced `interval`
/// apart; exhausting the budget is a normal outcome, not an error. Dropping
/// the returned future abandons the attempt at the next suspension point.
pub async fn freeze(
    hierarchy: &Path,
    cgroup: &str,
    interval: Duration,
    retries: u32,
) -> Result<bool> {
    verify(hierarchy, cgroup, FREEZER_STATE)?;

    let state = read_unchecked(hierarchy, cgroup, FREEZER_STATE)?;
    if state.trim() == FROZEN {
        return Ok(true);
    }

    debug!(hierarchy = %hierarchy.display(), cgroup, "freezing cgroup");

    write_unchecked(hierarchy, cgroup, FREEZER_STATE, FROZEN)?;

    let mut attempt: u32 = 0;
    loop {
        let state = read_unchecked(hierarchy, cgroup, FREEZER_STATE)?;
        match state.trim() {
            FROZEN => {
                debug!(cgroup, attempts = attempt + 1, "cgroup frozen");
                return Ok(true);
            }
            FREEZING => {
                // The kernel cannot finish while some task is stopped or
                // traced: a task the scheduler will not run cannot enter the
                // refrigerator. Resume them so the freeze can complete. No
                // task can enter or leave the cgroup while the state is
                // FREEZING, so this snapshot is stable.
                for pid in tasks(hierarchy, cgroup)? {
                    if proc::process_state(pid)? == 'T' {
                        debug!(pid, "resuming stopped task to unblock freezer");
                        super::send_signal(pid, libc::SIGCONT)?;
                    }
                }

                if attempt > retries {
                    warn!(
                        cgroup,
                        attempts = retries + 1,
                        "unable to freeze cgroup within retry budget"
                    );
                    return Ok(false);
                }

                // Re-request the freeze: kernels before 3.2 could drop the
                // pending request when a stopped task was resumed. Harmless
                // on newer kernels.
                write_unchecked(hierarchy, cgroup, FREEZER_STATE, FROZEN)?;

                time::sleep(interval).await;
                attempt += 1;
            }
            other => {
                return Err(Error::InvalidFreezerState {
                    state: other.to_string(),
                })
            }
        }
    }
}

/// Thaws the cgroup, letting its tasks run (and dequeue pending signals)
/// again.
///
/// Polls until `freezer.state` reads `THAWED`; there is no retry budget
/// because a thaw cannot get stuck the way a freeze can.
pub async fn thaw(hierarchy: &Path, cgroup: &str, interval: Duration) -> Result<()> {
    verify(hierarchy, cgroup, FREEZER_STATE)?;

    let state = read_unchecked(hierarchy, cgroup, FREEZER_STATE)?;
    if state.trim() == THAWED {
        return Ok(());
    }

    debug!(hierarchy = %hierarchy.display(), cgroup, "thawing cgroup");

    write_unchecked(hierarchy, cgroup, FREEZER_STATE, THAWED)?;

    loop {
        let state = read_unchecked(hierarchy, cgroup, FREEZER_STATE)?;
        match state.trim() {
            THAWED => {
                debug!(cgroup, "cgroup thawed");
                return Ok(());
            }
            FROZEN => time::sleep(interval).await,
            other => {
                return Err(Error::InvalidFreezerState {
                    state: other.to_string(),
                })
            }
        }
    }
}
