//! Cgroup teardown: drain every task in a subtree, then remove it bottom-up.
//!
//! Killing the tasks of one cgroup is a four-step pipeline run to a fixpoint:
//!
//! ```text
//! freeze -> SIGKILL every task -> thaw -> wait until `tasks` is empty
//! ```
//!
//! Freezing first stops the tasks from forking while signals are handed out;
//! a frozen task cannot dequeue a signal, so the thaw is what actually lets
//! SIGKILL land. A task forked into the cgroup after the PID snapshot
//! survives the round, which is why the pipeline restarts until the cgroup
//! reads empty.

use super::{freezer, kill, nested, remove_unchecked, tasks, verify};
use super::{EMPTY_WATCHER_RETRIES, FREEZE_RETRIES};
use cgkit_common::Result;
use futures::future::try_join_all;
use std::path::Path;
use std::time::Duration;
use tokio::time;
use tracing::debug;

/// Destroys a cgroup and its entire subtree, tasks included.
///
/// Every cgroup in the subtree gets its own kill pipeline, run concurrently;
/// once all of them have drained, the directories are removed in post-order
/// so no child ever blocks its parent's rmdir. The first failure anywhere
/// cancels the remaining work and propagates. Requires the freezer subsystem
/// on the hierarchy.
///
/// Destroying the root cgroup (`""` or `"/"`) empties the hierarchy but keeps
/// the root directory itself, which belongs to the mount.
pub async fn destroy(hierarchy: &Path, cgroup: &str, interval: Duration) -> Result<()> {
    verify(hierarchy, cgroup, freezer::FREEZER_STATE)?;

    let mut doomed = nested(hierarchy, cgroup)?;
    // The requested cgroup goes last; the hierarchy root itself belongs to
    // the mount and is never removed.
    let rel = super::rel(cgroup);
    if !rel.is_empty() {
        doomed.push(rel.to_string());
    }

    debug!(
        hierarchy = %hierarchy.display(),
        cgroup,
        count = doomed.len(),
        "destroying cgroup subtree"
    );

    try_join_all(
        doomed
            .iter()
            .map(|cgroup| kill_tasks(hierarchy, cgroup, interval)),
    )
    .await?;

    for cgroup in &doomed {
        remove_unchecked(hierarchy, cgroup)?;
    }

    Ok(())
}

/// Kills every task in a single cgroup and waits for it to drain.
///
/// The freeze outcome is deliberately ignored: even a partial freeze keeps
/// the cgroup from forking faster than we can signal it, and the next round
/// catches anything that slipped through.
pub(crate) async fn kill_tasks(hierarchy: &Path, cgroup: &str, interval: Duration) -> Result<()> {
    loop {
        freezer::freeze(hierarchy, cgroup, interval, FREEZE_RETRIES).await?;
        kill(hierarchy, cgroup, libc::SIGKILL)?;
        freezer::thaw(hierarchy, cgroup, interval).await?;

        if empty_watch(hierarchy, cgroup, interval, EMPTY_WATCHER_RETRIES).await? {
            debug!(cgroup, "cgroup drained");
            return Ok(());
        }

        debug!(cgroup, "cgroup still has tasks, restarting kill pipeline");
    }
}

/// Polls the cgroup's `tasks` file until it is empty.
///
/// Resolves `Ok(true)` on the first empty read and `Ok(false)` once the retry
/// budget is spent; a filesystem error fails the watch.
pub(crate) async fn empty_watch(
    hierarchy: &Path,
    cgroup: &str,
    interval: Duration,
    retries: u32,
) -> Result<bool> {
    let mut attempt: u32 = 0;
    loop {
        if tasks(hierarchy, cgroup)?.is_empty() {
            return Ok(true);
        }

        if attempt > retries {
            return Ok(false);
        }

        time::sleep(interval).await;
        attempt += 1;
    }
}
