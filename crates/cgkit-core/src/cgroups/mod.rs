//! Cgroup (v1) hierarchy and lifecycle operations.
//!
//! A *hierarchy* is a mount point of filesystem type `cgroup` with a fixed
//! set of attached subsystems; a *cgroup* is a directory inside it, named by
//! its path relative to the mount point (`""` or `"/"` is the root cgroup).
//! The synchronous operations in this module are thin, verified wrappers over
//! that filesystem surface. The asynchronous drivers live in the submodules:
//! [`freezer`] halts and resumes every task in a cgroup, [`events`] resolves
//! kernel event notifications, and [`destroy`] tears down whole subtrees.
//!
//! Every public operation first runs the verification gate: hierarchy mounted
//! as cgroup, cgroup directory present, control file present. Nothing is
//! skipped for performance; cgroup control files answer in microseconds.

pub mod destroy;
pub mod events;
pub mod freezer;

pub use destroy::destroy;
pub use events::listen;
pub use freezer::{freeze, thaw};

use crate::fs;
use crate::proc;
use cgkit_common::{Error, Result};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Default retry budget for the freezer driver.
pub const FREEZE_RETRIES: u32 = 50;

/// Default retry budget for the empty-watcher.
pub const EMPTY_WATCHER_RETRIES: u32 = 50;

/// Returns whether the kernel exposes cgroup support (`/proc/cgroups` exists).
pub fn available() -> bool {
    proc::cgroups_supported()
}

/// Returns the names of all subsystems the kernel has enabled.
pub fn subsystems() -> Result<BTreeSet<String>> {
    Ok(proc::subsystems()?
        .into_values()
        .filter(|info| info.enabled)
        .map(|info| info.name)
        .collect())
}

/// Returns whether every comma-separated subsystem is enabled.
///
/// A subsystem that is missing from `/proc/cgroups` altogether is an error,
/// not a `false`.
pub fn enabled(subsystems: &str) -> Result<bool> {
    let infos = proc::subsystems()?;

    let mut all_enabled = true;
    for name in tokenize(subsystems) {
        match infos.get(name) {
            None => return Err(Error::SubsystemMissing { name: name.into() }),
            Some(info) if !info.enabled => all_enabled = false,
            Some(_) => {}
        }
    }

    Ok(all_enabled)
}

/// Returns whether any of the comma-separated subsystems is attached to a
/// hierarchy.
///
/// The semantics are "attached somewhere", deliberately including a hierarchy
/// the caller itself mounted; callers check before mounting, not after. A
/// missing subsystem is an error.
pub fn busy(subsystems: &str) -> Result<bool> {
    let infos = proc::subsystems()?;

    let mut any_busy = false;
    for name in tokenize(subsystems) {
        match infos.get(name) {
            None => return Err(Error::SubsystemMissing { name: name.into() }),
            Some(info) if info.hierarchy != 0 => any_busy = true,
            Some(_) => {}
        }
    }

    Ok(any_busy)
}

/// Returns the canonical paths of every mounted cgroup hierarchy.
pub fn hierarchies() -> Result<BTreeSet<PathBuf>> {
    let table = fs::MountTable::load()?;

    let mut roots = BTreeSet::new();
    for entry in &table.entries {
        if entry.fstype == "cgroup" {
            roots.insert(canonical(&entry.target)?);
        }
    }

    Ok(roots)
}

/// Returns the subsystems attached to a mounted hierarchy.
///
/// The result is the intersection of the enabled subsystems with the mount
/// options of the hierarchy's mount entry, since options also carry
/// non-subsystem flags such as `rw` and `relatime`.
pub fn subsystems_of(hierarchy: &Path) -> Result<BTreeSet<String>> {
    let hierarchy_root = canonical(hierarchy)?;
    let table = fs::MountTable::load()?;

    // A directory can be mounted more than once, and later mounts shadow
    // earlier ones; the last matching entry is the live one.
    let mut live: Option<&fs::MountEntry> = None;
    for entry in &table.entries {
        if entry.fstype == "cgroup" && canonical(&entry.target)? == hierarchy_root {
            live = Some(entry);
        }
    }

    let live = live.ok_or_else(|| Error::NotMounted {
        hierarchy: hierarchy.to_path_buf(),
    })?;

    Ok(subsystems()?
        .into_iter()
        .filter(|name| live.has_option(name))
        .collect())
}

/// Mounts a new cgroup hierarchy with the comma-separated subsystems attached.
///
/// The hierarchy path must not exist yet and each subsystem must be enabled
/// and not already attached elsewhere. On mount failure the just-created
/// directory is removed best-effort and the mount error is surfaced.
pub fn mount(hierarchy: &Path, subsystems: &str) -> Result<()> {
    if hierarchy.exists() {
        return Err(Error::AlreadyExists {
            path: hierarchy.to_path_buf(),
        });
    }

    for subsystem in tokenize(subsystems) {
        if !enabled(subsystem)? {
            return Err(Error::SubsystemDisabled {
                name: subsystem.into(),
            });
        }
        if busy(subsystem)? {
            return Err(Error::SubsystemBusy {
                name: subsystem.into(),
            });
        }
    }

    std::fs::create_dir_all(hierarchy)
        .map_err(|e| Error::io("create directory", hierarchy, e))?;

    debug!(hierarchy = %hierarchy.display(), subsystems, "mounting cgroup hierarchy");

    if let Err(e) = fs::mount_cgroup(hierarchy, subsystems) {
        let _ = std::fs::remove_dir(hierarchy);
        return Err(e);
    }

    Ok(())
}

/// Unmounts a hierarchy and removes its (empty) mount point directory.
pub fn unmount(hierarchy: &Path) -> Result<()> {
    verify(hierarchy, "", "")?;

    debug!(hierarchy = %hierarchy.display(), "unmounting cgroup hierarchy");

    fs::unmount(hierarchy)?;
    std::fs::remove_dir(hierarchy).map_err(|e| Error::io("remove directory", hierarchy, e))
}

/// Returns whether `hierarchy` is mounted as a cgroup filesystem with every
/// comma-separated subsystem attached. An empty subsystem list checks the
/// mount alone.
pub fn mounted(hierarchy: &Path, subsystems: &str) -> Result<bool> {
    if !hierarchy.exists() {
        return Ok(false);
    }

    let hierarchy_root = canonical(hierarchy)?;
    if !hierarchies()?.contains(&hierarchy_root) {
        return Ok(false);
    }

    if tokenize(subsystems).next().is_none() {
        return Ok(true);
    }

    let attached = subsystems_of(hierarchy)?;
    Ok(tokenize(subsystems).all(|name| attached.contains(name)))
}

/// Creates a cgroup directory. The parent cgroup must already exist; creation
/// is never recursive.
///
/// When the `cpuset` subsystem is attached, `cpuset.cpus` and `cpuset.mems`
/// are copied from the parent cgroup: the kernel leaves them empty on a fresh
/// cgroup and refuses task enrollment (`EBUSY`) until both are populated.
pub fn create(hierarchy: &Path, cgroup: &str) -> Result<()> {
    verify(hierarchy, "", "")?;

    let path = cgroup_dir(hierarchy, cgroup);
    std::fs::create_dir(&path).map_err(|e| Error::io("create directory", &path, e))?;

    if subsystems_of(hierarchy)?.contains("cpuset") {
        clone_cpuset(hierarchy, parent(cgroup), rel(cgroup))?;
    }

    Ok(())
}

fn clone_cpuset(hierarchy: &Path, parent: &str, child: &str) -> Result<()> {
    for control in ["cpuset.cpus", "cpuset.mems"] {
        let value = read(hierarchy, parent, control)?;
        write(hierarchy, child, control, value.trim_end())?;
    }
    Ok(())
}

/// Removes a cgroup directory.
///
/// Fails while nested cgroups exist; destroy the subtree first (or use
/// [`destroy`]). The kernel additionally refuses to remove a cgroup that
/// still has tasks.
pub fn remove(hierarchy: &Path, cgroup: &str) -> Result<()> {
    verify(hierarchy, cgroup, "")?;

    if !nested(hierarchy, cgroup)?.is_empty() {
        return Err(Error::NestedCgroups {
            cgroup: rel(cgroup).to_string(),
        });
    }

    remove_unchecked(hierarchy, cgroup)
}

/// Removes a cgroup directory without the nested-cgroup guard. Used by the
/// destroyer, which removes in post-order and knows children are gone.
pub(crate) fn remove_unchecked(hierarchy: &Path, cgroup: &str) -> Result<()> {
    let path = cgroup_dir(hierarchy, cgroup);
    std::fs::remove_dir(&path).map_err(|e| Error::io("remove cgroup", &path, e))
}

/// Returns whether a cgroup directory exists in the hierarchy.
pub fn exists(hierarchy: &Path, cgroup: &str) -> Result<bool> {
    verify(hierarchy, "", "")?;
    Ok(cgroup_dir(hierarchy, cgroup).exists())
}

/// Returns whether a control file exists inside a cgroup.
pub fn exists_control(hierarchy: &Path, cgroup: &str, control: &str) -> Result<bool> {
    verify(hierarchy, cgroup, "")?;
    Ok(cgroup_dir(hierarchy, cgroup).join(control).exists())
}

/// Enumerates every descendant cgroup of `cgroup` in **post-order**, as paths
/// relative to the hierarchy root. The cgroup itself is not included.
///
/// Post-order is load-bearing: the destroyer removes directories in this
/// order so every child vanishes before its parent.
pub fn nested(hierarchy: &Path, cgroup: &str) -> Result<Vec<String>> {
    verify(hierarchy, cgroup, "")?;

    let hierarchy_root = canonical(hierarchy)?;
    let root = canonical(&cgroup_dir(&hierarchy_root, cgroup))?;

    let mut dirs = Vec::new();
    walk_postorder(&root, &mut dirs).map_err(|e| Error::io("walk", &root, e))?;

    let mut cgroups = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let relative = dir.strip_prefix(&hierarchy_root).map_err(|_| Error::Parse {
            file: dir.display().to_string(),
            detail: format!("not under hierarchy root {}", hierarchy_root.display()),
        })?;
        cgroups.push(relative.to_string_lossy().into_owned());
    }

    Ok(cgroups)
}

/// Collects every directory below `dir` in post-order. Children are visited
/// in name order for deterministic output; each directory handle is closed
/// before recursing into the children it produced.
pub(crate) fn walk_postorder(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut children = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            children.push(entry.path());
        }
    }
    children.sort();

    for child in children {
        walk_postorder(&child, out)?;
        out.push(child);
    }

    Ok(())
}

/// Reads a control file and returns its entire contents.
pub fn read(hierarchy: &Path, cgroup: &str, control: &str) -> Result<String> {
    verify(hierarchy, cgroup, control)?;
    read_unchecked(hierarchy, cgroup, control)
}

/// Writes `value` (plus a trailing newline) to a control file.
pub fn write(hierarchy: &Path, cgroup: &str, control: &str, value: &str) -> Result<()> {
    verify(hierarchy, cgroup, control)?;
    write_unchecked(hierarchy, cgroup, control, value)
}

pub(crate) fn read_unchecked(hierarchy: &Path, cgroup: &str, control: &str) -> Result<String> {
    let path = cgroup_dir(hierarchy, cgroup).join(control);

    // Control files report a size of zero; stream the contents rather than
    // probing the length or seeking.
    let mut file = File::open(&path).map_err(|e| Error::io("open", &path, e))?;
    let mut value = String::new();
    file.read_to_string(&mut value)
        .map_err(|e| Error::io("read", &path, e))?;

    Ok(value)
}

pub(crate) fn write_unchecked(
    hierarchy: &Path,
    cgroup: &str,
    control: &str,
    value: &str,
) -> Result<()> {
    let path = cgroup_dir(hierarchy, cgroup).join(control);

    trace!(path = %path.display(), value, "writing control");

    let mut file = OpenOptions::new()
        .write(true)
        .open(&path)
        .map_err(|e| Error::io("open", &path, e))?;
    file.write_all(value.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .map_err(|e| Error::io("write", &path, e))
}

/// Returns the set of PIDs enrolled in the cgroup's `tasks` file.
pub fn tasks(hierarchy: &Path, cgroup: &str) -> Result<BTreeSet<u32>> {
    let value = read(hierarchy, cgroup, "tasks")?;

    let mut pids = BTreeSet::new();
    for token in value.split_whitespace() {
        let pid = token.parse().map_err(|_| Error::Parse {
            file: "tasks".into(),
            detail: format!("invalid pid '{token}'"),
        })?;
        pids.insert(pid);
    }

    Ok(pids)
}

/// Enrolls a process in the cgroup, moving it out of its previous cgroup in
/// the same hierarchy.
pub fn assign(hierarchy: &Path, cgroup: &str, pid: u32) -> Result<()> {
    write(hierarchy, cgroup, "tasks", &pid.to_string())
}

/// Sends `signal` to every task currently in the cgroup.
///
/// The PID set is a snapshot; the first delivery failure aborts the call and
/// names the offending pid and signal.
pub fn kill(hierarchy: &Path, cgroup: &str, signal: i32) -> Result<()> {
    verify(hierarchy, cgroup, "")?;

    let pids = tasks(hierarchy, cgroup)?;
    debug!(cgroup = rel(cgroup), signal, count = pids.len(), "signalling cgroup tasks");

    for pid in pids {
        send_signal(pid, signal)?;
    }

    Ok(())
}

pub(crate) fn send_signal(pid: u32, signal: i32) -> Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc != 0 {
        return Err(Error::Signal {
            pid,
            signal,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Verification gate run by every public operation: hierarchy mounted as
/// cgroup, cgroup directory present (if supplied), control file present (if
/// supplied). Returns the first failure.
pub(crate) fn verify(hierarchy: &Path, cgroup: &str, control: &str) -> Result<()> {
    if !mounted(hierarchy, "")? {
        return Err(Error::NotMounted {
            hierarchy: hierarchy.to_path_buf(),
        });
    }

    if !cgroup.is_empty() && !cgroup_dir(hierarchy, cgroup).exists() {
        return Err(Error::CgroupMissing {
            hierarchy: hierarchy.to_path_buf(),
            cgroup: rel(cgroup).to_string(),
        });
    }

    if !control.is_empty() && !cgroup_dir(hierarchy, cgroup).join(control).exists() {
        return Err(Error::ControlMissing {
            control: control.to_string(),
        });
    }

    Ok(())
}

/// Normalizes a cgroup path: leading and trailing slashes are insignificant,
/// and the root cgroup is the empty string.
pub(crate) fn rel(cgroup: &str) -> &str {
    cgroup.trim_matches('/')
}

/// Returns the parent cgroup path; the parent of a top-level cgroup is the
/// root (empty string).
pub(crate) fn parent(cgroup: &str) -> &str {
    let rel = rel(cgroup);
    match rel.rfind('/') {
        Some(i) => &rel[..i],
        None => "",
    }
}

pub(crate) fn cgroup_dir(hierarchy: &Path, cgroup: &str) -> PathBuf {
    let rel = rel(cgroup);
    if rel.is_empty() {
        hierarchy.to_path_buf()
    } else {
        hierarchy.join(rel)
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| Error::io("canonicalize", path, e))
}

fn tokenize(csv: &str) -> impl Iterator<Item = &str> {
    csv.split(',').map(str::trim).filter(|s| !s.is_empty())
}
