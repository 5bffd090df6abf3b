//! Cgroup event notification.
//!
//! cgroups v1 publishes events (OOM, memory thresholds, ...) through the
//! "Notification API": userspace creates an eventfd, opens the control file
//! of interest, and writes `"<eventfd> <control-fd>[ <args>]"` into
//! `cgroup.event_control`. The eventfd then becomes readable once per event,
//! yielding an 8-byte counter.

use super::{cgroup_dir, verify, write_unchecked};
use cgkit_common::{Error, Result};
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::debug;

const EVENT_CONTROL: &str = "cgroup.event_control";

/// Waits for the next kernel-published event on `control` and resolves with
/// the event counter.
///
/// `args` carries control-specific arguments (for example a threshold for
/// `memory.usage_in_bytes`); most controls, including `memory.oom_control`,
/// take none.
///
/// The registered eventfd is owned by the returned future and closed on every
/// exit path; dropping the future before resolution cancels the wait and
/// leaks nothing.
pub async fn listen(
    hierarchy: &Path,
    cgroup: &str,
    control: &str,
    args: Option<&str>,
) -> Result<u64> {
    verify(hierarchy, cgroup, control)?;

    let dir = cgroup_dir(hierarchy, cgroup);

    let efd = register_notifier(hierarchy, cgroup, control, args)?;
    let efd = AsyncFd::with_interest(efd, Interest::READABLE)
        .map_err(|e| Error::io("watch eventfd", &dir, e))?;

    debug!(cgroup, control, "waiting for cgroup event");

    loop {
        let mut guard = efd
            .readable()
            .await
            .map_err(|e| Error::io("poll eventfd", &dir, e))?;

        match guard.try_io(|inner| read_counter(inner.get_ref())) {
            Ok(result) => return result.map_err(|e| Error::io("read eventfd", &dir, e)),
            // Spurious readiness; wait again.
            Err(_would_block) => continue,
        }
    }
}

/// Registers an eventfd notifier for `control` and returns it.
///
/// The control file descriptor only serves to name the control in the
/// `cgroup.event_control` registration line and is closed before returning;
/// the kernel keeps its own reference.
pub(crate) fn register_notifier(
    hierarchy: &Path,
    cgroup: &str,
    control: &str,
    args: Option<&str>,
) -> Result<OwnedFd> {
    let efd = eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK)
        .map_err(|e| Error::io("create eventfd", cgroup_dir(hierarchy, cgroup), e))?;

    let control_path = cgroup_dir(hierarchy, cgroup).join(control);
    let control_file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&control_path)
        .map_err(|e| Error::io("open", &control_path, e))?;

    let mut line = format!("{} {}", efd.as_raw_fd(), control_file.as_raw_fd());
    if let Some(args) = args {
        line.push(' ');
        line.push_str(args);
    }

    write_unchecked(hierarchy, cgroup, EVENT_CONTROL, &line)?;

    Ok(efd)
}

fn read_counter(fd: &OwnedFd) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    let n = unsafe {
        libc::read(
            fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n as usize != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short read from eventfd: {n} of 8 bytes"),
        ));
    }
    Ok(u64::from_ne_bytes(buf))
}

/// Creates a non-blocking, close-on-exec eventfd.
///
/// Prefers the `eventfd2` syscall, which takes the flag bits directly; on
/// kernels predating it (ENOSYS) falls back to plain `eventfd` and applies
/// the flags with fcntl before the descriptor is used for anything else.
fn eventfd(initval: libc::c_uint, flags: libc::c_int) -> io::Result<OwnedFd> {
    let fd = unsafe { libc::syscall(libc::SYS_eventfd2, initval, flags) };
    if fd >= 0 {
        return Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) });
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ENOSYS) {
        return Err(err);
    }

    legacy_eventfd(initval, flags)
}

// The plain eventfd syscall only exists on the legacy-ABI architectures; the
// ones added later launched with eventfd2 already in the syscall table.
#[cfg(any(target_arch = "x86", target_arch = "x86_64", target_arch = "arm"))]
fn legacy_eventfd(initval: libc::c_uint, flags: libc::c_int) -> io::Result<OwnedFd> {
    let fd = unsafe { libc::syscall(libc::SYS_eventfd, initval) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd as RawFd) };

    if flags & libc::EFD_CLOEXEC != 0 {
        set_cloexec(&fd)?;
    }
    if flags & libc::EFD_NONBLOCK != 0 {
        set_nonblock(&fd)?;
    }

    Ok(fd)
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "arm")))]
fn legacy_eventfd(_initval: libc::c_uint, _flags: libc::c_int) -> io::Result<OwnedFd> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "eventfd2 unavailable and this architecture has no legacy eventfd",
    ))
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64", target_arch = "arm"))]
fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64", target_arch = "arm"))]
fn set_nonblock(fd: &OwnedFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
