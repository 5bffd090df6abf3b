//! Mount table inspection and the mount/unmount syscall wrappers.
//!
//! The table is read from `/proc/mounts`; entries are reported in mount
//! order, which matters because a directory mounted more than once is
//! shadowed by its later entries.

use cgkit_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Location of the kernel's mount table.
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    /// Mounted device or pseudo-source.
    pub source: String,
    /// Mount point.
    pub target: PathBuf,
    /// Filesystem type (`cgroup` entries are the ones we care about).
    pub fstype: String,
    /// Comma-separated mount options, split.
    pub options: Vec<String>,
}

impl MountEntry {
    /// Returns whether `name` appears among the mount options.
    pub fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|o| o == name)
    }
}

/// Snapshot of `/proc/mounts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountTable {
    pub entries: Vec<MountEntry>,
}

impl MountTable {
    /// Reads the live mount table.
    pub fn load() -> Result<Self> {
        let content = fs::read_to_string(PROC_MOUNTS)
            .map_err(|e| Error::io("read", PROC_MOUNTS, e))?;
        Self::parse(&content)
    }

    pub(crate) fn parse(content: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }

            // source target fstype options dump pass
            let mut fields = line.split_whitespace();
            let (source, target, fstype, options) = match (
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
            ) {
                (Some(s), Some(t), Some(f), Some(o)) => (s, t, f, o),
                _ => {
                    return Err(Error::Parse {
                        file: PROC_MOUNTS.into(),
                        detail: format!("expected at least 4 fields, got line '{line}'"),
                    })
                }
            };

            entries.push(MountEntry {
                source: unescape(source),
                target: PathBuf::from(unescape(target)),
                fstype: unescape(fstype),
                options: unescape(options).split(',').map(String::from).collect(),
            });
        }

        Ok(MountTable { entries })
    }
}

/// Decodes the octal escapes the kernel uses for whitespace in mount fields
/// (`\040` space, `\011` tab, `\012` newline, `\134` backslash).
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escape: String = chars.clone().take(3).collect();
        match escape.as_str() {
            "040" => out.push(' '),
            "011" => out.push('\t'),
            "012" => out.push('\n'),
            "134" => out.push('\\'),
            // Unknown escapes are passed through verbatim.
            _ => {
                out.push('\\');
                continue;
            }
        }
        chars.nth(2);
    }

    out
}

fn cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        Error::io(
            "encode",
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains NUL"),
        )
    })
}

/// Mounts a cgroup virtual filesystem at `target` with the given
/// comma-separated subsystems as both mount source and mount data.
pub(crate) fn mount_cgroup(target: &Path, subsystems: &str) -> Result<()> {
    let source = CString::new(subsystems).map_err(|_| {
        Error::io(
            "encode",
            target,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "subsystems contain NUL"),
        )
    })?;
    let dir = cstring(target)?;

    let rc = unsafe {
        libc::mount(
            source.as_ptr(),
            dir.as_ptr(),
            c"cgroup".as_ptr(),
            0,
            source.as_ptr() as *const libc::c_void,
        )
    };
    if rc != 0 {
        return Err(Error::io("mount", target, std::io::Error::last_os_error()));
    }

    Ok(())
}

/// Unmounts the filesystem at `target`.
pub(crate) fn unmount(target: &Path) -> Result<()> {
    let dir = cstring(target)?;

    let rc = unsafe { libc::umount(dir.as_ptr()) };
    if rc != 0 {
        return Err(Error::io("unmount", target, std::io::Error::last_os_error()));
    }

    Ok(())
}
