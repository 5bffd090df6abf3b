//! Parsers for the /proc files the cgroup engine depends on.
//!
//! # Files Parsed
//! - `/proc/cgroups` - per-subsystem state (hierarchy id, cgroup count, enabled)
//! - `/proc/[pid]/stat` - only the single-character process state field
//!
//! Both are snapshots: every query re-reads the file, nothing is cached.

use cgkit_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Location of the kernel's subsystem table.
pub const PROC_CGROUPS: &str = "/proc/cgroups";

/// Snapshot of a subsystem, modeled after a line in `/proc/cgroups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsystemInfo {
    /// Name of the subsystem (cpu, cpuset, memory, freezer, ...).
    pub name: String,
    /// ID of the hierarchy the subsystem is attached to; 0 means unattached.
    pub hierarchy: u32,
    /// Number of cgroups currently using the subsystem.
    pub cgroups: u32,
    /// Whether the subsystem is enabled.
    pub enabled: bool,
}

/// Returns whether the kernel exposes cgroup support at all.
pub fn cgroups_supported() -> bool {
    Path::new(PROC_CGROUPS).exists()
}

/// Returns the subsystem table from `/proc/cgroups`, keyed by name.
///
/// Duplicate names overwrite earlier entries, matching the kernel's own
/// last-writer-wins presentation.
pub fn subsystems() -> Result<BTreeMap<String, SubsystemInfo>> {
    let content = fs::read_to_string(PROC_CGROUPS)
        .map_err(|e| Error::io("read", PROC_CGROUPS, e))?;
    parse_subsystems(&content)
}

pub(crate) fn parse_subsystems(content: &str) -> Result<BTreeMap<String, SubsystemInfo>> {
    let mut infos = BTreeMap::new();

    for line in content.lines() {
        let line = line.trim();
        // The header line starts with '#subsys_name'.
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let (name, hierarchy, cgroups, enabled) = match (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) {
            (Some(n), Some(h), Some(c), Some(e)) => (n, h, c, e),
            _ => {
                return Err(Error::Parse {
                    file: PROC_CGROUPS.into(),
                    detail: format!("expected 4 fields, got line '{line}'"),
                })
            }
        };

        let parse_u32 = |field: &str, what: &str| -> Result<u32> {
            field.parse().map_err(|_| Error::Parse {
                file: PROC_CGROUPS.into(),
                detail: format!("invalid {what} '{field}' for subsystem '{name}'"),
            })
        };

        infos.insert(
            name.to_string(),
            SubsystemInfo {
                name: name.to_string(),
                hierarchy: parse_u32(hierarchy, "hierarchy id")?,
                cgroups: parse_u32(cgroups, "cgroup count")?,
                enabled: parse_u32(enabled, "enabled flag")? != 0,
            },
        );
    }

    Ok(infos)
}

/// Returns the single-character state of a process from `/proc/[pid]/stat`.
///
/// The comm field may contain spaces and parentheses, so the state is located
/// as the first field after the *last* closing parenthesis.
pub fn process_state(pid: u32) -> Result<char> {
    let path = format!("/proc/{pid}/stat");
    let content = fs::read_to_string(&path).map_err(|e| Error::io("read", &path, e))?;
    parse_process_state(&content).ok_or_else(|| Error::Parse {
        file: path,
        detail: "no state field after comm".into(),
    })
}

fn parse_process_state(stat: &str) -> Option<char> {
    let comm_end = stat.rfind(')')?;
    stat.get(comm_end + 2..)?.chars().next()
}
