//! Error types for cgkit.
//!
//! This module provides structured error handling with:
//! - One variant per failure kind the kernel surface can produce
//! - Category classification for error grouping
//! - Recoverability hints for automation
//!
//! Two outcomes are deliberately *not* errors: a freezer or empty-watcher
//! exhausting its retry budget resolves `Ok(false)`, and cancelling an
//! asynchronous operation is done by dropping its future.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cgkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Hierarchy is not mounted as a cgroup filesystem.
    NotMounted,
    /// A cgroup directory or control file is missing (or in the way).
    Path,
    /// A subsystem is unknown, disabled, or attached elsewhere.
    Subsystem,
    /// A kernel-provided file could not be parsed.
    Parse,
    /// A syscall failed; errno text is preserved.
    Io,
    /// The kernel reported a state the protocol does not allow.
    InvalidState,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::NotMounted => write!(f, "not_mounted"),
            ErrorCategory::Path => write!(f, "path"),
            ErrorCategory::Subsystem => write!(f, "subsystem"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::InvalidState => write!(f, "invalid_state"),
        }
    }
}

/// Unified error type for cgkit.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{} is not mounted as a cgroup hierarchy", .hierarchy.display())]
    NotMounted { hierarchy: PathBuf },

    #[error("cgroup '{cgroup}' does not exist in hierarchy {}", .hierarchy.display())]
    CgroupMissing { hierarchy: PathBuf, cgroup: String },

    #[error("control '{control}' does not exist (is the subsystem attached?)")]
    ControlMissing { control: String },

    #[error("{} already exists in the file system", .path.display())]
    AlreadyExists { path: PathBuf },

    #[error("nested cgroups exist under '{cgroup}'")]
    NestedCgroups { cgroup: String },

    #[error("subsystem '{name}' not found in /proc/cgroups")]
    SubsystemMissing { name: String },

    #[error("subsystem '{name}' is not enabled by the kernel")]
    SubsystemDisabled { name: String },

    #[error("subsystem '{name}' is already attached to another hierarchy")]
    SubsystemBusy { name: String },

    #[error("failed to parse {file}: {detail}")]
    Parse { file: String, detail: String },

    #[error("failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send signal {signal} to process {pid}: {source}")]
    Signal {
        pid: u32,
        signal: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected freezer state '{state}'")]
    InvalidFreezerState { state: String },
}

impl Error {
    /// Shorthand for wrapping a syscall failure with the operation and path.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NotMounted { .. } => ErrorCategory::NotMounted,

            Error::CgroupMissing { .. }
            | Error::ControlMissing { .. }
            | Error::AlreadyExists { .. }
            | Error::NestedCgroups { .. } => ErrorCategory::Path,

            Error::SubsystemMissing { .. }
            | Error::SubsystemDisabled { .. }
            | Error::SubsystemBusy { .. } => ErrorCategory::Subsystem,

            Error::Parse { .. } => ErrorCategory::Parse,

            Error::Io { .. } | Error::Signal { .. } => ErrorCategory::Io,

            Error::InvalidFreezerState { .. } => ErrorCategory::InvalidState,
        }
    }

    /// Returns whether this error is potentially recoverable by the caller.
    ///
    /// Recoverable errors may be resolved by mounting the hierarchy, creating
    /// the missing cgroup, draining a racing writer, or simply retrying.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // The caller can mount and retry.
            Error::NotMounted { .. } => true,

            // The caller controls the paths in question.
            Error::CgroupMissing { .. } => true,
            Error::ControlMissing { .. } => true,
            Error::AlreadyExists { .. } => true,
            Error::NestedCgroups { .. } => true,

            // Kernel configuration; nothing to retry at runtime.
            Error::SubsystemMissing { .. } => false,
            Error::SubsystemDisabled { .. } => false,
            Error::SubsystemBusy { .. } => false,

            // A kernel file we failed to understand will not change shape.
            Error::Parse { .. } => false,

            // Often transient (ESRCH from an exiting task, EBUSY, ...).
            Error::Io { .. } => true,
            Error::Signal { .. } => true,

            // Protocol violation; retrying would loop on the same literal.
            Error::InvalidFreezerState { .. } => false,
        }
    }
}
