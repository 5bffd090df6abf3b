//! cgkit core library.
//!
//! A thin, typed layer over the Linux cgroups v1 filesystem for node agents
//! that launch and contain workload processes:
//! - Subsystem introspection from `/proc/cgroups` and `/proc/mounts`
//! - Hierarchy mount/unmount and cgroup create/remove/enumerate
//! - Control file reads/writes, task enrollment, and signalling
//! - Asynchronous drivers for freezing, event listening, and subtree
//!   destruction
//!
//! Synchronous operations return [`Result`] values directly; asynchronous
//! operations return futures that are cancelled by dropping them. The library
//! keeps no state of its own beyond each outstanding operation - the kernel's
//! cgroup tree is the single source of truth, and every query re-reads it.
//!
//! This crate is Linux-only by construction: everything it touches is a
//! property of the cgroups v1 kernel ABI.

pub mod cgroups;
pub mod fs;
pub mod proc;
pub mod test_log;

pub use cgkit_common::{Error, ErrorCategory, Result};
pub use cgroups::{destroy, freeze, listen, thaw};
