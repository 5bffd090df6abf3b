//! cgkit common types and errors.
//!
//! This crate provides the foundational types shared across cgkit crates:
//! - The unified [`Error`] type with category and recoverability accessors
//! - The [`Result`] alias used by every cgkit operation

pub mod error;

pub use error::{Error, ErrorCategory, Result};
