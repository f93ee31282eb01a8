//! Shared infrastructure for the schemaforge workspace.
//!
//! This crate provides the pieces both halves of schemaforge lean on:
//!
//! - The [`Error`] taxonomy used by the toolchain crate (the result cache
//!   deliberately has its own, smaller error type, since cache failures
//!   must never propagate into a build).
//! - [`platform`]: host OS/architecture resolution to the fixed set of
//!   supported targets.
//! - [`hash`]: SHA-256 content hashing over bytes, files, file sets and
//!   canonically-ordered JSON projections.
//! - [`fsio`]: atomic file writes and small filesystem helpers.

mod error;
pub mod fsio;
pub mod hash;
pub mod platform;

pub use error::{Error, Result};
pub use platform::{Arch, Os, Platform};
