//! Acquisition, verification and caching of the schemac executable
//!
//! The build orchestrator asks this crate for the path of a specific
//! `schemac` version; everything else is handled here:
//!
//! - Platform resolution and URL templating (`{version}`, `{platform}`)
//! - Downloading with exponential-backoff retries to uniquely named staging
//!   files (`temp-<version>-<timestamp>`)
//! - Archive extraction (tar.gz, zip, raw binary) staged through temp
//!   directories so only the final rename touches the version directory
//! - SHA-256 verification against a published companion digest
//! - Install metadata persisted to `metadata.json` at the cache root
//! - Validation, enumeration and cleanup of installed versions
//!
//! Acquisition is idempotent: a verified install returns immediately with
//! zero network access. Two processes acquiring the same version either
//! both download (wasteful, never corrupting) or one observes the other's
//! completed install; final-state convergence instead of cross-process
//! locking.

pub mod config;
pub mod manager;
pub mod metadata;

pub use config::{ToolchainConfig, default_cache_root};
pub use manager::{AcquireOptions, CleanupReport, ProgressFn, ToolchainManager};
pub use metadata::{InstallManifest, ToolMetadata};

// The shared error taxonomy lives in schemaforge-core.
pub use schemaforge_core::{Error, Result};
