//! Install metadata persistence.
//!
//! One `metadata.json` at the cache root maps installed versions to their
//! [`ToolMetadata`] records. Records are created once per successful install
//! and never mutated; a record disappears when `cleanup` prunes its version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use schemaforge_core::fsio::write_atomic;
use schemaforge_core::{Arch, Error, Os, Result};

/// Record of one installed (version, platform, architecture) triple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolMetadata {
    pub version: String,
    pub platform: Os,
    pub architecture: Arch,
    pub download_url: String,
    /// Hex digest of the installed artifact, when verification ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub installed_at: DateTime<Utc>,
    pub executable_path: PathBuf,
    pub file_size_bytes: u64,
}

/// The on-disk manifest: version → metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallManifest {
    #[serde(default)]
    pub tools: BTreeMap<String, ToolMetadata>,
}

impl InstallManifest {
    /// Load the manifest, treating a missing or corrupt file as empty.
    ///
    /// A corrupt manifest must not block acquisition; installs re-register
    /// themselves as they are verified.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(?path, error = %e, "Corrupt install manifest, starting empty");
                Self::default()
            }
        }
    }

    /// Persist the manifest atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::serialization(format!("Failed to serialize manifest: {e}")))?;
        write_atomic(path, json)
    }

    /// Metadata for an installed version, if recorded.
    #[must_use]
    pub fn get(&self, version: &str) -> Option<&ToolMetadata> {
        self.tools.get(version)
    }

    /// Register an install.
    pub fn insert(&mut self, metadata: ToolMetadata) {
        self.tools.insert(metadata.version.clone(), metadata);
    }

    /// Drop the record for a version. Returns true if one existed.
    pub fn remove(&mut self, version: &str) -> bool {
        self.tools.remove(version).is_some()
    }
}
