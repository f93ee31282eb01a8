//! Deterministic cache-key derivation.
//!
//! A key fingerprints everything that can change an operation's output:
//! project id, operation name, tool version, the content hashes of every
//! input file, a canonical projection of the effective configuration, and
//! the relevant environment variable values. Two derivations with identical
//! effective inputs yield identical keys; any single differing input yields
//! a different key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use schemaforge_core::hash::{hash_canonical_json, hash_file_set};

use crate::{Error, Result};

/// Raw inputs to key derivation, as supplied by the orchestrator.
#[derive(Debug, Clone)]
pub struct KeyInputs {
    /// Project identifier (e.g., "api")
    pub project: String,
    /// Operation name (e.g., "validate", "generate")
    pub operation: String,
    /// Version of the tool that will run the operation
    pub tool_version: String,
    /// Input files whose content affects the output
    pub input_files: Vec<PathBuf>,
    /// Projection of the configuration fields that influence output
    pub config: serde_json::Value,
    /// Relevant environment variable values
    pub environment: BTreeMap<String, String>,
}

/// The hashed envelope a key is computed from.
///
/// This is also what gets recorded in entry metadata, so validity checks can
/// re-compare file hashes without re-deriving the key. Maps are `BTreeMap`
/// so the canonical JSON form is order-invariant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyEnvelope {
    pub project: String,
    pub operation: String,
    pub tool_version: String,
    /// Input file path → content hash (missing files record the sentinel)
    pub file_hashes: BTreeMap<String, String>,
    /// Digest of the canonical configuration projection
    pub config_hash: String,
    pub environment: BTreeMap<String, String>,
}

impl KeyEnvelope {
    /// Hash the raw inputs into an envelope.
    ///
    /// Missing input files hash to a sentinel rather than erroring, so a key
    /// can still be computed for validation and miss detection.
    pub fn build(inputs: &KeyInputs) -> Result<Self> {
        let file_hashes = hash_file_set(&inputs.input_files);
        let config_hash = hash_canonical_json(&inputs.config)
            .map_err(|e| Error::serialization(e.to_string()))?;

        Ok(Self {
            project: inputs.project.clone(),
            operation: inputs.operation.clone(),
            tool_version: inputs.tool_version.clone(),
            file_hashes,
            config_hash,
            environment: inputs.environment.clone(),
        })
    }

    /// Derive the composite cache key for this envelope.
    pub fn derive_key(&self) -> Result<String> {
        hash_canonical_json(self).map_err(|e| Error::serialization(e.to_string()))
    }
}

/// Derive a cache key directly from raw inputs.
pub fn derive_key(inputs: &KeyInputs) -> Result<String> {
    KeyEnvelope::build(inputs)?.derive_key()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn inputs_with(dir: &TempDir) -> KeyInputs {
        KeyInputs {
            project: "api".into(),
            operation: "validate".into(),
            tool_version: "1.4.0".into(),
            input_files: vec![dir.path().join("schema.yaml")],
            config: serde_json::json!({"strict": true, "format": "yaml"}),
            environment: BTreeMap::from([("SCHEMAC_OPTS".into(), "-q".into())]),
        }
    }

    #[test]
    fn identical_inputs_identical_keys() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("schema.yaml"), b"openapi: 3.1").unwrap();

        let k1 = derive_key(&inputs_with(&dir)).unwrap();
        let k2 = derive_key(&inputs_with(&dir)).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn file_content_change_changes_key() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("schema.yaml"), b"v1").unwrap();
        let k1 = derive_key(&inputs_with(&dir)).unwrap();

        std::fs::write(dir.path().join("schema.yaml"), b"v2").unwrap();
        let k2 = derive_key(&inputs_with(&dir)).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn config_field_change_changes_key() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("schema.yaml"), b"x").unwrap();

        let mut a = inputs_with(&dir);
        let mut b = inputs_with(&dir);
        a.config = serde_json::json!({"strict": true});
        b.config = serde_json::json!({"strict": false});
        assert_ne!(derive_key(&a).unwrap(), derive_key(&b).unwrap());
    }

    #[test]
    fn tool_version_change_changes_key() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("schema.yaml"), b"x").unwrap();

        let mut b = inputs_with(&dir);
        b.tool_version = "1.5.0".into();
        assert_ne!(
            derive_key(&inputs_with(&dir)).unwrap(),
            derive_key(&b).unwrap()
        );
    }

    #[test]
    fn environment_change_changes_key() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("schema.yaml"), b"x").unwrap();

        let mut b = inputs_with(&dir);
        b.environment.insert("SCHEMAC_OPTS".into(), "-v".into());
        assert_ne!(
            derive_key(&inputs_with(&dir)).unwrap(),
            derive_key(&b).unwrap()
        );
    }

    #[test]
    fn missing_input_file_still_derives() {
        let dir = TempDir::new().unwrap();
        // schema.yaml never written
        let key = derive_key(&inputs_with(&dir)).unwrap();
        assert_eq!(key.len(), 64);

        let envelope = KeyEnvelope::build(&inputs_with(&dir)).unwrap();
        assert!(envelope
            .file_hashes
            .values()
            .any(|h| h == schemaforge_core::hash::ABSENT_FILE_SENTINEL));
    }

    #[test]
    fn config_key_order_does_not_matter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("schema.yaml"), b"x").unwrap();

        let mut a = inputs_with(&dir);
        let mut b = inputs_with(&dir);
        a.config = serde_json::json!({"format": "yaml", "strict": true});
        b.config = serde_json::json!({"strict": true, "format": "yaml"});
        assert_eq!(derive_key(&a).unwrap(), derive_key(&b).unwrap());
    }
}
