//! On-disk cache entry format.
//!
//! One JSON document per entry. The `integrity` digest covers the stored
//! form of the result together with the metadata, so tampering or partial
//! writes are detected without decompressing the payload.

use base64::Engine;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};

use schemaforge_core::hash::hash_canonical_json;

use crate::key::KeyEnvelope;
use crate::{Error, Result};

/// Metadata embedded in every cache entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheMetadata {
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub project: String,
    pub operation: String,
    /// Input file path → content hash at store time
    pub file_hashes: BTreeMap<String, String>,
    pub config_hash: String,
    pub tool_version: String,
    pub environment: BTreeMap<String, String>,
}

impl CacheMetadata {
    /// Build metadata from a key envelope plus the entry's lifetime bounds.
    #[must_use]
    pub fn from_envelope(
        envelope: &KeyEnvelope,
        created: DateTime<Utc>,
        expires: DateTime<Utc>,
    ) -> Self {
        Self {
            created,
            expires,
            project: envelope.project.clone(),
            operation: envelope.operation.clone(),
            file_hashes: envelope.file_hashes.clone(),
            config_hash: envelope.config_hash.clone(),
            tool_version: envelope.tool_version.clone(),
            environment: envelope.environment.clone(),
        }
    }
}

/// A single serialized operation result with its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// The operation output: raw JSON, or a base64 gzip blob when
    /// `compressed` is set.
    pub result: serde_json::Value,
    pub metadata: CacheMetadata,
    /// Digest over (result-as-stored, metadata)
    pub integrity: String,
    #[serde(default)]
    pub compressed: bool,
}

impl CacheEntry {
    /// Compute the integrity digest for a (stored result, metadata) pair.
    pub fn compute_integrity(
        result: &serde_json::Value,
        metadata: &CacheMetadata,
    ) -> Result<String> {
        hash_canonical_json(&(result, metadata))
            .map_err(|e| Error::serialization(e.to_string()))
    }

    /// Recompute the integrity digest and compare with the recorded one.
    #[must_use]
    pub fn integrity_ok(&self) -> bool {
        Self::compute_integrity(&self.result, &self.metadata)
            .map(|h| h == self.integrity)
            .unwrap_or(false)
    }

    /// Has this entry's TTL lapsed at `now`?
    #[must_use]
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.metadata.expires
    }

    /// The result payload, decompressed if necessary.
    ///
    /// Returns `None` when the compressed blob cannot be decoded; the
    /// caller treats that as a miss.
    #[must_use]
    pub fn decode_result(&self) -> Option<serde_json::Value> {
        if !self.compressed {
            return Some(self.result.clone());
        }
        let blob = self.result.as_str()?;
        decompress_result(blob).ok()
    }
}

/// Gzip + base64 a serialized result payload.
pub fn compress_result(result: &serde_json::Value) -> Result<String> {
    let raw = serde_json::to_vec(result)
        .map_err(|e| Error::serialization(format!("Failed to serialize result: {e}")))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .and_then(|()| encoder.finish())
        .map(|gz| base64::engine::general_purpose::STANDARD.encode(gz))
        .map_err(|e| Error::serialization(format!("Failed to compress result: {e}")))
}

/// Inverse of [`compress_result`].
pub fn decompress_result(blob: &str) -> Result<serde_json::Value> {
    let gz = base64::engine::general_purpose::STANDARD
        .decode(blob)
        .map_err(|e| Error::serialization(format!("Invalid base64 payload: {e}")))?;
    let mut decoder = GzDecoder::new(gz.as_slice());
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| Error::serialization(format!("Failed to decompress result: {e}")))?;
    serde_json::from_slice(&raw)
        .map_err(|e| Error::serialization(format!("Corrupt decompressed result: {e}")))
}
