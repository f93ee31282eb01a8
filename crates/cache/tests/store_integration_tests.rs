//! Integration tests for the filesystem-backed result cache.
//!
//! Exercises the full store/lookup/invalidate lifecycle against temp
//! directories, including the failure modes that must degrade to misses.

use schemaforge_cache::{
    CacheConfig, KeyEnvelope, KeyInputs, ResultCache, ValidityOptions, derive_key,
};
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

fn inputs(project: &str, operation: &str, schema: &Path) -> KeyInputs {
    KeyInputs {
        project: project.into(),
        operation: operation.into(),
        tool_version: "1.4.0".into(),
        input_files: vec![schema.to_path_buf()],
        config: serde_json::json!({"strict": true}),
        environment: BTreeMap::new(),
    }
}

fn store_one(
    cache: &ResultCache,
    project: &str,
    operation: &str,
    schema: &Path,
    result: &serde_json::Value,
) -> String {
    let inp = inputs(project, operation, schema);
    let envelope = KeyEnvelope::build(&inp).unwrap();
    let key = envelope.derive_key().unwrap();
    cache.store(&key, result, &envelope).unwrap();
    key
}

#[test]
fn store_get_roundtrip() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, b"openapi: 3.1").unwrap();

    let cache = ResultCache::new(CacheConfig::new(dir.path()));
    let result = serde_json::json!({"valid": true, "warnings": []});
    let key = store_one(&cache, "api", "validate", &schema, &result);

    assert_eq!(cache.get(&key), Some(result));
    assert!(cache.is_valid(&key, &ValidityOptions::default()));
}

#[test]
fn large_results_are_compressed_transparently() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, b"x").unwrap();

    let cache = ResultCache::new(
        CacheConfig::new(dir.path())
            .with_compression(true)
            .with_compression_threshold(128),
    );
    let result = serde_json::json!({"output": "y".repeat(10_000)});
    let key = store_one(&cache, "api", "generate", &schema, &result);

    // The stored file holds a compressed blob...
    let raw = std::fs::read_to_string(cache.entry_path(&key)).unwrap();
    let on_disk: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(on_disk["compressed"], serde_json::json!(true));
    assert!(on_disk["result"].is_string());

    // ...but reads are transparent.
    assert_eq!(cache.get(&key), Some(result));
}

#[test]
fn compression_disabled_stores_raw() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, b"x").unwrap();

    let cache = ResultCache::new(CacheConfig::new(dir.path()).with_compression(false));
    let result = serde_json::json!({"output": "y".repeat(10_000)});
    let key = store_one(&cache, "api", "generate", &schema, &result);

    let raw = std::fs::read_to_string(cache.entry_path(&key)).unwrap();
    let on_disk: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(on_disk["compressed"], serde_json::json!(false));
    assert_eq!(cache.get(&key), Some(result));
}

#[test]
fn truncated_json_is_a_miss_not_a_panic() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, b"x").unwrap();

    let cache = ResultCache::new(CacheConfig::new(dir.path()));
    let key = store_one(&cache, "api", "validate", &schema, &serde_json::json!(1));

    let path = cache.entry_path(&key);
    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, &content[..content.len() / 2]).unwrap();

    assert_eq!(cache.get(&key), None);
    assert!(!cache.is_valid(&key, &ValidityOptions::default()));
    // The corrupt file was removed, so the next lookup is a plain miss.
    assert!(!path.exists());
}

#[test]
fn tampered_entry_fails_integrity_and_misses() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, b"x").unwrap();

    let cache = ResultCache::new(CacheConfig::new(dir.path()));
    let key = store_one(
        &cache,
        "api",
        "validate",
        &schema,
        &serde_json::json!({"valid": true}),
    );

    let path = cache.entry_path(&key);
    let mut on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    on_disk["result"] = serde_json::json!({"valid": false});
    std::fs::write(&path, serde_json::to_vec(&on_disk).unwrap()).unwrap();

    assert_eq!(cache.get(&key), None);
    assert!(!cache.is_valid(&key, &ValidityOptions::default()));
    assert!(!path.exists());
}

#[test]
fn zero_ttl_entry_is_immediately_expired() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, b"x").unwrap();

    let cache = ResultCache::new(CacheConfig::new(dir.path()).with_ttl_override("validate", 0));
    let key = store_one(&cache, "api", "validate", &schema, &serde_json::json!(1));

    assert_eq!(cache.get(&key), None);
    assert!(!cache.is_valid(&key, &ValidityOptions::default()));
    assert_eq!(cache.prune_expired().unwrap(), 1);
}

#[test]
fn input_file_drift_invalidates() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, b"version: 1").unwrap();

    let cache = ResultCache::new(CacheConfig::new(dir.path()));
    let key = store_one(&cache, "api", "validate", &schema, &serde_json::json!(1));
    assert!(cache.is_valid(&key, &ValidityOptions::default()));

    // Content (and thus hash) changes from H1 to H2.
    std::fs::write(&schema, b"version: 2").unwrap();
    assert!(!cache.is_valid(&key, &ValidityOptions::default()));
    // Without file checks the entry itself is still intact.
    assert!(cache.is_valid(&key, &ValidityOptions { check_files: false }));

    // And the drifted content derives a different key, so lookups miss.
    let new_key = derive_key(&inputs("api", "validate", &schema)).unwrap();
    assert_ne!(key, new_key);
    assert_eq!(cache.get(&new_key), None);
}

#[test]
fn clean_operation_is_never_stored() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, b"x").unwrap();

    let cache = ResultCache::new(CacheConfig::new(dir.path()));
    let key = store_one(&cache, "api", "clean", &schema, &serde_json::json!(1));

    assert!(!cache.entry_path(&key).exists());
    assert_eq!(cache.get(&key), None);
}

#[test]
fn invalidate_narrows_by_project_and_operation() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, b"x").unwrap();

    let cache = ResultCache::new(CacheConfig::new(dir.path()));
    let k_api_validate = store_one(&cache, "api", "validate", &schema, &serde_json::json!(1));
    let k_api_docs = store_one(&cache, "api", "docs", &schema, &serde_json::json!(2));
    let k_web_validate = store_one(&cache, "web", "validate", &schema, &serde_json::json!(3));

    assert_eq!(cache.invalidate("api", Some("validate")).unwrap(), 1);
    assert_eq!(cache.get(&k_api_validate), None);
    assert!(cache.get(&k_api_docs).is_some());
    assert!(cache.get(&k_web_validate).is_some());

    assert_eq!(cache.invalidate("api", None).unwrap(), 1);
    assert_eq!(cache.get(&k_api_docs), None);
    assert!(cache.get(&k_web_validate).is_some());
}

#[test]
fn eviction_removes_oldest_first_and_keeps_newest() {
    let dir = TempDir::new().unwrap();
    let cache = ResultCache::new(
        CacheConfig::new(dir.path())
            .with_compression(false)
            .with_max_total_bytes(6 * 1024),
    );

    let mut keys = Vec::new();
    for i in 0..4 {
        let schema = dir.path().join(format!("schema-{i}.yaml"));
        std::fs::write(&schema, format!("schema {i}")).unwrap();
        let payload = serde_json::json!({"output": "z".repeat(2048), "index": i});
        keys.push(store_one(&cache, "api", "generate", &schema, &payload));
        // Distinct mtimes so eviction order is deterministic.
        std::thread::sleep(std::time::Duration::from_millis(25));
    }

    let stats = cache.stats().unwrap();
    assert!(stats.total_size_bytes <= 6 * 1024);

    // Oldest entries were evicted, the newest survives.
    assert_eq!(cache.get(&keys[0]), None);
    assert!(cache.get(keys.last().unwrap()).is_some());
}

#[test]
fn clear_removes_entries_and_resets_counters() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, b"x").unwrap();

    // Simulate the toolchain's files sharing the root.
    std::fs::write(dir.path().join("metadata.json"), b"{}").unwrap();
    std::fs::create_dir_all(dir.path().join("1.4.0")).unwrap();

    let cache = ResultCache::new(CacheConfig::new(dir.path()));
    let key = store_one(&cache, "api", "validate", &schema, &serde_json::json!(1));
    assert!(cache.get(&key).is_some());

    cache.clear().unwrap();
    assert_eq!(cache.get(&key), None);
    let stats = cache.stats().unwrap();
    assert_eq!(stats.total_entries, 0);

    // clear() only touches entry files, never the toolchain's state.
    assert!(dir.path().join("metadata.json").exists());
    assert!(dir.path().join("1.4.0").exists());
}

#[test]
fn stats_reports_counts_sizes_and_hit_rate() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("schema.yaml");
    std::fs::write(&schema, b"x").unwrap();

    let cache = ResultCache::new(CacheConfig::new(dir.path()));
    let key = store_one(&cache, "api", "validate", &schema, &serde_json::json!(1));

    let _ = cache.get(&key); // hit
    let _ = cache.get("0000"); // miss

    let stats = cache.stats().unwrap();
    assert_eq!(stats.total_entries, 1);
    assert!(stats.total_size_bytes > 0);
    assert!(!stats.human_size.is_empty());
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    assert!(stats.oldest.is_some());
    assert_eq!(stats.oldest, stats.newest);
}

#[test]
fn missing_input_files_still_produce_usable_keys() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("never-written.yaml");

    let cache = ResultCache::new(CacheConfig::new(dir.path()));
    let key = store_one(&cache, "api", "validate", &missing, &serde_json::json!(1));

    // Entry validates: the file was absent at store time and is still absent.
    assert!(cache.is_valid(&key, &ValidityOptions::default()));

    // Creating the file afterwards counts as drift.
    std::fs::write(&missing, b"now it exists").unwrap();
    assert!(!cache.is_valid(&key, &ValidityOptions::default()));
}
