//! Toolchain configuration.
//!
//! Everything the acquisition manager needs is injected here by the build
//! orchestrator; there is no ambient default instance.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for [`ToolchainManager`](crate::ToolchainManager).
///
/// URL templates accept `{version}` and `{platform}` placeholders; the
/// platform string encodes OS and architecture (e.g. `linux-x86_64`).
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// Root directory for installs, the install manifest and staging files
    pub cache_root: PathBuf,
    /// Name of the executable inside each version directory
    pub executable_name: String,
    /// Template for the artifact download URL
    pub download_url_template: String,
    /// Template for the companion digest URL; `None` disables verification
    pub hash_url_template: Option<String>,
    /// Per-request download timeout
    pub download_timeout: Duration,
    /// Total download attempts before giving up
    pub max_retries: u32,
    /// Verify the installed artifact against the published digest
    pub verify_hash: bool,
    /// Free-space threshold below which a warning is logged
    pub min_free_bytes: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            executable_name: "schemac".into(),
            download_url_template:
                "https://downloads.schemaforge.dev/schemac/{version}/schemac-{platform}.tar.gz"
                    .into(),
            hash_url_template: Some(
                "https://downloads.schemaforge.dev/schemac/{version}/schemac-{platform}.tar.gz.sha256"
                    .into(),
            ),
            download_timeout: Duration::from_secs(120),
            max_retries: 3,
            verify_hash: true,
            min_free_bytes: 100 * 1024 * 1024,
        }
    }
}

impl ToolchainConfig {
    /// Create a config rooted at the given directory.
    #[must_use]
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    /// Set the executable name.
    #[must_use]
    pub fn with_executable_name(mut self, name: impl Into<String>) -> Self {
        self.executable_name = name.into();
        self
    }

    /// Set the download URL template.
    #[must_use]
    pub fn with_download_url_template(mut self, template: impl Into<String>) -> Self {
        self.download_url_template = template.into();
        self
    }

    /// Set the digest URL template.
    #[must_use]
    pub fn with_hash_url_template(mut self, template: impl Into<String>) -> Self {
        self.hash_url_template = Some(template.into());
        self
    }

    /// Set the per-request download timeout.
    #[must_use]
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Set the download attempt budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Toggle digest verification.
    #[must_use]
    pub fn with_verify_hash(mut self, verify: bool) -> Self {
        self.verify_hash = verify;
        self
    }

    /// Set the free-space warning threshold.
    #[must_use]
    pub fn with_min_free_bytes(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }
}

/// Default cache root, shared with the result cache.
#[must_use]
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("schemaforge")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cache_root_ends_with_crate_name() {
        assert!(default_cache_root().ends_with("schemaforge"));
    }

    #[test]
    fn builder_overrides() {
        let config = ToolchainConfig::new("/custom/cache")
            .with_executable_name("other")
            .with_max_retries(7)
            .with_verify_hash(false)
            .with_download_timeout(Duration::from_secs(5));

        assert_eq!(config.cache_root, PathBuf::from("/custom/cache"));
        assert_eq!(config.executable_name, "other");
        assert_eq!(config.max_retries, 7);
        assert!(!config.verify_hash);
        assert_eq!(config.download_timeout, Duration::from_secs(5));
    }

    #[test]
    fn default_templates_carry_placeholders() {
        let config = ToolchainConfig::default();
        assert!(config.download_url_template.contains("{version}"));
        assert!(config.download_url_template.contains("{platform}"));
        let hash = config.hash_url_template.unwrap();
        assert!(hash.contains("{version}"));
    }
}
