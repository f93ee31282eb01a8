//! Error types shared across the schemaforge workspace.

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for toolchain and shared-utility operations.
///
/// Retry policy lives with the variant: `DownloadFailed` is only produced
/// after the retry bound is exhausted, while `InvalidVersion`,
/// `UnsupportedPlatform`, `IntegrityMismatch` and `ExtractionFailed` are
/// deterministic and must never be retried.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The requested tool version is not a valid semantic version.
    #[error("Invalid tool version: {version}")]
    #[diagnostic(
        code(schemaforge::toolchain::invalid_version),
        help("Versions must be full semantic versions, e.g. \"1.4.0\"")
    )]
    InvalidVersion {
        /// The rejected version string
        version: String,
    },

    /// The host OS/architecture pair has no supported download target.
    #[error("Unsupported platform: {os}-{arch}")]
    #[diagnostic(code(schemaforge::toolchain::unsupported_platform))]
    UnsupportedPlatform {
        /// Reported operating system
        os: String,
        /// Reported CPU architecture
        arch: String,
    },

    /// Downloading the tool failed after exhausting the retry budget.
    #[error("Download failed for {version} ({platform}) after {attempts} attempt(s)")]
    #[diagnostic(
        code(schemaforge::toolchain::download_failed),
        help("Check network connectivity and the configured download URL template")
    )]
    DownloadFailed {
        /// Version that was being fetched
        version: String,
        /// Target platform string
        platform: String,
        /// Number of attempts made
        attempts: u32,
        /// The last underlying failure
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The installed artifact's digest does not match the published digest.
    #[error("Integrity mismatch for {version}: expected {expected}, got {actual}")]
    #[diagnostic(
        code(schemaforge::toolchain::integrity_mismatch),
        help("The download may be corrupted or tampered with; the install has been removed")
    )]
    IntegrityMismatch {
        /// Version whose verification failed
        version: String,
        /// Published digest
        expected: String,
        /// Locally computed digest
        actual: String,
    },

    /// Unpacking a downloaded archive failed.
    #[error("Extraction failed: {message}")]
    #[diagnostic(code(schemaforge::toolchain::extraction))]
    ExtractionFailed {
        /// Description of the extraction failure
        message: String,
    },

    /// I/O error with operation context.
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(schemaforge::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// Configuration or validation error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(schemaforge::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Serialization error.
    #[error("Serialization error: {message}")]
    #[diagnostic(code(schemaforge::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("Timeout after {seconds} seconds")]
    #[diagnostic(code(schemaforge::timeout))]
    Timeout {
        /// Deadline that was exceeded
        seconds: u64,
    },
}

impl Error {
    /// Create an invalid-version error
    #[must_use]
    pub fn invalid_version(version: impl Into<String>) -> Self {
        Self::InvalidVersion {
            version: version.into(),
        }
    }

    /// Create an unsupported-platform error
    #[must_use]
    pub fn unsupported_platform(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self::UnsupportedPlatform {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Create a download-failed error carrying the last underlying failure
    #[must_use]
    pub fn download_failed(
        version: impl Into<String>,
        platform: impl Into<String>,
        attempts: u32,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::DownloadFailed {
            version: version.into(),
            platform: platform.into(),
            attempts,
            source: Box::new(source),
        }
    }

    /// Create an integrity-mismatch error
    #[must_use]
    pub fn integrity_mismatch(
        version: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::IntegrityMismatch {
            version: version.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an extraction error
    #[must_use]
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }
}

/// Result type for schemaforge operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_failed_carries_attempts_and_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::download_failed("1.2.3", "linux-x86_64", 4, inner);
        let msg = err.to_string();
        assert!(msg.contains("1.2.3"));
        assert!(msg.contains("linux-x86_64"));
        assert!(msg.contains("4 attempt"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn io_error_formats_path() {
        let err = Error::io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "nope"),
            "/tmp/missing",
            "read",
        );
        let msg = err.to_string();
        assert!(msg.contains("read"));
        assert!(msg.contains("/tmp/missing"));
    }

    #[test]
    fn io_error_without_path() {
        let err = Error::io_no_path(
            std::io::Error::new(std::io::ErrorKind::Other, "x"),
            "flush",
        );
        assert_eq!(err.to_string(), "I/O flush failed");
    }

    #[test]
    fn integrity_mismatch_names_both_digests() {
        let err = Error::integrity_mismatch("2.0.0", "aaaa", "bbbb");
        let msg = err.to_string();
        assert!(msg.contains("aaaa"));
        assert!(msg.contains("bbbb"));
    }
}
