//! Acquisition, validation and cleanup of managed `schemac` installs.
//!
//! Acquisition is idempotent: a verified install short-circuits before any
//! network access, and concurrent acquirers converge on the same final state
//! because downloads stage to uniquely named temp paths and only the final
//! rename touches the version directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use schemaforge_core::fsio::{dir_size, sanitize_version};
use schemaforge_core::hash::hash_file;
use schemaforge_core::{Error, Platform, Result};

use crate::config::ToolchainConfig;
use crate::metadata::{InstallManifest, ToolMetadata};

/// Progress callback: (bytes downloaded so far, total if known).
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-call options for [`ToolchainManager::acquire`].
#[derive(Clone, Default)]
pub struct AcquireOptions {
    /// Override the configured download timeout
    pub timeout: Option<Duration>,
    /// Override the configured attempt budget
    pub max_retries: Option<u32>,
    /// Override the configured verification toggle
    pub verify_hash: Option<bool>,
    /// Re-download even over an existing install
    pub force: bool,
    /// Invoked as download chunks arrive
    pub progress: Option<ProgressFn>,
}

impl AcquireOptions {
    /// Create default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the download timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the attempt budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Override digest verification.
    #[must_use]
    pub fn with_verify_hash(mut self, verify: bool) -> Self {
        self.verify_hash = Some(verify);
        self
    }

    /// Force a re-download.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl std::fmt::Debug for AcquireOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquireOptions")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("verify_hash", &self.verify_hash)
            .field("force", &self.force)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Outcome of a [`ToolchainManager::cleanup`] sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Version directories removed
    pub versions_removed: usize,
    /// Leftover staging files removed
    pub temp_files_removed: usize,
    /// Bytes freed by the sweep
    pub bytes_freed: u64,
}

/// Manages `schemac` installs under the shared cache root.
///
/// One instance per process, constructed with explicit configuration.
pub struct ToolchainManager {
    config: ToolchainConfig,
    client: reqwest::Client,
}

impl ToolchainManager {
    /// Create a manager over the given configuration.
    pub fn new(config: ToolchainConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("schemaforge")
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// The configuration this manager was constructed with.
    #[must_use]
    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// Path of the executable for a version. Pure: touches neither the
    /// network nor the filesystem, and sanitizes the version string so a
    /// crafted version cannot escape the cache root.
    #[must_use]
    pub fn tool_path(&self, version: &str) -> PathBuf {
        self.config
            .cache_root
            .join(sanitize_version(version))
            .join(&self.config.executable_name)
    }

    /// Acquire the executable for `version`, downloading and installing it
    /// if a verified install is not already present.
    ///
    /// # Errors
    ///
    /// `InvalidVersion` for non-semver input, `UnsupportedPlatform` when the
    /// host has no download target, `DownloadFailed` once the retry budget
    /// is exhausted, `IntegrityMismatch`/`ExtractionFailed` on fatal install
    /// errors (both remove the partial install).
    pub async fn acquire(&self, version: &str, options: &AcquireOptions) -> Result<PathBuf> {
        validate_version(version)?;
        let platform = Platform::current()?;
        let exe = self.tool_path(version);

        if !options.force && self.is_installed(version, &exe) {
            debug!(%version, path = ?exe, "Tool already installed, skipping download");
            return Ok(exe);
        }

        std::fs::create_dir_all(&self.config.cache_root)
            .map_err(|e| Error::io(e, &self.config.cache_root, "create_dir_all"))?;
        self.warn_if_low_disk();

        let url = expand_template(&self.config.download_url_template, version, platform);
        info!(%version, %platform, %url, "Acquiring tool");

        let archive = self
            .download_with_retry(version, platform, &url, options)
            .await?;

        let install_result = self.install(version, &url, &archive);
        let _ = std::fs::remove_file(&archive);
        install_result?;

        let verify = options.verify_hash.unwrap_or(self.config.verify_hash);
        let verified_hash = if verify {
            Some(self.verify_install(version, platform, &exe, options).await?)
        } else {
            None
        };

        let file_size_bytes = std::fs::metadata(&exe)
            .map_err(|e| Error::io(e, &exe, "metadata"))?
            .len();
        let manifest_path = self.manifest_path();
        let mut manifest = InstallManifest::load(&manifest_path);
        manifest.insert(ToolMetadata {
            version: version.to_string(),
            platform: platform.os,
            architecture: platform.arch,
            download_url: url,
            hash: verified_hash,
            installed_at: chrono::Utc::now(),
            executable_path: exe.clone(),
            file_size_bytes,
        });
        manifest.save(&manifest_path)?;

        info!(%version, path = ?exe, "Tool installed");
        Ok(exe)
    }

    /// Check that an install exists, is executable and answers a version
    /// query within a short timeout. Never errors.
    pub async fn validate(&self, version: &str) -> bool {
        let exe = self.tool_path(version);
        if !is_executable(&exe) {
            return false;
        }

        let mut command = tokio::process::Command::new(&exe);
        command
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        match tokio::time::timeout(VALIDATE_TIMEOUT, command.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(%version, error = %e, "Tool failed to spawn during validation");
                false
            }
            Err(_) => {
                debug!(%version, "Tool validation timed out");
                false
            }
        }
    }

    /// Installed versions, derived from version-named subdirectories of the
    /// cache root. Metadata, entry and staging files are excluded.
    #[must_use]
    pub fn list_installed(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.config.cache_root) else {
            return Vec::new();
        };

        let mut versions: Vec<semver::Version> = entries
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| semver::Version::parse(&e.file_name().to_string_lossy()).ok())
            .collect();
        versions.sort();
        versions.into_iter().map(|v| v.to_string()).collect()
    }

    /// Remove every installed version not in `keep`, plus leftover staging
    /// files. Individual removal failures are logged and skipped.
    pub fn cleanup(&self, keep: &[String]) -> Result<CleanupReport> {
        let root = &self.config.cache_root;
        if !root.exists() {
            return Ok(CleanupReport::default());
        }

        let manifest_path = self.manifest_path();
        let mut manifest = InstallManifest::load(&manifest_path);
        let mut report = CleanupReport::default();
        let mut manifest_changed = false;

        for dirent in std::fs::read_dir(root).map_err(|e| Error::io(e, root, "read_dir"))? {
            let Ok(dirent) = dirent else { continue };
            let path = dirent.path();
            let name = dirent.file_name().to_string_lossy().into_owned();

            if path.is_dir() && semver::Version::parse(&name).is_ok() {
                if keep.contains(&name) {
                    continue;
                }
                let size = dir_size(&path).unwrap_or(0);
                match std::fs::remove_dir_all(&path) {
                    Ok(()) => {
                        report.versions_removed += 1;
                        report.bytes_freed += size;
                        manifest_changed |= manifest.remove(&name);
                        debug!(version = %name, size, "Removed tool install");
                    }
                    Err(e) => {
                        warn!(version = %name, error = %e, "Failed to remove tool install");
                    }
                }
            } else if path.is_file() && name.starts_with("temp-") {
                let size = dirent.metadata().map(|m| m.len()).unwrap_or(0);
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        report.temp_files_removed += 1;
                        report.bytes_freed += size;
                    }
                    Err(e) => {
                        warn!(?path, error = %e, "Failed to remove staging file");
                    }
                }
            }
        }

        if manifest_changed {
            manifest.save(&manifest_path)?;
        }
        Ok(report)
    }

    fn manifest_path(&self) -> PathBuf {
        self.config.cache_root.join("metadata.json")
    }

    /// A version counts as installed when its manifest record exists and the
    /// executable is still present with the execute bit set.
    fn is_installed(&self, version: &str, exe: &Path) -> bool {
        InstallManifest::load(&self.manifest_path())
            .get(version)
            .is_some()
            && is_executable(exe)
    }

    /// Download to a uniquely named staging file, retrying with exponential
    /// backoff. The partial file is deleted after every failed attempt.
    async fn download_with_retry(
        &self,
        version: &str,
        platform: Platform,
        url: &str,
        options: &AcquireOptions,
    ) -> Result<PathBuf> {
        let attempts = options.max_retries.unwrap_or(self.config.max_retries).max(1);
        let timeout = options.timeout.unwrap_or(self.config.download_timeout);
        let staging = self.config.cache_root.join(format!(
            "temp-{}-{}",
            sanitize_version(version),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        let mut delay = INITIAL_BACKOFF;
        let mut last_error: Option<Box<dyn std::error::Error + Send + Sync>> = None;

        for attempt in 1..=attempts {
            match self
                .download_once(url, &staging, timeout, options.progress.as_ref())
                .await
            {
                Ok(()) => return Ok(staging),
                Err(e) => {
                    let _ = std::fs::remove_file(&staging);
                    warn!(
                        %version,
                        attempt,
                        attempts,
                        error = %e,
                        "Download attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }

        Err(Error::DownloadFailed {
            version: version.to_string(),
            platform: platform.to_string(),
            attempts,
            source: last_error.unwrap_or_else(|| {
                Box::new(std::io::Error::other("download failed with no recorded error"))
            }),
        })
    }

    async fn download_once(
        &self,
        url: &str,
        staging: &Path,
        timeout: Duration,
        progress: Option<&ProgressFn>,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;

        let total = response.content_length();
        let mut response = response;
        let mut file = tokio::fs::File::create(staging).await?;
        let mut downloaded = 0u64;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if let Some(progress) = progress {
                progress(downloaded, total);
            }
        }
        file.flush().await?;
        Ok(())
    }

    /// Unpack the downloaded artifact and swap it into the version
    /// directory. Extraction stages into temp directories so a failure
    /// leaves nothing behind and the final rename is the only step that
    /// touches the target.
    fn install(&self, version: &str, url: &str, archive: &Path) -> Result<()> {
        let sanitized = sanitize_version(version);
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let scratch = self
            .config
            .cache_root
            .join(format!("temp-{sanitized}-{nanos}-unpack"));
        let staging = self
            .config
            .cache_root
            .join(format!("temp-{sanitized}-{nanos}-install"));

        let result = self.install_inner(url, archive, &scratch, &staging, version);
        let _ = std::fs::remove_dir_all(&scratch);
        if result.is_err() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        result
    }

    fn install_inner(
        &self,
        url: &str,
        archive: &Path,
        scratch: &Path,
        staging: &Path,
        version: &str,
    ) -> Result<()> {
        std::fs::create_dir_all(staging).map_err(|e| Error::io(e, staging, "create_dir_all"))?;
        let exe_staged = staging.join(&self.config.executable_name);

        match ArchiveKind::detect(url) {
            ArchiveKind::TarGz => {
                extract_tar_gz(archive, scratch)?;
                let found = find_executable(scratch, &self.config.executable_name)?;
                std::fs::rename(&found, &exe_staged)
                    .map_err(|e| Error::io(e, &exe_staged, "rename"))?;
            }
            ArchiveKind::Zip => {
                extract_zip(archive, scratch)?;
                let found = find_executable(scratch, &self.config.executable_name)?;
                std::fs::rename(&found, &exe_staged)
                    .map_err(|e| Error::io(e, &exe_staged, "rename"))?;
            }
            ArchiveKind::Raw => {
                std::fs::copy(archive, &exe_staged)
                    .map_err(|e| Error::io(e, &exe_staged, "copy"))?;
            }
        }

        set_executable(&exe_staged)?;

        let version_dir = self.config.cache_root.join(sanitize_version(version));
        if version_dir.exists() {
            std::fs::remove_dir_all(&version_dir)
                .map_err(|e| Error::io(e, &version_dir, "remove_dir_all"))?;
        }
        std::fs::rename(staging, &version_dir)
            .map_err(|e| Error::io(e, &version_dir, "rename"))
    }

    /// Fetch the published digest and compare it with the installed
    /// artifact. Runs strictly after extraction; a mismatch removes the
    /// install before surfacing. Returns the verified digest.
    async fn verify_install(
        &self,
        version: &str,
        platform: Platform,
        exe: &Path,
        options: &AcquireOptions,
    ) -> Result<String> {
        let Some(template) = &self.config.hash_url_template else {
            return Err(Error::configuration(
                "Hash verification enabled but no hash URL template configured",
            ));
        };
        let hash_url = expand_template(template, version, platform);
        let timeout = options.timeout.unwrap_or(self.config.download_timeout);

        let body = self
            .client
            .get(&hash_url)
            .timeout(timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::download_failed(version, platform.to_string(), 1, e))?
            .text()
            .await
            .map_err(|e| Error::download_failed(version, platform.to_string(), 1, e))?;

        let expected = body
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        let actual = hash_file(exe)?;

        if expected != actual {
            warn!(%version, %expected, %actual, "Digest mismatch, removing install");
            if let Some(version_dir) = exe.parent() {
                let _ = std::fs::remove_dir_all(version_dir);
            }
            return Err(Error::integrity_mismatch(version, expected, actual));
        }

        debug!(%version, digest = %actual, "Digest verified");
        Ok(actual)
    }

    /// Free-space probe. A shortfall (or an unreadable filesystem) is a
    /// warning, never an abort: the estimate is heuristic and blocking an
    /// acquisition on it would be worse than letting the download fail.
    fn warn_if_low_disk(&self) {
        match available_disk_bytes(&self.config.cache_root) {
            Some(available) if available < self.config.min_free_bytes => {
                warn!(
                    available,
                    required = self.config.min_free_bytes,
                    "Low disk space in cache root"
                );
            }
            Some(_) => {}
            None => debug!("Disk space probe unavailable on this platform"),
        }
    }
}

/// Reject anything that is not a full semantic version.
fn validate_version(version: &str) -> Result<()> {
    semver::Version::parse(version)
        .map(|_| ())
        .map_err(|_| Error::invalid_version(version))
}

/// Expand `{version}` and `{platform}` placeholders.
fn expand_template(template: &str, version: &str, platform: Platform) -> String {
    template
        .replace("{version}", version)
        .replace("{platform}", &platform.to_string())
}

/// Archive format, detected from the download URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    TarGz,
    Zip,
    Raw,
}

impl ArchiveKind {
    fn detect(url: &str) -> Self {
        let path = url.split('?').next().unwrap_or(url);
        if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            Self::TarGz
        } else if path.ends_with(".zip") {
            Self::Zip
        } else {
            Self::Raw
        }
    }
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive).map_err(|e| Error::io(e, archive, "open"))?;
    let decoder = flate2::read::GzDecoder::new(file);
    tar::Archive::new(decoder)
        .unpack(dest)
        .map_err(|e| Error::extraction(format!("Failed to unpack tar.gz: {e}")))
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive).map_err(|e| Error::io(e, archive, "open"))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| Error::extraction(format!("Failed to open zip: {e}")))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::extraction(format!("Failed to read zip entry: {e}")))?;

        // enclosed_name rejects entries that would escape the destination.
        let Some(rel) = entry.enclosed_name() else {
            continue;
        };
        let out = dest.join(rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| Error::io(e, &out, "create_dir_all"))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        let mut target =
            std::fs::File::create(&out).map_err(|e| Error::io(e, &out, "create"))?;
        std::io::copy(&mut entry, &mut target).map_err(|e| Error::io(e, &out, "write"))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&out, std::fs::Permissions::from_mode(mode));
        }
    }
    Ok(())
}

/// Locate the tool inside an extracted tree: an exact name match wins, then
/// anything under `bin/`, then any executable file.
fn find_executable(dir: &Path, name: &str) -> Result<PathBuf> {
    if let Some(found) = find_by_name(dir, name) {
        return Ok(found);
    }

    let bin = dir.join("bin");
    if bin.is_dir() {
        if let Some(found) = first_file(&bin) {
            return Ok(found);
        }
    }

    find_first_executable(dir).ok_or_else(|| {
        Error::extraction(format!("No '{name}' executable found in extracted archive"))
    })
}

fn find_by_name(dir: &Path, name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.filter_map(std::result::Result::ok) {
        let path = entry.path();
        if path.is_file() && entry.file_name().to_string_lossy() == name {
            return Some(path);
        }
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    subdirs.into_iter().find_map(|d| find_by_name(&d, name))
}

fn first_file(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .find(|p| p.is_file())
}

fn find_first_executable(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.filter_map(std::result::Result::ok) {
        let path = entry.path();
        if path.is_file() && is_executable(&path) {
            return Some(path);
        }
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    subdirs.into_iter().find_map(|d| find_first_executable(&d))
}

fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| Error::io(e, path, "set_permissions"))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn available_disk_bytes(path: &Path) -> Option<u64> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: statvfs only writes into the zeroed struct; c_path outlives
    // the call.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
    if rc == 0 {
        Some(u64::from(stat.f_bavail) * u64::from(stat.f_frsize))
    } else {
        None
    }
}

#[cfg(not(unix))]
fn available_disk_bytes(_path: &Path) -> Option<u64> {
    None
}
