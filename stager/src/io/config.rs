//! Stager configuration stored in `stager.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::ObjectLocation;

pub const DEFAULT_CONFIG_FILE: &str = "stager.toml";

/// Stager configuration (TOML).
///
/// Missing fields default to values suitable for a Node.js app shipped as a zip.
/// Empty pointer coordinates are accepted here; the pointer resolver rejects
/// them before any storage call is made.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StagerConfig {
    /// Directory that holds the app directory, its holding sibling and the archive.
    pub workdir: PathBuf,

    /// Restore the previous app when the artifact download fails.
    pub rollback_on_download_failure: bool,

    /// Keep the downloaded archive after a successful unpack.
    pub keep_archive: bool,

    /// Truncate captured command stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub pointer: PointerConfig,
    pub storage: StorageConfig,
    pub unpack: UnpackConfig,
    pub install: InstallConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PointerConfig {
    pub bucket: String,
    pub key: String,
}

impl PointerConfig {
    pub fn location(&self) -> ObjectLocation {
        ObjectLocation::new(self.bucket.trim(), self.key.trim())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// S3-compatible storage; credentials come from the `AWS_*` environment.
    #[default]
    S3,
    /// Directory tree where each bucket is a subdirectory of `root`.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Custom S3 endpoint (e.g. MinIO). Plain `http://` endpoints are allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Root directory for the `local` backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    pub pointer_timeout_secs: u64,
    pub download_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            region: None,
            endpoint: None,
            root: None,
            pointer_timeout_secs: 30,
            download_timeout_secs: 10 * 60,
        }
    }
}

impl StorageConfig {
    pub fn pointer_timeout(&self) -> Duration {
        Duration::from_secs(self.pointer_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UnpackConfig {
    /// Extraction command run in `workdir`; `{zip}` expands to the archive path.
    pub command: String,
    /// Per-attempt time limit.
    pub timeout_secs: u64,
}

impl Default for UnpackConfig {
    fn default() -> Self {
        Self {
            command: "unzip -o -q {zip}".to_string(),
            timeout_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallConfig {
    /// Dependency install command run inside the app directory. Empty disables it.
    pub command: String,
    pub timeout_secs: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            command: "npm install --omit=dev".to_string(),
            timeout_secs: 15 * 60,
        }
    }
}

impl Default for StagerConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            rollback_on_download_failure: true,
            keep_archive: false,
            output_limit_bytes: 100_000,
            pointer: PointerConfig::default(),
            storage: StorageConfig::default(),
            unpack: UnpackConfig::default(),
            install: InstallConfig::default(),
        }
    }
}

impl StagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workdir.as_os_str().is_empty() {
            return Err(anyhow!("workdir must not be empty"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.storage.pointer_timeout_secs == 0 {
            return Err(anyhow!("storage.pointer_timeout_secs must be > 0"));
        }
        if self.storage.download_timeout_secs == 0 {
            return Err(anyhow!("storage.download_timeout_secs must be > 0"));
        }
        if self.storage.backend == StorageBackend::Local && self.storage.root.is_none() {
            return Err(anyhow!("storage.root is required for the local backend"));
        }
        if self.unpack.command.trim().is_empty() {
            return Err(anyhow!("unpack.command must not be empty"));
        }
        if self.unpack.timeout_secs == 0 {
            return Err(anyhow!("unpack.timeout_secs must be > 0"));
        }
        if self.install.timeout_secs == 0 {
            return Err(anyhow!("install.timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `StagerConfig::default()`.
pub fn load_config(path: &Path) -> Result<StagerConfig> {
    if !path.exists() {
        let cfg = StagerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: StagerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &StagerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
