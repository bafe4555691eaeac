//! Persistent CLI settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use photopush_common::RemotePath;
use photopush_storage::dropbox::{DropboxConfig, DEFAULT_CLIENT_IDENTIFIER};
use photopush_sync::{SyncConfig, DEFAULT_CONCURRENCY};

/// Default settings file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "photopush.json";

/// Contents of the settings file. Every field is optional; anything
/// missing falls back to command-line values or built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_list: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<PathBuf>,
}

impl FileConfig {
    /// Read `path`; a missing file is an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Write the settings as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// `self` with every field set in `overrides` replaced.
    pub fn merged(self, overrides: FileConfig) -> Self {
        Self {
            access_token: overrides.access_token.or(self.access_token),
            client_identifier: overrides.client_identifier.or(self.client_identifier),
            local_path: overrides.local_path.or(self.local_path),
            remote_path: overrides.remote_path.or(self.remote_path),
            skip_list: overrides.skip_list.or(self.skip_list),
            concurrency: overrides.concurrency.or(self.concurrency),
            cache_file: overrides.cache_file.or(self.cache_file),
        }
    }

    /// Engine configuration; local and remote paths are required.
    pub fn sync_config(&self) -> Result<SyncConfig> {
        let local_root = self
            .local_path
            .clone()
            .context("No local path configured (use --local-path)")?;
        let remote = self
            .remote_path
            .as_deref()
            .context("No remote path configured (use --remote-path)")?;
        let remote_root = RemotePath::parse(remote).context("Invalid remote path")?;

        let defaults = SyncConfig::default();
        let concurrency = self.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            anyhow::bail!("Concurrency must be at least 1");
        }

        Ok(SyncConfig {
            local_root,
            remote_root,
            skip_list: self.skip_list.clone().unwrap_or(defaults.skip_list),
            concurrency,
            cache_file: self.cache_file.clone().unwrap_or(defaults.cache_file),
            ..SyncConfig::default()
        })
    }

    /// Dropbox credentials; the access token is required.
    pub fn dropbox_config(&self) -> Result<DropboxConfig> {
        let access_token = self
            .access_token
            .clone()
            .context("No access token configured (use --access-token)")?;
        let client_identifier = self
            .client_identifier
            .clone()
            .unwrap_or_else(|| DEFAULT_CLIENT_IDENTIFIER.to_string());
        Ok(DropboxConfig {
            access_token,
            client_identifier,
        })
    }
}
