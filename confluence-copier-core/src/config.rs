use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, info};

/// Default parent of the private staging directory, relative to the working directory.
pub const DEFAULT_STAGING_DIR: &str = "temp";

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Connection details for one Confluence instance.
#[derive(Clone, Deserialize)]
pub struct InstanceConfig {
    /// REST API root, e.g. `https://example.atlassian.net/wiki/rest/api`.
    pub base_url: String,
    pub username: String,
    #[serde(default)]
    pub api_token: String,
}

impl std::fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

/// Everything a copier command needs. Built once at start-up and passed by reference.
#[derive(Debug, Clone)]
pub struct CopierConfig {
    pub source: InstanceConfig,
    pub destination: InstanceConfig,
    pub staging_dir: PathBuf,
    pub download_concurrency: usize,
    pub request_timeout_secs: u64,
}

impl CopierConfig {
    pub fn new(source: InstanceConfig, destination: InstanceConfig) -> Self {
        Self {
            source,
            destination,
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            download_concurrency: default_download_concurrency(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            source_url = %self.source.base_url,
            source_user = %self.source.username,
            destination_url = %self.destination.base_url,
            destination_user = %self.destination.username,
            staging_dir = %self.staging_dir.display(),
            download_concurrency = self.download_concurrency,
            "Loaded copier config"
        );
        debug!(?self, "Config loaded (full debug)");
    }
}

/// Attachment download pool size: one worker per available core.
pub fn default_download_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
