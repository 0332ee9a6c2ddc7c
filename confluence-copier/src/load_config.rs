/// `load_config` module: builds the [`CopierConfig`] used by every command.
///
/// Two sources are supported:
/// - a static YAML file holding the non-secret parts (instance URLs, usernames,
///   staging options), with API tokens injected from the environment;
/// - the environment alone, using the six `SOURCE_*` / `DESTINATION_*` variables.
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
///
/// Example file:
///
/// ```yaml
/// source:
///   base_url: https://source.atlassian.net/wiki/rest/api
///   username: someone@example.com
/// destination:
///   base_url: https://destination.atlassian.net/wiki/rest/api
///   username: someone@example.com
/// staging_dir: temp
/// download_concurrency: 8
/// ```
use anyhow::{Context, Result};
use confluence_copier_core::config::{CopierConfig, InstanceConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const SOURCE_LINK_VAR: &str = "SOURCE_CONFLUENCE_LINK";
pub const SOURCE_USERNAME_VAR: &str = "SOURCE_CONFLUENCE_USERNAME";
pub const SOURCE_TOKEN_VAR: &str = "SOURCE_CONFLUENCE_API_TOKEN";
pub const DESTINATION_LINK_VAR: &str = "DESTINATION_CONFLUENCE_LINK";
pub const DESTINATION_USERNAME_VAR: &str = "DESTINATION_CONFLUENCE_USERNAME";
pub const DESTINATION_TOKEN_VAR: &str = "DESTINATION_CONFLUENCE_API_TOKEN";

#[derive(Debug, Deserialize)]
pub struct InstanceSection {
    pub base_url: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct FileConfig {
    pub source: InstanceSection,
    pub destination: InstanceSection,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub download_concurrency: Option<usize>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn required_env(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) => {
            error!(var = key, "Environment variable is empty");
            anyhow::bail!("{key} environment variable is empty")
        }
        Err(e) => {
            error!(error = ?e, var = key, "Environment variable not set");
            Err(anyhow::anyhow!("{key} environment variable not set: {e}"))
        }
    }
}

/// Loads a static YAML config file (no secrets) and injects API tokens from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CopierConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref)
        .with_context(|| format!("Failed to read config file {:?}", path_ref))?;

    let file: FileConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let source = InstanceConfig {
        base_url: file.source.base_url,
        username: file.source.username,
        api_token: required_env(SOURCE_TOKEN_VAR)?,
    };
    let destination = InstanceConfig {
        base_url: file.destination.base_url,
        username: file.destination.username,
        api_token: required_env(DESTINATION_TOKEN_VAR)?,
    };

    let mut config = CopierConfig::new(source, destination);
    if let Some(dir) = file.staging_dir {
        config.staging_dir = dir;
    }
    if let Some(workers) = file.download_concurrency {
        config.download_concurrency = workers.max(1);
    }
    if let Some(secs) = file.request_timeout_secs {
        config.request_timeout_secs = secs;
    }

    config.trace_loaded();
    Ok(config)
}

/// Builds the config from environment variables only.
pub fn load_config_from_env() -> Result<CopierConfig> {
    info!("Loading configuration from environment");
    let source = InstanceConfig {
        base_url: required_env(SOURCE_LINK_VAR)?,
        username: required_env(SOURCE_USERNAME_VAR)?,
        api_token: required_env(SOURCE_TOKEN_VAR)?,
    };
    let destination = InstanceConfig {
        base_url: required_env(DESTINATION_LINK_VAR)?,
        username: required_env(DESTINATION_USERNAME_VAR)?,
        api_token: required_env(DESTINATION_TOKEN_VAR)?,
    };
    let config = CopierConfig::new(source, destination);
    config.trace_loaded();
    Ok(config)
}
