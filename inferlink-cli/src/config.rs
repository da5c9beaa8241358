//! CLI configuration handling.
//!
//! Settings come from an optional TOML file, then command-line flags and
//! `INFERLINK_*` environment variables override individual fields.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use inferlink_core::ClientConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of the configuration file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Username the platform knows the caller as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    /// Path to a PEM-encoded RSA private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<PathBuf>,

    /// Inline PEM-encoded RSA private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_path: Option<String>,

    /// Total attempts per request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<f64>,

    /// Consecutive terminal failures before the credential is refreshed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub identity: Option<String>,
    pub private_key_file: Option<PathBuf>,
    pub private_key: Option<String>,
    pub base_url: Option<String>,
}

/// A configuration together with the file it was read from, if any.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: FileConfig,
    pub path: Option<PathBuf>,
}

impl FileConfig {
    /// Parse a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse configuration")
    }

    /// Apply overrides on top of the file values.
    ///
    /// A key given as an override replaces both key fields of the file, so a
    /// flag never conflicts with the file's key source.
    pub fn apply(mut self, overrides: Overrides) -> Self {
        if overrides.private_key_file.is_some() || overrides.private_key.is_some() {
            self.private_key_file = overrides.private_key_file;
            self.private_key = overrides.private_key;
        }
        if let Some(identity) = overrides.identity {
            self.identity = Some(identity);
        }
        if let Some(base_url) = overrides.base_url {
            self.base_url = Some(base_url);
        }
        self
    }

    /// Copy safe to print: inline key material is replaced.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.private_key.is_some() {
            copy.private_key = Some("[REDACTED]".to_string());
        }
        copy
    }

    /// Build and validate the client configuration.
    pub fn to_client_config(&self) -> Result<ClientConfig> {
        let identity = self.identity.clone().context(
            "No identity configured; set `identity` in the config file, pass --identity or set INFERLINK_IDENTITY",
        )?;

        let mut builder = ClientConfig::builder(identity);
        if let Some(path) = &self.private_key_file {
            builder = builder.private_key_file(path.clone());
        }
        if let Some(pem) = &self.private_key {
            builder = builder.private_key_pem(pem.clone());
        }
        if let Some(base_url) = &self.base_url {
            builder = builder.base_url(base_url.clone());
        }
        if let Some(auth_path) = &self.auth_path {
            builder = builder.auth_path(auth_path.clone());
        }
        if let Some(count) = self.retry_count {
            builder = builder.retry_count(count);
        }
        if let Some(secs) = self.retry_delay_secs {
            let delay = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("Invalid retry_delay_secs: {}", secs))?;
            builder = builder.retry_delay(delay);
        }
        if let Some(backoff) = self.retry_backoff {
            builder = builder.retry_backoff(backoff);
        }
        if let Some(threshold) = self.failure_threshold {
            builder = builder.failure_threshold(threshold);
        }
        if let Some(secs) = self.request_timeout_secs {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(issuer) = &self.issuer {
            builder = builder.issuer(issuer.clone());
        }

        builder.build().context("Invalid client configuration")
    }
}

/// Load the configuration from `explicit`, or from the default location.
///
/// An explicit path must exist; a missing default file yields an empty
/// configuration.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        return load_from_path(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => load_from_path(&path),
        _ => Ok(LoadedConfig {
            config: FileConfig::default(),
            path: None,
        }),
    }
}

/// Load the configuration from a specific file.
pub fn load_from_path(path: &Path) -> Result<LoadedConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {:?}", path))?;
    let config = FileConfig::from_toml(&contents)
        .with_context(|| format!("Failed to load config from {:?}", path))?;

    Ok(LoadedConfig {
        config,
        path: Some(path.to_path_buf()),
    })
}

/// Platform location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("config.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "inferlink", "inferlink")
}
