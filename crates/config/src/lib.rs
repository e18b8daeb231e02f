//! Layered configuration for aptblob.
//!
//! Values are resolved from, in increasing priority:
//!
//! 1. Built-in defaults ([`Config::default()`]).
//! 2. A config file: the path given on the command line, or `config.toml`
//!    in the platform config directory when it exists. TOML, YAML and JSON
//!    are chosen by extension.
//! 3. Environment variables prefixed with `APTBLOB_`, using `__` to reach
//!    nested keys (`APTBLOB_RUN__CONCURRENCY=8`).
//!
//! The result is validated once and then passed around as an immutable
//! value.

pub mod error;
mod serde_compression;

use aptblob_compress::Compression;
use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ErrorKind, Result};

/// Prefix for configuration environment variables.
pub const ENV_PREFIX: &str = "APTBLOB_";
/// Separator for nested keys in environment variable names.
pub const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub repository: RepositoryConfig,
    pub run: RunConfig,
    pub retry: RetryConfig,
    pub log: LogConfig,
}

/// Where the container lives. Connection details are handed to the storage
/// backend as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    /// A directory on the local filesystem standing in for the container.
    Local { root: PathBuf },
    /// An Azure Blob Storage container.
    Azure {
        account: String,
        container: String,
        /// Override the service endpoint, e.g. for Azurite.
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        credential: CredentialConfig,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local { root: PathBuf::from(".") }
    }
}

impl StorageConfig {
    /// Container name that trigger payloads are expected to reference.
    pub fn container(&self) -> Option<&str> {
        match self {
            Self::Local { .. } => None,
            Self::Azure { container, .. } => Some(container),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CredentialConfig {
    SharedKey {
        key: String,
    },
    /// Managed identity; `client_id` selects a user-assigned identity.
    Identity {
        #[serde(default)]
        client_id: Option<String>,
    },
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey { .. } => f.debug_struct("SharedKey").field("key", &"<redacted>").finish(),
            Self::Identity { client_id } => f.debug_struct("Identity").field("client_id", client_id).finish(),
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self::Identity { client_id: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Directory holding the package blobs. Empty means the whole container.
    pub prefix: String,
    /// Path of the uncompressed index.
    pub index: String,
    /// Compressed encodings published next to the index.
    #[serde(with = "serde_compression")]
    pub compressions: Vec<Compression>,
    /// Delete cache records whose package no longer exists.
    pub prune_orphans: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            index: "Packages".to_string(),
            compressions: vec![Compression::Xz],
            prune_orphans: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Packages extracted at the same time.
    pub concurrency: usize,
    /// Read everything, write nothing.
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { concurrency: 4, dry_run: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total tries per storage operation, including the first.
    pub attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { attempts: 4, initial_backoff_ms: 200, max_backoff_ms: 5_000 }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Text }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Default config file location, if the platform has a config directory.
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "aptblob").map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Build the layered provider without extracting it.
    ///
    /// An explicit `path` must exist; the default location is only used
    /// when present.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let figment = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => merge_file(figment, path)?,
            None => match default_path() {
                Some(path) if path.is_file() => merge_file(figment, &path)?,
                _ => figment,
            },
        };
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR)))
    }

    /// Extract and validate a configuration from a provider.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Config = figment.extract().map_err(|err| ErrorKind::Load(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve every layer, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::from_figment(&Self::figment(path)?)?;
        tracing::debug!(storage = ?config.storage, repository = ?config.repository, run = ?config.run, "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match &self.storage {
            StorageConfig::Local { root } => {
                if root.as_os_str().is_empty() {
                    exn::bail!(ErrorKind::invalid("storage.root", "must not be empty"));
                }
            },
            StorageConfig::Azure { account, container, credential, .. } => {
                if account.trim().is_empty() {
                    exn::bail!(ErrorKind::invalid("storage.account", "must not be empty"));
                }
                if container.trim().is_empty() || container.contains('/') {
                    exn::bail!(ErrorKind::invalid("storage.container", format!("`{container}` is not a container name")));
                }
                if let CredentialConfig::SharedKey { key } = credential
                    && key.trim().is_empty()
                {
                    exn::bail!(ErrorKind::invalid("storage.credential.key", "must not be empty"));
                }
            },
        }

        let repository = &self.repository;
        if !repository.prefix.is_empty() {
            check_blob_path("repository.prefix", repository.prefix.trim_end_matches('/'))?;
        }
        check_blob_path("repository.index", &repository.index)?;
        if repository.index.ends_with(".deb") || repository.index.ends_with(".package") {
            exn::bail!(ErrorKind::invalid("repository.index", "must not look like a package or cache record"));
        }
        let mut seen = HashSet::new();
        for compression in &repository.compressions {
            if *compression == Compression::None {
                exn::bail!(ErrorKind::invalid("repository.compressions", "the uncompressed index is always published"));
            }
            if !seen.insert(compression) {
                exn::bail!(ErrorKind::invalid("repository.compressions", format!("`{compression}` is listed twice")));
            }
        }

        if self.run.concurrency == 0 {
            exn::bail!(ErrorKind::invalid("run.concurrency", "must be at least 1"));
        }
        if self.retry.attempts == 0 {
            exn::bail!(ErrorKind::invalid("retry.attempts", "must be at least 1"));
        }
        if self.retry.initial_backoff_ms == 0 {
            exn::bail!(ErrorKind::invalid("retry.initial_backoff_ms", "must be at least 1"));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            exn::bail!(ErrorKind::invalid("retry.max_backoff_ms", "must not be less than retry.initial_backoff_ms"));
        }
        Ok(())
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}

/// Relative, `/`-separated, and free of empty, `.` and `..` segments.
fn check_blob_path(key: &'static str, path: &str) -> Result<()> {
    if path.is_empty() {
        exn::bail!(ErrorKind::invalid(key, "must not be empty"));
    }
    if path.starts_with('/') || path.contains('\\') {
        exn::bail!(ErrorKind::invalid(key, format!("`{path}` must be a relative, `/`-separated path")));
    }
    if path.split('/').any(|segment| matches!(segment, "" | "." | "..")) {
        exn::bail!(ErrorKind::invalid(key, format!("`{path}` contains an empty, `.` or `..` segment")));
    }
    Ok(())
}
