//! `aptblob`: keeps the Debian package index in a blob container up to date.

mod cli;
mod error;

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use aptblob_config::{Config, LogConfig, LogFormat, StorageConfig};
use aptblob_repository::{Layout, Reconciler, Report, Request, Settings, TriggerAdapter};
use aptblob_storage::BackendHandle;
use aptblob_storage::backend::{LocalBackend, ReadOnlyBackend, RetryPolicy, RetryingBackend};
use clap::Parser;
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    init_tracing(&config.log);

    match cli.command {
        Command::Reconcile => {
            let report = reconcile(&config, &Request::Manual).await?;
            print_report(&report)
        },
        Command::Event { file } => {
            let payload = read_payload(file.as_deref()).await?;
            let layout = layout(&config)?;
            let adapter = TriggerAdapter::new(layout, config.storage.container().map(str::to_string));
            match adapter.from_json(&payload).or_raise(|| ErrorKind::Trigger)? {
                Some(request) => {
                    let report = reconcile(&config, &request).await?;
                    print_report(&report)
                },
                None => {
                    tracing::info!("Event does not concern any package, nothing to do");
                    Ok(())
                },
            }
        },
        Command::Extract { path, filename } => extract(&path, filename).await,
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match log.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn layout(config: &Config) -> Result<Layout> {
    let repository = &config.repository;
    Layout::new(&repository.prefix, &repository.index, repository.compressions.iter().copied())
        .or_raise(|| ErrorKind::Config)
}

/// Open the configured container, with retries, and read-only for dry runs.
fn open_storage(config: &Config) -> Result<BackendHandle> {
    let backend: BackendHandle = match &config.storage {
        StorageConfig::Local { root } => {
            let root = std::path::absolute(root).or_raise(|| ErrorKind::Input(root.clone()))?;
            Arc::new(LocalBackend::new("local", root).or_raise(|| ErrorKind::Storage)?)
        },
        #[cfg(feature = "azure")]
        StorageConfig::Azure { account, container, endpoint, credential } => {
            use aptblob_config::CredentialConfig;
            use aptblob_storage::backend::{AzureBackend, AzureCredential};
            let credential = match credential {
                CredentialConfig::SharedKey { key } => AzureCredential::SharedKey { key: key.clone() },
                CredentialConfig::Identity { client_id } => AzureCredential::Identity { client_id: client_id.clone() },
            };
            Arc::new(
                AzureBackend::new("azure", account, container, endpoint.clone(), credential)
                    .or_raise(|| ErrorKind::Storage)?,
            )
        },
        #[cfg(not(feature = "azure"))]
        StorageConfig::Azure { .. } => exn::bail!(ErrorKind::Unsupported("azure")),
    };

    let policy = RetryPolicy {
        attempts: config.retry.attempts,
        initial_backoff: config.retry.initial_backoff(),
        max_backoff: config.retry.max_backoff(),
    };
    let backend: BackendHandle = Arc::new(RetryingBackend::new(backend, policy));
    if config.run.dry_run {
        tracing::info!("Dry run, nothing will be written");
        return Ok(Arc::new(ReadOnlyBackend::new(backend)));
    }
    Ok(backend)
}

async fn reconcile(config: &Config, request: &Request) -> Result<Report> {
    let settings = Settings {
        concurrency: config.run.concurrency,
        prune_orphans: config.repository.prune_orphans,
    };
    let reconciler = Reconciler::new(open_storage(config)?, layout(config)?, settings);
    reconciler.run(request).await.or_raise(|| ErrorKind::Run)
}

fn print_report(report: &Report) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, report).or_raise(|| ErrorKind::Output)?;
    std::io::Write::write_all(&mut stdout, b"\n").or_raise(|| ErrorKind::Output)
}

async fn read_payload(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) => tokio::fs::read(path).await.or_raise(|| ErrorKind::Input(path.to_path_buf())),
        None => {
            let mut payload = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut payload)
                .await
                .or_raise(|| ErrorKind::Input(PathBuf::from("-")))?;
            Ok(payload)
        },
    }
}

async fn extract(path: &Path, filename: Option<String>) -> Result<()> {
    let filename = filename
        .or_else(|| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .ok_or_raise(|| ErrorKind::Input(path.to_path_buf()))?;
    let bytes = tokio::fs::read(path).await.or_raise(|| ErrorKind::Input(path.to_path_buf()))?;
    let record = tokio::task::spawn_blocking(move || aptblob_extract::extract_bytes(&filename, &bytes))
        .await
        .or_raise(|| ErrorKind::Extract(path.to_path_buf()))?
        .or_raise(|| ErrorKind::Extract(path.to_path_buf()))?;
    tokio::io::stdout().write_all(&record.to_bytes()).await.or_raise(|| ErrorKind::Output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aptblob_extract::fixture::DebBuilder;

    fn local_config(root: &Path, dry_run: bool) -> Config {
        let mut config = Config::default();
        config.storage = StorageConfig::Local { root: root.to_path_buf() };
        config.repository.prefix = "packages".to_string();
        config.run.dry_run = dry_run;
        config
    }

    fn seed(root: &Path) {
        std::fs::create_dir_all(root.join("packages")).unwrap();
        let deb = DebBuilder::package("foo", "1.0", "amd64").build();
        std::fs::write(root.join("packages/foo_1.0_amd64.deb"), deb).unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_local_container() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let report = reconcile(&local_config(dir.path(), false), &Request::Manual).await.unwrap();
        assert_eq!(report.created, vec![PathBuf::from("packages/foo_1.0_amd64.deb")]);
        assert!(dir.path().join("packages/foo_1.0_amd64.deb.package").is_file());
        let index = std::fs::read_to_string(dir.path().join("Packages")).unwrap();
        assert!(index.contains("Filename: packages/foo_1.0_amd64.deb\n"));
        assert!(dir.path().join("Packages.xz").is_file());

        let again = reconcile(&local_config(dir.path(), false), &Request::Manual).await.unwrap();
        assert_eq!(again.pending, 0);
        assert_eq!(std::fs::read_to_string(dir.path().join("Packages")).unwrap(), index);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_container_alone() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let report = reconcile(&local_config(dir.path(), true), &Request::Manual).await.unwrap();
        assert_eq!(report.created.len(), 1);
        assert!(!dir.path().join("packages/foo_1.0_amd64.deb.package").exists());
        assert!(!dir.path().join("Packages").exists());
    }

    #[test]
    fn test_layout_from_config() {
        let mut config = Config::default();
        config.repository.prefix = "/pool/main/".to_string();
        let layout = layout(&config).unwrap();
        assert_eq!(layout.prefix(), Some(Path::new("pool/main")));
        assert_eq!(layout.index_path(), Path::new("Packages"));
    }

    #[tokio::test]
    async fn test_read_payload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(&path, br#"{"name": "packages/foo.deb"}"#).unwrap();
        assert_eq!(read_payload(Some(&path)).await.unwrap(), br#"{"name": "packages/foo.deb"}"#);

        let err = read_payload(Some(&dir.path().join("missing.json"))).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Input(_)));
    }
}
