//! One reconciliation run, start to finish.
//!
//! A run walks through a fixed sequence of phases:
//!
//! ```text
//! Idle → Scanning → Extracting → [Pruning] → Assembling → Publishing → Idle
//! ```
//!
//! Runs share nothing but the container. Overlapping runs are safe: cache
//! records are pure functions of their package and are only ever created
//! with create-if-absent writes, and every run publishes an index built
//! from all records it can see.
//!
//! Progress is exposed as a stream of [`RunEvent`]s via
//! [`Reconciler::events()`]; [`Reconciler::run()`] drains that stream and
//! returns the final [`Report`].

use crate::assemble::{self, Rejected};
use crate::cache::{self, WriteOutcome};
use crate::error::{ErrorKind, Result};
use crate::layout::Layout;
use crate::prune;
use crate::publish::{self, Artifact};
use crate::scan;
use crate::trigger::Request;
use aptblob_storage::BackendHandle;
use aptblob_storage::error::ErrorKind as StorageErrorKind;
use async_stream::stream;
use derive_more::Display;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, Stream, StreamExt};
use serde::Serialize;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use tracing::instrument;

/// Tunables for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Packages extracted at the same time.
    pub concurrency: usize,
    /// Delete cache records whose package is gone before assembling.
    pub prune_orphans: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self { concurrency: 4, prune_orphans: false }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Idle,
    Scanning,
    Extracting,
    Pruning,
    Assembling,
    Publishing,
}

impl Phase {
    /// Whether a run may move from `self` to `next`. Any phase may fall
    /// back to [`Idle`](Self::Idle), which is where failed runs end up.
    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (_, Phase::Idle)
                | (Phase::Idle, Phase::Scanning)
                | (Phase::Scanning, Phase::Extracting)
                | (Phase::Extracting, Phase::Pruning | Phase::Assembling)
                | (Phase::Pruning, Phase::Assembling)
                | (Phase::Assembling, Phase::Publishing)
        )
    }
}

/// What happened to one pending package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PackageOutcome {
    /// A cache record was written.
    Created,
    /// A concurrent run wrote the cache record first.
    AlreadyPresent,
    /// The package could not be read as a Debian archive. It is retried on
    /// every run until it is fixed or removed.
    Skipped { reason: String },
    /// The package was deleted after it was listed.
    Vanished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub package: PathBuf,
    #[serde(flatten)]
    pub outcome: PackageOutcome,
}

/// Progress of a run, in the order it happens.
#[derive(Debug)]
pub enum RunEvent {
    /// The run entered a new phase.
    Phase(Phase),
    /// The package prefix has been listed.
    Scanned { packages: usize, pending: usize, orphans: usize },
    /// A pending package has been dealt with.
    Extracted(Extraction),
    /// An orphaned cache record was deleted.
    Pruned(PathBuf),
    /// The index has been built in memory.
    Assembled { entries: usize, rejected: usize },
    /// An index artifact has been written.
    Published(Artifact),
    /// The run succeeded. Always the last event.
    Complete(Box<Report>),
}

/// Summary of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    /// What asked for the run.
    pub request: String,
    /// Package blobs found.
    pub packages: usize,
    /// Package blobs that had no cache record.
    pub pending: usize,
    pub created: Vec<PathBuf>,
    /// Records that a concurrent run wrote first.
    pub already_present: Vec<PathBuf>,
    pub skipped: Vec<Extraction>,
    pub vanished: Vec<PathBuf>,
    /// Cache records without a package.
    pub orphans: Vec<PathBuf>,
    /// Orphans deleted by this run.
    pub pruned: Vec<PathBuf>,
    /// Entries in the published index.
    pub indexed: usize,
    pub rejected: Vec<Rejected>,
    pub artifacts: Vec<Artifact>,
}

impl Report {
    fn record(&mut self, extraction: &Extraction) {
        let package = extraction.package.clone();
        match &extraction.outcome {
            PackageOutcome::Created => self.created.push(package),
            PackageOutcome::AlreadyPresent => self.already_present.push(package),
            PackageOutcome::Skipped { .. } => self.skipped.push(extraction.clone()),
            PackageOutcome::Vanished => self.vanished.push(package),
        }
    }
}

/// Drives runs against one container.
pub struct Reconciler {
    backend: BackendHandle,
    layout: Arc<Layout>,
    settings: Settings,
}

impl Reconciler {
    pub fn new(backend: BackendHandle, layout: Layout, settings: Settings) -> Self {
        Self { backend, layout: Arc::new(layout), settings }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Run to completion and return the report.
    ///
    /// Dropping the future before it reaches the publishing phase leaves
    /// the published index as it was.
    #[instrument(skip_all, fields(backend = self.backend.name(), request = %request))]
    pub async fn run(&self, request: &Request) -> Result<Report> {
        let mut events = pin!(self.events(request));
        while let Some(event) = events.next().await {
            if let RunEvent::Complete(report) = event? {
                tracing::info!(
                    pending = report.pending,
                    created = report.created.len(),
                    skipped = report.skipped.len(),
                    indexed = report.indexed,
                    "Run complete"
                );
                return Ok(*report);
            }
        }
        exn::bail!(ErrorKind::Task)
    }

    /// Stream the events of a run.
    ///
    /// The stream ends after [`RunEvent::Complete`] or after the first
    /// `Err`, which fails the run. It owns everything it needs, so it can be
    /// moved to another task.
    pub fn events(&self, request: &Request) -> impl Stream<Item = Result<RunEvent>> + Send + use<> {
        let backend = self.backend.clone();
        let layout = self.layout.clone();
        let settings = self.settings;
        let request = request.to_string();
        stream! {
            let mut phase = Phase::Idle;
            let mut report = Report { request, ..Report::default() };

            yield Ok(advance(&mut phase, Phase::Scanning));
            let inventory = match scan::scan(&backend, &layout).await {
                Ok(inventory) => inventory,
                Err(err) => {
                    advance(&mut phase, Phase::Idle);
                    yield Err(err);
                    return;
                },
            };
            report.packages = inventory.packages.len();
            report.pending = inventory.pending.len();
            report.orphans = inventory.orphans.clone();
            yield Ok(RunEvent::Scanned {
                packages: inventory.packages.len(),
                pending: inventory.pending.len(),
                orphans: inventory.orphans.len(),
            });

            yield Ok(advance(&mut phase, Phase::Extracting));
            let mut queue = inventory.pending.into_iter();
            let mut processing = FuturesUnordered::new();
            processing.extend(
                queue
                    .by_ref()
                    .take(settings.concurrency.max(1))
                    .map(|package| extract(backend.clone(), layout.clone(), package).boxed()),
            );
            let mut failures = 0usize;
            let mut first_failure = None;
            while let Some(result) = processing.next().await {
                match result {
                    Ok(extraction) => {
                        report.record(&extraction);
                        yield Ok(RunEvent::Extracted(extraction));
                    },
                    // Keep going so in-flight work settles; the run fails
                    // once the queue is drained.
                    Err(err) => {
                        tracing::error!(error = ?err, "Package could not be processed");
                        failures += 1;
                        first_failure.get_or_insert(err);
                    },
                }
                // Pop-n-push, in listing order.
                if let Some(package) = queue.next() {
                    processing.push(extract(backend.clone(), layout.clone(), package).boxed());
                }
            }
            if let Some(err) = first_failure {
                advance(&mut phase, Phase::Idle);
                yield Err(err).or_raise(|| ErrorKind::Incomplete(failures));
                return;
            }

            if settings.prune_orphans && !report.orphans.is_empty() {
                yield Ok(advance(&mut phase, Phase::Pruning));
                match prune::prune(&backend, &report.orphans).await {
                    Ok(pruned) => {
                        for record in &pruned {
                            yield Ok(RunEvent::Pruned(record.clone()));
                        }
                        report.pruned = pruned;
                    },
                    Err(err) => {
                        advance(&mut phase, Phase::Idle);
                        yield Err(err);
                        return;
                    },
                }
            }

            yield Ok(advance(&mut phase, Phase::Assembling));
            let loaded = match load(&backend, &layout, settings.concurrency).await {
                Ok(loaded) => loaded,
                Err(err) => {
                    advance(&mut phase, Phase::Idle);
                    yield Err(err);
                    return;
                },
            };
            let mut records = loaded.records;
            let index = assemble::assemble(&mut records);
            report.indexed = records.len();
            report.rejected = loaded.rejected;
            yield Ok(RunEvent::Assembled { entries: report.indexed, rejected: report.rejected.len() });

            yield Ok(advance(&mut phase, Phase::Publishing));
            match publish::publish(&backend, &layout, index).await {
                Ok(artifacts) => {
                    for artifact in &artifacts {
                        yield Ok(RunEvent::Published(artifact.clone()));
                    }
                    report.artifacts = artifacts;
                },
                Err(err) => {
                    advance(&mut phase, Phase::Idle);
                    yield Err(err);
                    return;
                },
            }

            yield Ok(advance(&mut phase, Phase::Idle));
            report.created.sort();
            report.already_present.sort();
            report.skipped.sort_by(|a, b| a.package.cmp(&b.package));
            report.vanished.sort();
            yield Ok(RunEvent::Complete(Box::new(report)));
        }
    }
}

/// Build and store the cache record for one package.
#[instrument(skip(backend, layout), fields(package = %package.display()))]
async fn extract(backend: BackendHandle, layout: Arc<Layout>, package: PathBuf) -> Result<Extraction> {
    let skipped = |package: PathBuf, reason: String| -> Result<Extraction> {
        Ok(Extraction { package, outcome: PackageOutcome::Skipped { reason } })
    };
    let filename = match layout.filename(&package) {
        Ok(filename) => filename,
        Err(err) => return skipped(package, (*err).to_string()),
    };
    let reader = match backend.reader(&package).await {
        Ok(reader) => reader,
        Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => {
            tracing::info!("Package vanished before it could be read");
            return Ok(Extraction { package, outcome: PackageOutcome::Vanished });
        },
        Err(err) => return Err(err).or_raise(|| ErrorKind::Storage(package.clone())),
    };

    // Parsing and hashing are CPU-bound and the reader blocks.
    let extracted = tokio::task::spawn_blocking(move || aptblob_extract::extract(&filename, reader))
        .await
        .or_raise(|| ErrorKind::Task)?;
    let record = match extracted {
        Ok(record) => record,
        Err(err) if err.is_retryable() => return Err(err).or_raise(|| ErrorKind::Storage(package.clone())),
        Err(err) => {
            tracing::warn!(error = %*err, "Skipping package");
            return skipped(package, (*err).to_string());
        },
    };

    let outcome = match cache::write_record(&backend, &layout.record_path(&package), &record).await? {
        WriteOutcome::Created => PackageOutcome::Created,
        WriteOutcome::AlreadyPresent => PackageOutcome::AlreadyPresent,
    };
    Ok(Extraction { package, outcome })
}

async fn load(backend: &BackendHandle, layout: &Layout, concurrency: usize) -> Result<assemble::Loaded> {
    let records = scan::list_records(backend, layout).await?;
    assemble::load_records(backend, layout, &records, concurrency).await
}

fn advance(phase: &mut Phase, next: Phase) -> RunEvent {
    debug_assert!(phase.can_advance_to(next), "invalid phase change {phase} -> {next}");
    tracing::debug!(from = %phase, to = %next, "Phase change");
    *phase = next;
    RunEvent::Phase(next)
}
