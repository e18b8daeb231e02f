//! Incremental rebuild of a Debian package index kept in a blob container.
//!
//! The container holds three kinds of blobs:
//!
//! - **packages**: `*.deb` files under the configured prefix, uploaded by
//!   someone else;
//! - **cache records**: one `<package>.package` blob per package, holding
//!   the index paragraph for it;
//! - **index artifacts**: `Packages` and its compressed encodings.
//!
//! A run ([`Reconciler::run()`]) lists the prefix, builds the cache records
//! that are missing, and republishes the index from every record. Each run
//! converges the container on the same state, whatever triggered it and
//! however many other runs overlap with it.
//!
//! [`TriggerAdapter`] turns storage notifications into [`Request`]s.

pub mod assemble;
pub mod cache;
pub mod error;
mod layout;
pub mod prune;
pub mod publish;
mod reconcile;
pub mod scan;
mod trigger;

pub use crate::assemble::Rejected;
pub use crate::layout::{Layout, PACKAGE_SUFFIX, RECORD_SUFFIX};
pub use crate::publish::Artifact;
pub use crate::reconcile::{Extraction, PackageOutcome, Phase, Reconciler, Report, RunEvent, Settings};
pub use crate::scan::Inventory;
pub use crate::trigger::{Request, TriggerAdapter};
