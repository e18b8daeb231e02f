//! Turning host invocations into reconciliation requests.
//!
//! Two payload shapes arrive from the hosting platform:
//!
//! - A storage trigger, `{"name": "<container>/<path>", "length": 1234}`.
//! - Event Grid events, alone or batched in an array, whose `subject` is
//!   `/blobServices/default/containers/<container>/blobs/<path>`.
//!
//! Either way the only thing that survives is "rebuild now": a run always
//! looks at the whole container, so the blob name is carried along purely
//! for logging.

use crate::error::{ErrorKind, Result};
use crate::layout::Layout;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;

const BLOB_CREATED: &str = "Microsoft.Storage.BlobCreated";
const SUBJECT_PREFIX: &str = "/blobServices/default/containers/";
const SUBJECT_BLOBS: &str = "/blobs/";

/// A request to bring the index up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Explicitly asked for, e.g. from the command line or a timer.
    Manual,
    /// One or more package uploads were reported.
    Uploaded(Vec<PathBuf>),
}

impl Display for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Uploaded(blobs) => {
                let names: Vec<_> = blobs.iter().map(|blob| blob.display().to_string()).collect();
                write!(f, "uploaded {}", names.join(", "))
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct StorageTrigger {
    name: String,
    #[serde(default)]
    length: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventGridEvent {
    id: String,
    subject: String,
    #[serde(default)]
    event_type: Option<String>,
}

/// Filters trigger payloads down to package uploads this repository cares
/// about.
#[derive(Debug, Clone)]
pub struct TriggerAdapter {
    layout: Layout,
    container: Option<String>,
}

impl TriggerAdapter {
    /// `container` is the container the repository lives in. Without one
    /// (local storage) blob names are taken as they come.
    pub fn new(layout: Layout, container: Option<String>) -> Self {
        Self { layout, container }
    }

    /// Accept a blob name relative to the container.
    pub fn accept_blob(&self, name: &str) -> Option<Request> {
        let path = PathBuf::from(name.trim_start_matches('/'));
        if self.layout.is_package(&path) {
            Some(Request::Uploaded(vec![path]))
        } else {
            tracing::debug!(blob = name, "Ignoring blob outside the package set");
            None
        }
    }

    /// Normalize a raw JSON payload.
    ///
    /// Returns `Ok(None)` for well-formed payloads that are not about a
    /// package upload, and an error for payloads of unknown shape.
    pub fn from_json(&self, payload: &[u8]) -> Result<Option<Request>> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|err| ErrorKind::InvalidTrigger(format!("not JSON: {err}")))?;
        match value {
            Value::Array(events) => {
                let events = events.into_iter().map(parse_event).collect::<Result<Vec<_>>>()?;
                Ok(self.accept_events(events))
            },
            Value::Object(ref fields) if fields.contains_key("subject") => Ok(self.accept_events(vec![parse_event(value)?])),
            Value::Object(ref fields) if fields.contains_key("name") => {
                let trigger: StorageTrigger = serde_json::from_value(value)
                    .map_err(|err| ErrorKind::InvalidTrigger(format!("storage trigger: {err}")))?;
                tracing::info!(name = %trigger.name, length = ?trigger.length, "Received storage trigger");
                Ok(self.strip_container(&trigger.name).and_then(|name| self.accept_blob(name)))
            },
            other => exn::bail!(ErrorKind::InvalidTrigger(format!("expected an event or storage trigger, got {}", kind_of(&other)))),
        }
    }

    fn accept_events(&self, events: Vec<EventGridEvent>) -> Option<Request> {
        let mut accepted = Vec::new();
        for event in events {
            tracing::info!(id = %event.id, subject = %event.subject, event_type = ?event.event_type, "Received event");
            if event.event_type.as_deref().is_some_and(|kind| kind != BLOB_CREATED) {
                tracing::debug!(id = %event.id, "Ignoring event that is not a blob creation");
                continue;
            }
            let Some((container, blob)) = parse_subject(&event.subject) else {
                tracing::debug!(id = %event.id, "Ignoring event without a blob subject");
                continue;
            };
            if self.container.as_deref().is_some_and(|expected| expected != container) {
                tracing::debug!(id = %event.id, container, "Ignoring event for another container");
                continue;
            }
            if let Some(Request::Uploaded(blobs)) = self.accept_blob(blob) {
                accepted.extend(blobs);
            }
        }
        (!accepted.is_empty()).then_some(Request::Uploaded(accepted))
    }

    /// Storage trigger names start with the container.
    fn strip_container<'a>(&self, name: &'a str) -> Option<&'a str> {
        let Some(expected) = self.container.as_deref() else {
            return Some(name);
        };
        match name.trim_start_matches('/').split_once('/') {
            Some((container, blob)) if container == expected => Some(blob),
            _ => {
                tracing::debug!(name, container = expected, "Ignoring blob from another container");
                None
            },
        }
    }
}

fn parse_event(value: Value) -> Result<EventGridEvent> {
    serde_json::from_value(value).map_err(|err| ErrorKind::InvalidTrigger(format!("event: {err}")).into())
}

/// Split an Event Grid subject into container and blob name.
fn parse_subject(subject: &str) -> Option<(&str, &str)> {
    let rest = subject.strip_prefix(SUBJECT_PREFIX)?;
    let (container, blob) = rest.split_once(SUBJECT_BLOBS)?;
    (!container.is_empty() && !blob.is_empty()).then_some((container, blob))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object without `subject` or `name`",
    }
}
