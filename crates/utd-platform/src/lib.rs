//! Optional persistence of reported event IDs.
//!
//! A tracker is session-scoped on its own. Wrapping its reporter in a
//! [`PersistentReporter`] backed by a [`ReportedEventStore`] suppresses
//! reports for events a previous tracker (or process) already reported.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use utd_core::{DecryptionFailure, Reporter};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReportedEventStoreError {
    #[error("reported-event store unavailable: {0}")]
    Unavailable(String),
    #[error("reported-event store backend failure: {0}")]
    Backend(String),
}

pub trait ReportedEventStore: Send + Sync {
    fn has_reported(&self, event_id: &str) -> Result<bool, ReportedEventStoreError>;

    fn mark_reported(&self, event_id: &str) -> Result<(), ReportedEventStoreError>;
}

impl<S: ReportedEventStore + ?Sized> ReportedEventStore for Arc<S> {
    fn has_reported(&self, event_id: &str) -> Result<bool, ReportedEventStoreError> {
        (**self).has_reported(event_id)
    }

    fn mark_reported(&self, event_id: &str) -> Result<(), ReportedEventStoreError> {
        (**self).mark_reported(event_id)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryReportedEventStore {
    data: Arc<RwLock<HashSet<String>>>,
}

impl ReportedEventStore for InMemoryReportedEventStore {
    fn has_reported(&self, event_id: &str) -> Result<bool, ReportedEventStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| ReportedEventStoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.contains(event_id))
    }

    fn mark_reported(&self, event_id: &str) -> Result<(), ReportedEventStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| ReportedEventStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert(event_id.to_owned());
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ReportedEventsFile {
    reported_event_ids: Vec<String>,
}

/// Reported-event store persisted as a JSON document.
///
/// The file is read once on open and rewritten through a temp file on every
/// newly marked event.
pub struct JsonFileReportedEventStore {
    path: PathBuf,
    data: RwLock<HashSet<String>>,
}

impl JsonFileReportedEventStore {
    /// Open the store at `path`. A missing file starts an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ReportedEventStoreError> {
        let path = path.into();
        let ids = load_reported_ids(&path)?;
        debug!(path = %path.display(), count = ids.len(), "opened reported-event store");
        Ok(Self {
            path,
            data: RwLock::new(ids),
        })
    }
}

impl ReportedEventStore for JsonFileReportedEventStore {
    fn has_reported(&self, event_id: &str) -> Result<bool, ReportedEventStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| ReportedEventStoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.contains(event_id))
    }

    fn mark_reported(&self, event_id: &str) -> Result<(), ReportedEventStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| ReportedEventStoreError::Backend("poisoned lock".to_owned()))?;
        if !data.insert(event_id.to_owned()) {
            return Ok(());
        }

        if let Err(err) = save_reported_ids(&self.path, &data) {
            data.remove(event_id);
            return Err(err);
        }
        Ok(())
    }
}

/// Reporter decorator that forwards each failure at most once per store.
pub struct PersistentReporter<R, S> {
    inner: R,
    store: S,
}

impl<R: Reporter, S: ReportedEventStore> PersistentReporter<R, S> {
    pub fn new(inner: R, store: S) -> Self {
        Self { inner, store }
    }
}

impl<R: Reporter, S: ReportedEventStore> Reporter for PersistentReporter<R, S> {
    fn report(&mut self, failure: DecryptionFailure) {
        let event_id = failure.failed_event_id.clone();
        match self.store.has_reported(&event_id) {
            Ok(true) => {
                debug!(%event_id, "failure already reported by an earlier session");
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(%event_id, error = %err, "reported-event lookup failed; reporting anyway");
            }
        }

        self.inner.report(failure);

        if let Err(err) = self.store.mark_reported(&event_id) {
            warn!(%event_id, error = %err, "failed persisting reported event");
        }
    }
}

fn load_reported_ids(path: &Path) -> Result<HashSet<String>, ReportedEventStoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(err) => {
            return Err(ReportedEventStoreError::Unavailable(format!(
                "failed reading {}: {err}",
                path.display()
            )));
        }
    };

    let file = serde_json::from_str::<ReportedEventsFile>(&raw).map_err(|err| {
        ReportedEventStoreError::Backend(format!("failed parsing {}: {err}", path.display()))
    })?;
    Ok(file.reported_event_ids.into_iter().collect())
}

fn save_reported_ids(path: &Path, ids: &HashSet<String>) -> Result<(), ReportedEventStoreError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            ReportedEventStoreError::Unavailable(format!(
                "failed creating store directory {}: {err}",
                parent.display()
            ))
        })?;
    }

    let mut reported_event_ids = ids.iter().cloned().collect::<Vec<_>>();
    reported_event_ids.sort();
    let encoded = serde_json::to_vec(&ReportedEventsFile { reported_event_ids })
        .map_err(|err| ReportedEventStoreError::Backend(err.to_string()))?;

    let temp_path = store_temp_path(path);
    fs::write(&temp_path, encoded).map_err(|err| {
        ReportedEventStoreError::Unavailable(format!(
            "failed writing temp store {}: {err}",
            temp_path.display()
        ))
    })?;

    if let Err(rename_err) = fs::rename(&temp_path, path) {
        // Windows does not allow replacing existing files via rename.
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                return Err(ReportedEventStoreError::Unavailable(format!(
                    "failed replacing store {} after rename error ({rename_err}): {err}",
                    path.display()
                )));
            }
        }
        fs::rename(&temp_path, path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            ReportedEventStoreError::Unavailable(format!(
                "failed writing store {} after temp write: {err}",
                path.display()
            ))
        })?;
    }

    Ok(())
}

fn store_temp_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("reported-events.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}
