//! Job store: the single source of truth for research records.
//!
//! History is ordered most recent first. One record may be marked current.
//! Every mutation is written through to [`SnapshotStorage`]; a failed write is
//! logged and the in-memory state stays authoritative.
//!
//! Several processes may share one snapshot file. Before each mutation the
//! store reloads the snapshot and merges it: records this store changed since
//! its last successful write keep the local version, everything else takes
//! the stored one. A cancel or delete made by another process is therefore
//! seen by the next mutation here instead of being written over.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{JobError, PersistenceError};
use crate::lifecycle::ResearchPatch;
use crate::persistence::{MemoryStorage, SnapshotStorage};
use crate::types::{Research, ResearchStatus};

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A job store shared between the engine and its callers.
pub type SharedStore = Arc<Mutex<JobStore>>;

/// User settings persisted alongside history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_export_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_export_path: "ResearchExports".to_string(),
            default_model: None,
        }
    }
}

/// Serialized form of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub history: Vec<Research>,
    #[serde(default)]
    pub settings: Settings,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

pub struct JobStore {
    history: Vec<Research>,
    current: Option<String>,
    settings: Settings,
    storage: Box<dyn SnapshotStorage>,
    /// Ids changed locally and not yet written.
    dirty: HashSet<String>,
    /// Ids deleted locally and not yet written.
    removed: HashSet<String>,
    settings_dirty: bool,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("history", &self.history.len())
            .field("current", &self.current)
            .field("storage", &self.storage.location())
            .finish()
    }
}

impl JobStore {
    /// Load the store from storage. Missing or unreadable data yields an
    /// empty store.
    pub fn open(storage: impl SnapshotStorage + 'static) -> Self {
        let snapshot = match load_snapshot(&storage) {
            Ok(Some(snapshot)) => {
                info!(
                    location = %storage.location(),
                    jobs = snapshot.history.len(),
                    "Loaded research history"
                );
                snapshot
            }
            Ok(None) => {
                debug!(location = %storage.location(), "No stored research history");
                StoreSnapshot::empty()
            }
            Err(e) => {
                warn!("{}, starting fresh", e);
                StoreSnapshot::empty()
            }
        };

        Self {
            history: snapshot.history,
            current: None,
            settings: snapshot.settings,
            storage: Box::new(storage),
            dirty: HashSet::new(),
            removed: HashSet::new(),
            settings_dirty: false,
        }
    }

    /// An empty store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::open(MemoryStorage::new())
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Insert a new job at the head of history and make it current.
    pub fn add(&mut self, research: Research) -> Result<&Research, JobError> {
        self.refresh();
        if self.get(&research.id).is_some() {
            return Err(JobError::AlreadyExists { id: research.id });
        }
        debug!(job_id = %research.id, title = %research.title, "Job added");
        self.current = Some(research.id.clone());
        self.removed.remove(&research.id);
        self.dirty.insert(research.id.clone());
        self.history.insert(0, research);
        self.persist();
        Ok(&self.history[0])
    }

    /// Apply a patch to the job with `id`.
    ///
    /// Returns `Ok(None)` if no such job exists; the store is unchanged.
    pub fn update(&mut self, id: &str, patch: ResearchPatch) -> Result<Option<&Research>, JobError> {
        self.refresh();
        let Some(index) = self.position(id) else {
            debug!(job_id = %id, patch = patch.name(), "Update for unknown job ignored");
            return Ok(None);
        };
        let name = patch.name();
        self.history[index].apply(patch)?;
        self.dirty.insert(id.to_string());
        debug!(
            job_id = %id,
            patch = name,
            status = %self.history[index].status,
            "Job updated"
        );
        self.persist();
        Ok(Some(&self.history[index]))
    }

    /// Delete a job. Clears the current slot if it pointed at this job.
    pub fn remove(&mut self, id: &str) -> Option<Research> {
        self.refresh();
        let index = self.position(id)?;
        let removed = self.history.remove(index);
        self.dirty.remove(id);
        self.removed.insert(id.to_string());
        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
        info!(job_id = %id, "Job deleted");
        self.persist();
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<&Research> {
        self.history.iter().find(|r| r.id == id)
    }

    pub fn current(&self) -> Option<&Research> {
        self.current.as_deref().and_then(|id| self.get(id))
    }

    /// Point the current slot at an existing job, or clear it with `None`.
    pub fn set_current(&mut self, id: Option<&str>) -> Result<(), JobError> {
        match id {
            Some(id) if self.get(id).is_none() => Err(JobError::NotFound { id: id.to_string() }),
            Some(id) => {
                self.current = Some(id.to_string());
                Ok(())
            }
            None => {
                self.current = None;
                Ok(())
            }
        }
    }

    /// All jobs, most recent first.
    pub fn history(&self) -> &[Research] {
        &self.history
    }

    /// Jobs left in `running`, for example by a previous process.
    pub fn running(&self) -> Vec<&Research> {
        self.history
            .iter()
            .filter(|r| r.status == ResearchStatus::Running)
            .collect()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn update_settings(&mut self, settings: Settings) {
        self.refresh();
        self.settings = settings;
        self.settings_dirty = true;
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            history: self.history.clone(),
            settings: self.settings.clone(),
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.history.iter().position(|r| r.id == id)
    }

    /// Reload the stored snapshot and merge it into memory.
    ///
    /// Unreadable storage is logged and leaves memory untouched.
    pub fn refresh(&mut self) {
        match load_snapshot(self.storage.as_ref()) {
            Ok(Some(stored)) => self.merge(stored),
            Ok(None) => {}
            Err(e) => warn!("{}, keeping in-memory history", e),
        }
    }

    fn merge(&mut self, stored: StoreSnapshot) {
        let stored_ids: HashSet<String> = stored.history.iter().map(|r| r.id.clone()).collect();
        let mut merged = Vec::with_capacity(stored.history.len() + self.dirty.len());
        let mut local = HashMap::new();
        for record in self.history.drain(..) {
            if stored_ids.contains(&record.id) {
                local.insert(record.id.clone(), record);
            } else if self.dirty.contains(&record.id) {
                // Added here and not yet written: stays at the head.
                merged.push(record);
            } else {
                debug!(job_id = %record.id, "Job deleted by another process");
            }
        }
        for record in stored.history {
            if self.removed.contains(&record.id) {
                continue;
            }
            match local.remove(&record.id) {
                Some(mine) if self.dirty.contains(&mine.id) => merged.push(mine),
                _ => merged.push(record),
            }
        }
        self.history = merged;

        let current_gone = self
            .current
            .as_ref()
            .is_some_and(|current| !self.history.iter().any(|r| &r.id == current));
        if current_gone {
            self.current = None;
        }
        if !self.settings_dirty {
            self.settings = stored.settings;
        }
    }

    fn persist(&mut self) {
        let snapshot = self.snapshot();
        let result = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| PersistenceError::WriteFailed {
                path: self.storage.location().into(),
                message: e.to_string(),
            })
            .and_then(|json| self.storage.write(&json));
        match result {
            Ok(()) => {
                self.dirty.clear();
                self.removed.clear();
                self.settings_dirty = false;
            }
            Err(e) => warn!("Failed to persist research history: {}", e),
        }
    }
}

impl StoreSnapshot {
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            history: Vec::new(),
            settings: Settings::default(),
        }
    }
}

fn load_snapshot(storage: &dyn SnapshotStorage) -> Result<Option<StoreSnapshot>, PersistenceError> {
    let Some(raw) = storage.read()? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| PersistenceError::Corrupt {
            location: storage.location(),
            message: e.to_string(),
        })
}
