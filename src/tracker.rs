use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    Torrent,
    Usenet,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Torrent => "torrent",
            JobKind::Usenet => "usenet",
        }
    }

    /// Capitalised label used in status lines.
    pub fn label(&self) -> &'static str {
        match self {
            JobKind::Torrent => "Torrent",
            JobKind::Usenet => "Usenet",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct Job {
    pub kind: JobKind,
    pub name: String,
    pub submitted_at: DateTime<Utc>,
    pub source_file: PathBuf,
    pub provider_id: Option<String>,
    pub hash: Option<String>,
}

impl Job {
    /// Id to send to the provider: its own id when known, otherwise the tracking key.
    pub fn request_id<'a>(&'a self, identifier: &'a str) -> &'a str {
        self.provider_id.as_deref().unwrap_or(identifier)
    }
}

/// In-memory registry of submitted jobs, keyed by identifier.
#[derive(Clone, Default)]
pub struct JobTracker {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(
        &self,
        identifier: impl ToString,
        kind: JobKind,
        name: &str,
        source_file: &Path,
        provider_id: Option<String>,
        hash: Option<String>,
    ) {
        let identifier = identifier.to_string();
        let job = Job {
            kind,
            name: name.to_string(),
            submitted_at: Utc::now(),
            source_file: source_file.to_path_buf(),
            provider_id,
            hash,
        };
        self.lock().insert(identifier.clone(), job);
        info!(
            "Tracking new {} download: ID: {}, Name: {}",
            kind, identifier, name
        );
    }

    pub fn get(&self, identifier: &str) -> Option<Job> {
        self.lock().get(identifier).cloned()
    }

    pub fn remove(&self, identifier: &str) {
        if self.lock().remove(identifier).is_some() {
            info!("Stopped tracking download ID: {}", identifier);
        }
    }

    pub fn all(&self) -> HashMap<String, Job> {
        self.lock().clone()
    }

    /// Snapshot of the tracked identifiers, sorted for a stable poll order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
