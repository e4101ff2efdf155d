//! Progress state for active downloads and extractions.
//!
//! Each operation owns one state object, registers it in
//! [`ActiveOperations`] and hands a clone to a reporter task spawned with
//! [`spawn_reporter`]. The owner only ever inserts; the reporter removes the
//! entry once the state's stop token fires.

use indicatif::{HumanBytes, HumanDuration};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const BAR_WIDTH: usize = 20;

/// `done / total * 100`, or `None` when the total is unknown.
pub fn percent(done: u64, total: Option<u64>) -> Option<f64> {
    match total {
        Some(total) if total > 0 => Some(done as f64 / total as f64 * 100.0),
        _ => None,
    }
}

pub fn progress_bar(percent: f64) -> String {
    let filled = ((BAR_WIDTH as f64 * percent / 100.0) as usize).min(BAR_WIDTH);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled))
}

fn rate(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { bytes as f64 / secs } else { 0.0 }
}

pub struct DownloadState {
    pub filename: String,
    pub total_size: Option<u64>,
    bytes_written: AtomicU64,
    started: Instant,
    complete: AtomicBool,
    stop: CancellationToken,
}

impl DownloadState {
    pub fn new(filename: impl Into<String>, total_size: Option<u64>) -> Self {
        Self {
            filename: filename.into(),
            total_size: total_size.filter(|&size| size > 0),
            bytes_written: AtomicU64::new(0),
            started: Instant::now(),
            complete: AtomicBool::new(false),
            stop: CancellationToken::new(),
        }
    }

    pub fn add(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn mark_complete(&self) {
        self.complete.store(true, Ordering::Relaxed);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Relaxed)
    }

    /// Tells the reporter to finish. Safe to call more than once.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Takes a snapshot, measuring speed against `last` and then moving it forward.
    pub fn snapshot(&self, last: &mut Sample) -> DownloadSnapshot {
        let now = Instant::now();
        let downloaded = self.bytes_written();
        let speed = rate(
            downloaded.saturating_sub(last.bytes),
            now.duration_since(last.at),
        );
        *last = Sample {
            at: now,
            bytes: downloaded,
        };
        DownloadSnapshot {
            filename: self.filename.clone(),
            elapsed: now.duration_since(self.started),
            downloaded,
            total: self.total_size,
            speed,
        }
    }
}

/// Last point the reporter measured speed from.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub at: Instant,
    pub bytes: u64,
}

impl Sample {
    pub fn now() -> Self {
        Self {
            at: Instant::now(),
            bytes: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadSnapshot {
    pub filename: String,
    pub elapsed: Duration,
    pub downloaded: u64,
    pub total: Option<u64>,
    /// Bytes per second since the previous snapshot.
    pub speed: f64,
}

impl DownloadSnapshot {
    pub fn percent(&self) -> Option<f64> {
        percent(self.downloaded, self.total)
    }

    pub fn eta(&self) -> Option<Duration> {
        let total = self.total?;
        if self.speed <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(self.downloaded);
        Some(Duration::from_secs_f64(remaining as f64 / self.speed))
    }
}

impl fmt::Display for DownloadSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "File: {} | Elapsed: {}",
            self.filename,
            HumanDuration(self.elapsed)
        )?;
        if let Some(pct) = self.percent() {
            write!(f, " | Progress: {:.1}% | {}", pct, progress_bar(pct))?;
        }
        write!(f, " | Downloaded: {}", HumanBytes(self.downloaded))?;
        if let Some(total) = self.total {
            write!(f, " | Total: {}", HumanBytes(total))?;
        }
        write!(f, " | Speed: {}/s", HumanBytes(self.speed as u64))?;
        if let Some(eta) = self.eta() {
            write!(f, " | ETA: {}", HumanDuration(eta))?;
        }
        Ok(())
    }
}

pub struct ExtractState {
    pub archive: PathBuf,
    pub total_files: Option<u64>,
    pub total_size: Option<u64>,
    files: AtomicU64,
    bytes: AtomicU64,
    started: Instant,
    stop: CancellationToken,
}

impl ExtractState {
    pub fn new(archive: &Path, total_files: Option<u64>, total_size: Option<u64>) -> Self {
        Self {
            archive: archive.to_path_buf(),
            total_files,
            total_size,
            files: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            started: Instant::now(),
            stop: CancellationToken::new(),
        }
    }

    /// Operation id under which an extraction of `archive` is registered.
    pub fn operation_id(archive: &Path) -> String {
        format!("extract_{}", archive.display())
    }

    pub fn record_entry(&self, size: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn snapshot(&self) -> ExtractSnapshot {
        ExtractSnapshot {
            name: self
                .archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            elapsed: self.started.elapsed(),
            files: self.files.load(Ordering::Relaxed),
            total_files: self.total_files,
            bytes: self.bytes.load(Ordering::Relaxed),
            total_size: self.total_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractSnapshot {
    pub name: String,
    pub elapsed: Duration,
    pub files: u64,
    pub total_files: Option<u64>,
    pub bytes: u64,
    pub total_size: Option<u64>,
}

impl ExtractSnapshot {
    /// Average bytes per second since extraction started.
    pub fn average_speed(&self) -> f64 {
        rate(self.bytes, self.elapsed)
    }
}

impl fmt::Display for ExtractSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Extracting: {} | Elapsed: {} | Files: {}",
            self.name,
            HumanDuration(self.elapsed),
            self.files
        )?;
        if let Some(total) = self.total_files {
            write!(f, "/{}", total)?;
        }
        write!(f, " | Extracted: {}", HumanBytes(self.bytes))?;
        if let Some(total) = self.total_size {
            write!(f, " of {}", HumanBytes(total))?;
        }
        write!(f, " | Speed: {}/s", HumanBytes(self.average_speed() as u64))
    }
}

#[derive(Clone)]
pub enum Operation {
    Download(Arc<DownloadState>),
    Extract(Arc<ExtractState>),
}

impl Operation {
    fn stop_token(&self) -> &CancellationToken {
        match self {
            Operation::Download(state) => &state.stop,
            Operation::Extract(state) => &state.stop,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_token().is_cancelled()
    }

    fn same(&self, other: &Operation) -> bool {
        match (self, other) {
            (Operation::Download(a), Operation::Download(b)) => Arc::ptr_eq(a, b),
            (Operation::Extract(a), Operation::Extract(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn report(&self, last: &mut Sample) {
        match self {
            Operation::Download(state) => info!("{}", state.snapshot(last)),
            Operation::Extract(state) => info!("{}", state.snapshot()),
        }
    }
}

/// Operations currently in progress, keyed by operation id.
#[derive(Clone, Default)]
pub struct ActiveOperations {
    inner: Arc<Mutex<HashMap<String, Operation>>>,
}

impl ActiveOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str, op: Operation) {
        self.lock().insert(id.to_string(), op);
    }

    /// Removes `id` only while it still maps to `op`, so a finished
    /// operation never evicts a newer one registered under the same id.
    pub fn remove_if_same(&self, id: &str, op: &Operation) -> bool {
        let mut ops = self.lock();
        match ops.get(id) {
            Some(current) if current.same(op) => {
                ops.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Operation>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Logs a snapshot of `op` every `interval` until it is stopped, then drops
/// its registry entry.
pub fn spawn_reporter(
    id: String,
    op: Operation,
    registry: ActiveOperations,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stop = op.stop_token().clone();
        let mut ticker = tokio::time::interval(interval);
        let mut last = Sample::now();
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if !op.is_stopped() {
                        op.report(&mut last);
                    }
                }
            }
        }
        if registry.remove_if_same(&id, &op) {
            debug!("Progress reporting finished for {}", id);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_one_decimal() {
        let snapshot = DownloadSnapshot {
            filename: "movie.zip".to_string(),
            elapsed: Duration::from_secs(10),
            downloaded: 250,
            total: Some(1000),
            speed: 25.0,
        };
        assert_eq!(snapshot.percent(), Some(25.0));
        let line = snapshot.to_string();
        assert!(line.contains("Progress: 25.0%"), "{line}");
        assert!(line.contains("[█████░░░░░░░░░░░░░░░]"), "{line}");
        assert_eq!(snapshot.eta(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_unknown_total_omits_progress_and_eta() {
        let snapshot = DownloadSnapshot {
            filename: "blob".to_string(),
            elapsed: Duration::from_secs(1),
            downloaded: 4096,
            total: None,
            speed: 4096.0,
        };
        assert_eq!(snapshot.percent(), None);
        assert_eq!(snapshot.eta(), None);
        let line = snapshot.to_string();
        assert!(!line.contains("Progress"));
        assert!(!line.contains("ETA"));
        assert!(line.contains("Speed:"));
    }

    #[test]
    fn test_zero_speed_has_no_eta() {
        let snapshot = DownloadSnapshot {
            filename: "stalled".to_string(),
            elapsed: Duration::from_secs(1),
            downloaded: 10,
            total: Some(100),
            speed: 0.0,
        };
        assert_eq!(snapshot.eta(), None);
    }

    #[test]
    fn test_zero_total_is_unknown() {
        let state = DownloadState::new("file", Some(0));
        assert_eq!(state.total_size, None);
        assert_eq!(percent(5, Some(0)), None);
    }

    #[test]
    fn test_snapshot_advances_sample() {
        let state = DownloadState::new("file", Some(100));
        state.add(40);
        let mut last = Sample::now();
        let snap = state.snapshot(&mut last);
        assert_eq!(snap.downloaded, 40);
        assert_eq!(last.bytes, 40);
        state.add(10);
        let snap = state.snapshot(&mut last);
        assert_eq!(snap.downloaded, 50);
        assert_eq!(last.bytes, 50);
    }

    #[test]
    fn test_rate_zero_elapsed() {
        assert_eq!(rate(100, Duration::ZERO), 0.0);
        assert_eq!(rate(100, Duration::from_secs(2)), 50.0);
    }

    #[test]
    fn test_extract_snapshot_display() {
        let state = ExtractState::new(Path::new("/dl/show.zip"), Some(3), Some(300));
        state.record_entry(100);
        let snap = state.snapshot();
        assert_eq!(snap.files, 1);
        assert_eq!(snap.bytes, 100);
        let line = snap.to_string();
        assert!(line.starts_with("Extracting: show.zip"), "{line}");
        assert!(line.contains("Files: 1/3"), "{line}");
        assert_eq!(
            ExtractState::operation_id(Path::new("/dl/show.zip")),
            "extract_/dl/show.zip"
        );
    }

    #[test]
    fn test_stop_is_idempotent() {
        let state = Arc::new(DownloadState::new("file", None));
        let op = Operation::Download(state.clone());
        state.stop();
        state.stop();
        assert!(op.is_stopped());
    }

    #[tokio::test]
    async fn test_reporter_removes_entry_after_stop() {
        let registry = ActiveOperations::new();
        let state = Arc::new(DownloadState::new("file", Some(10)));
        let op = Operation::Download(state.clone());
        registry.insert("1", op.clone());
        let handle = spawn_reporter(
            "1".to_string(),
            op,
            registry.clone(),
            Duration::from_millis(20),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.len(), 1);

        state.stop();
        handle.await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_old_reporter_keeps_newer_entry() {
        let registry = ActiveOperations::new();
        let old = Arc::new(DownloadState::new("file", None));
        let old_op = Operation::Download(old.clone());
        registry.insert("7", old_op.clone());
        let handle = spawn_reporter(
            "7".to_string(),
            old_op,
            registry.clone(),
            Duration::from_millis(20),
        );

        let newer = Operation::Download(Arc::new(DownloadState::new("file", None)));
        registry.insert("7", newer.clone());
        old.stop();
        handle.await.unwrap();

        assert_eq!(registry.len(), 1);
        assert!(!newer.is_stopped());
        assert!(registry.remove_if_same("7", &newer));
        assert!(registry.is_empty());
    }
}
