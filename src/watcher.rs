//! One watch cycle: submit new job files, then poll every tracked job and
//! fetch the ones whose output is ready.

use crate::client::{TorrentOptions, UsenetOptions};
use crate::error::{ClientError, WatchError};
use crate::processor::DownloadOutcome;
use crate::response::ApiResponse;
use crate::scanner::{self, SourceKind, WatchFile};
use crate::state::AppState;
use crate::tracker::Job;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Marks a job as having a download underway; the mark is cleared on drop.
struct InFlight<'a> {
    jobs: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlight<'a> {
    /// Returns `None` when the job is already in flight.
    fn acquire(jobs: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        let inserted = jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
        inserted.then(|| Self {
            jobs,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

fn to_json(response: &ApiResponse) -> String {
    serde_json::to_string(response).unwrap_or_default()
}

pub async fn scan_watch_directory(state: &AppState) -> Result<(), WatchError> {
    let watch_dir = &state.settings.watch_dir;
    info!("Scanning watch directory: {:?}", watch_dir);

    let mut submitted: Vec<PathBuf> = Vec::new();
    for file in scanner::scan(watch_dir)? {
        if submit(state, &file).await.is_some() {
            submitted.push(file.path);
        }
    }

    for path in submitted {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("Deleted file: {:?}", path),
            Err(e) => error!("Error deleting file {:?}: {}", path, e),
        }
    }
    Ok(())
}

/// Sends one job file to TorBox and tracks it. Returns the tracking
/// identifier, or `None` when the file should be retried next scan.
async fn submit(state: &AppState, file: &WatchFile) -> Option<String> {
    let kind = file.kind.job_kind();
    info!("Processing {} file: {}", kind, file.file_name);

    let response = match send(state, file).await {
        Ok(response) => response,
        Err(e) => {
            error!("Error processing {} file {}: {}", kind, file.file_name, e);
            return None;
        }
    };

    let Some(submitted) = response.submitted(kind) else {
        error!(
            "Failed to get download ID for: {}. Response: {}",
            file.file_name,
            to_json(&response)
        );
        return None;
    };

    info!(
        "Successfully submitted {}: {}, ID: {}",
        kind, file.file_name, submitted.identifier
    );
    state.tracker.track(
        &submitted.identifier,
        kind,
        &file.name,
        &file.path,
        submitted.provider_id,
        submitted.hash,
    );
    Some(submitted.identifier)
}

async fn send(state: &AppState, file: &WatchFile) -> Result<ApiResponse, ClientError> {
    let settings = &state.settings;
    let torrent = |magnet| TorrentOptions {
        seed: settings.seed_preference,
        allow_zip: settings.allow_zip,
        name: file.name.clone(),
        as_queued: settings.queue_immediately,
        magnet,
    };

    match file.kind {
        SourceKind::TorrentFile => {
            state
                .client
                .create_torrent(&file.file_name, &file.path, &torrent(None))
                .await
        }
        SourceKind::Magnet => {
            let magnet = read_magnet(&file.path).await?;
            state
                .client
                .create_torrent_from_magnet(&torrent(Some(magnet)))
                .await
        }
        SourceKind::Nzb => {
            let options = UsenetOptions {
                name: file.name.clone(),
                post_processing: settings.post_processing,
                as_queued: settings.queue_immediately,
            };
            state
                .client
                .create_usenet_download(&file.file_name, &file.path, &options)
                .await
        }
    }
}

async fn read_magnet(path: &Path) -> Result<String, ClientError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ClientError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(text.trim().to_string())
}

/// Polls every tracked job once, in identifier order.
pub async fn check_download_status(state: &AppState) {
    let ids = state.tracker.ids();
    if ids.is_empty() {
        return;
    }
    info!("Checking status of {} downloads", ids.len());
    debug!("{} operations in progress", state.active.len());

    for id in ids {
        if let Err(e) = check_status(state, &id).await {
            error!("Error checking status for ID {}: {}", id, e);
        }
    }
}

async fn check_status(state: &AppState, id: &str) -> Result<(), ClientError> {
    // Removed by an earlier download in this cycle.
    let Some(job) = state.tracker.get(id) else {
        return Ok(());
    };

    let response = state.client.list(job.kind, job.request_id(id)).await?;
    let Some(record) = response.find_job(job.provider_id.as_deref(), job.hash.as_deref()) else {
        warn!(
            "Could not find {} with ID {} in status response.",
            job.kind, id
        );
        return Ok(());
    };

    let status = record.status();
    info!(
        "{} [{}]: {} | Status: {} | Progress: {:.1}% | Size: {}",
        job.kind.label(),
        id,
        job.name,
        status.state.to_uppercase(),
        status.progress * 100.0,
        status.size
    );

    if status.output_ready {
        request_download(state, id, &job).await;
    }
    Ok(())
}

async fn request_download(state: &AppState, id: &str, job: &Job) {
    let Some(_in_flight) = InFlight::acquire(&state.in_flight, id) else {
        debug!("Download for ID {} already requested", id);
        return;
    };

    let response = match state
        .client
        .request_download_link(job.kind, job.request_id(id))
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!("Error requesting {} download for ID {}: {}", job.kind, id, e);
            return;
        }
    };

    let Some(url) = response.download_link() else {
        error!(
            "Failed to get download URL for {} ID {}: {}",
            job.kind,
            id,
            to_json(&response)
        );
        return;
    };
    info!("Got download URL for {} ID {}: {}", job.kind, id, url);

    let hint = state.processor.download_dir().join(&job.name);
    match state
        .processor
        .download(url, &hint, &job.name, id, &state.tracker, &state.active)
        .await
    {
        DownloadOutcome::Saved(path) => {
            info!("{} ID {} saved to {:?}", job.kind.label(), id, path)
        }
        DownloadOutcome::Extracted(dir) => {
            info!("{} ID {} extracted into {:?}", job.kind.label(), id, dir)
        }
        DownloadOutcome::Failed => {
            warn!("{} ID {} failed to download", job.kind.label(), id)
        }
    }
}
