use crate::config::Settings;
use crate::downloads::{ActiveOperations, DownloadState, ExtractState, Operation, spawn_reporter};
use crate::error::ProcessError;
use crate::tracker::JobTracker;
use futures::StreamExt;
use indicatif::{HumanBytes, HumanDuration};
use percent_encoding::percent_decode_str;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use zip::ZipArchive;

/// Bytes written per write call while streaming a download.
pub const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// File saved as-is (not an archive, or extraction failed).
    Saved(PathBuf),
    /// Archive extracted into this directory and removed.
    Extracted(PathBuf),
    Failed,
}

/// What the HEAD probe learned about a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub filename: String,
    pub total_size: Option<u64>,
}

#[derive(Clone)]
pub struct FileProcessor {
    http: reqwest::Client,
    download_dir: PathBuf,
    progress_interval: Duration,
}

impl FileProcessor {
    pub fn new(settings: &Settings) -> Result<Self, reqwest::Error> {
        // No overall timeout: transfers can legitimately take hours.
        let http = reqwest::Client::builder()
            .connect_timeout(settings.request_timeout())
            .build()?;
        Ok(Self::with_client(
            http,
            settings.download_dir.clone(),
            settings.progress_interval(),
        ))
    }

    pub fn with_client(
        http: reqwest::Client,
        download_dir: PathBuf,
        progress_interval: Duration,
    ) -> Self {
        Self {
            http,
            download_dir,
            progress_interval,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Downloads `url` next to `dest_hint`, extracting it when it turns out to
    /// be a zip. The job is de-tracked whatever the outcome.
    pub async fn download(
        &self,
        url: &str,
        dest_hint: &Path,
        name: &str,
        op_id: &str,
        tracker: &JobTracker,
        registry: &ActiveOperations,
    ) -> DownloadOutcome {
        info!("Starting download: {} to {:?}", name, dest_hint);
        let outcome = match self.probe(url, name).await {
            Ok(probe) => self.transfer(url, dest_hint, probe, op_id, registry).await,
            Err(e) => {
                error!("Download error for ID {}: {}", op_id, e);
                DownloadOutcome::Failed
            }
        };
        tracker.remove(op_id);
        outcome
    }

    pub async fn probe(&self, url: &str, name: &str) -> Result<Probe, ProcessError> {
        let response = self.http.head(url).send().await?;
        Ok(probe_headers(response.headers(), name))
    }

    async fn transfer(
        &self,
        url: &str,
        dest_hint: &Path,
        probe: Probe,
        op_id: &str,
        registry: &ActiveOperations,
    ) -> DownloadOutcome {
        let dir = dest_hint.parent().unwrap_or(&self.download_dir);
        let path = dir.join(&probe.filename);

        let state = Arc::new(DownloadState::new(probe.filename.clone(), probe.total_size));
        let op = Operation::Download(state.clone());
        registry.insert(op_id, op.clone());
        spawn_reporter(
            op_id.to_string(),
            op,
            registry.clone(),
            self.progress_interval,
        );

        let outcome = match self.stream_to(url, &path, &state).await {
            Ok(()) => {
                state.mark_complete();
                info!(
                    "Downloaded {} successfully to {:?} ({})",
                    probe.filename,
                    path,
                    HumanBytes(state.bytes_written())
                );
                if is_zip(&path) {
                    state.stop();
                    match self.extract(&path, registry).await {
                        Ok(dir) => DownloadOutcome::Extracted(dir),
                        Err(_) => DownloadOutcome::Saved(path),
                    }
                } else {
                    DownloadOutcome::Saved(path)
                }
            }
            Err(e) => {
                error!("Download error for ID {}: {}", op_id, e);
                if !state.is_complete() && path.exists() {
                    warn!("Keeping partial download at {:?}", path);
                }
                DownloadOutcome::Failed
            }
        };
        state.stop();
        outcome
    }

    async fn stream_to(
        &self,
        url: &str,
        path: &Path,
        state: &DownloadState,
    ) -> Result<(), ProcessError> {
        let response = self.http.get(url).send().await?.error_for_status()?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProcessError::io(parent, e))?;
        }
        let mut file = File::create(path)
            .await
            .map_err(|e| ProcessError::io(path, e))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for piece in chunk.chunks(CHUNK_SIZE) {
                file.write_all(piece)
                    .await
                    .map_err(|e| ProcessError::io(path, e))?;
                state.add(piece.len() as u64);
            }
        }
        file.flush().await.map_err(|e| ProcessError::io(path, e))?;
        Ok(())
    }

    /// Directory an archive is unpacked into: `<download dir>/<archive stem>`.
    pub fn extraction_dir(&self, archive: &Path) -> PathBuf {
        let stem = archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "extracted".to_string());
        self.download_dir.join(stem)
    }

    pub async fn extract(
        &self,
        archive: &Path,
        registry: &ActiveOperations,
    ) -> Result<PathBuf, ProcessError> {
        info!("Extracting ZIP file: {:?}", archive);
        let dest = self.extraction_dir(archive);

        let scanned = {
            let archive = archive.to_path_buf();
            run_blocking(move || scan_archive(&archive)).await
        };
        let (total_files, total_size) = match scanned {
            Ok(totals) => totals,
            Err(e) => {
                error!("ZIP extraction error {:?}: {}", archive, e);
                return Err(e);
            }
        };
        info!(
            "ZIP contains {} files, total size {}",
            total_files,
            HumanBytes(total_size)
        );

        let id = ExtractState::operation_id(archive);
        let state = Arc::new(ExtractState::new(
            archive,
            Some(total_files),
            Some(total_size),
        ));
        let op = Operation::Extract(state.clone());
        registry.insert(&id, op.clone());
        spawn_reporter(
            id.clone(),
            op.clone(),
            registry.clone(),
            self.progress_interval,
        );

        let result = {
            let (archive, dest, state) = (archive.to_path_buf(), dest.clone(), state.clone());
            run_blocking(move || extract_entries(&archive, &dest, &state)).await
        };
        state.stop();
        registry.remove_if_same(&id, &op);

        if let Err(e) = result {
            error!("ZIP extraction error {:?}: {}", archive, e);
            return Err(e);
        }

        let summary = state.snapshot();
        info!("Successfully extracted ZIP to {:?}", dest);
        info!(
            "Extraction complete: {} | Files: {} | Size: {} | Time: {} | Avg speed: {}/s",
            summary.name,
            summary.files,
            HumanBytes(summary.bytes),
            HumanDuration(summary.elapsed),
            HumanBytes(summary.average_speed() as u64)
        );

        if let Err(e) = tokio::fs::remove_file(archive).await {
            error!("Failed to delete ZIP file {:?}: {}", archive, e);
            return Err(ProcessError::io(archive, e));
        }
        info!("Deleted ZIP file: {:?}", archive);
        Ok(dest)
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, ProcessError>
where
    F: FnOnce() -> Result<T, ProcessError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

fn header_str(headers: &HeaderMap, key: HeaderName) -> Option<&str> {
    headers.get(key).and_then(|v| v.to_str().ok())
}

fn probe_headers(headers: &HeaderMap, name: &str) -> Probe {
    let total_size = header_str(headers, CONTENT_LENGTH).and_then(|v| v.trim().parse().ok());
    Probe {
        filename: resolve_filename(
            header_str(headers, CONTENT_DISPOSITION),
            header_str(headers, CONTENT_TYPE),
            name,
        ),
        total_size,
    }
}

/// Picks the on-disk name for a download: the server's
/// `Content-Disposition` filename, else `<name>.zip` for zip content,
/// else `name` itself.
pub fn resolve_filename(
    disposition: Option<&str>,
    content_type: Option<&str>,
    name: &str,
) -> String {
    if let Some(filename) = disposition.and_then(parse_content_disposition_filename) {
        return filename;
    }
    if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("zip")) {
        return format!("{}.zip", name);
    }
    name.to_string()
}

/// Extracts the filename from a `Content-Disposition` value. `filename*`
/// (RFC 5987) wins over `filename`. Only the final path component is kept.
pub fn parse_content_disposition_filename(value: &str) -> Option<String> {
    let mut plain = None;
    for param in value.split(';') {
        let Some((key, raw)) = param.trim().split_once('=') else {
            continue;
        };
        let raw = raw.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw
                    .split_once("''")
                    .map(|(_, rest)| rest)
                    .unwrap_or(raw)
                    .trim_matches('"');
                let decoded = percent_decode_str(encoded).decode_utf8_lossy();
                if let Some(name) = last_component(&decoded) {
                    return Some(name);
                }
            }
            "filename" => {
                let unquoted = raw
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(raw)
                    .replace("\\\"", "\"");
                if let Some(name) = last_component(&unquoted) {
                    plain = Some(name);
                }
            }
            _ => {}
        }
    }
    plain
}

fn last_component(name: &str) -> Option<String> {
    let normalized = name.replace('\\', "/");
    let file_name = Path::new(&normalized).file_name()?.to_string_lossy();
    let trimmed = file_name.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Counts non-directory entries and their uncompressed size.
fn scan_archive(archive: &Path) -> Result<(u64, u64), ProcessError> {
    let file = std::fs::File::open(archive).map_err(|e| ProcessError::io(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| ProcessError::zip(archive, e))?;
    let mut files = 0;
    let mut size = 0;
    for index in 0..zip.len() {
        let entry = zip
            .by_index(index)
            .map_err(|e| ProcessError::zip(archive, e))?;
        if !entry.is_dir() {
            files += 1;
            size += entry.size();
        }
    }
    Ok((files, size))
}

fn extract_entries(archive: &Path, dest: &Path, state: &ExtractState) -> Result<(), ProcessError> {
    let file = std::fs::File::open(archive).map_err(|e| ProcessError::io(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| ProcessError::zip(archive, e))?;
    std::fs::create_dir_all(dest).map_err(|e| ProcessError::io(dest, e))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| ProcessError::zip(archive, e))?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!("Skipping unsafe archive entry {:?} in {:?}", entry.name(), archive);
            continue;
        };
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProcessError::io(parent, e))?;
        }
        let mut output =
            std::fs::File::create(&target).map_err(|e| ProcessError::io(&target, e))?;
        std::io::copy(&mut entry, &mut output).map_err(|e| ProcessError::io(&target, e))?;
        state.record_entry(entry.size());
    }
    Ok(())
}
