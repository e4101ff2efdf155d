use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single call against the TorBox API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure while downloading or extracting a finished job.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("download request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid archive {path:?}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ProcessError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }
}

/// Error that aborts a whole watch cycle.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to scan watch directory: {0}")]
    Scan(#[from] walkdir::Error),
}
