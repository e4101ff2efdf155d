//! Wire types for TorBox API responses.
//!
//! Every endpoint answers with the same envelope; only the shape of `data`
//! varies, so it is decoded into [`Payload`] before anything inspects it.

use crate::tracker::JobKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<Payload>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Link(String),
    Records(Vec<JobRecord>),
    Record(JobRecord),
    Other(Value),
}

/// One torrent or usenet entry as reported by the provider.
///
/// All fields are optional; submission and list endpoints fill in
/// different subsets.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JobRecord {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub torrent_id: Option<Value>,
    #[serde(default)]
    pub usenetdownload_id: Option<Value>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub download_state: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub size: Option<Value>,
    #[serde(default)]
    pub download_present: Option<bool>,
}

/// Normalised view of a job's remote state.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub state: String,
    pub progress: f64,
    pub size: String,
    pub output_ready: bool,
}

/// Identifier pulled from a creation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub identifier: String,
    pub provider_id: Option<String>,
    pub hash: Option<String>,
}

/// Renders a JSON id (number or string) as a tracking key.
fn id_string(value: &Option<Value>) -> Option<String> {
    match value.as_ref()? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl JobRecord {
    pub fn id(&self) -> Option<String> {
        id_string(&self.id)
    }

    pub fn submitted(&self, kind: JobKind) -> Option<Submitted> {
        let hash = self.hash.clone().filter(|h| !h.is_empty());
        let provider_id = match kind {
            JobKind::Torrent => id_string(&self.torrent_id),
            JobKind::Usenet => id_string(&self.usenetdownload_id).or_else(|| self.id()),
        };
        let identifier = provider_id.clone().or_else(|| hash.clone())?;
        Some(Submitted {
            identifier,
            provider_id,
            hash,
        })
    }

    pub fn status(&self) -> JobStatus {
        let size = match &self.size {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "0".to_string(),
        };
        JobStatus {
            state: self.download_state.clone().unwrap_or_default(),
            progress: self.progress.unwrap_or(0.0),
            size,
            output_ready: self.download_present.unwrap_or(false),
        }
    }
}

impl Payload {
    /// Locates the entry for a job. A single record is taken as-is; a list is
    /// searched by provider id first and by hash second.
    pub fn find_job(&self, provider_id: Option<&str>, hash: Option<&str>) -> Option<&JobRecord> {
        match self {
            Payload::Record(record) => Some(record),
            Payload::Records(records) => provider_id
                .and_then(|id| records.iter().find(|r| r.id().as_deref() == Some(id)))
                .or_else(|| {
                    hash.and_then(|h| records.iter().find(|r| r.hash.as_deref() == Some(h)))
                }),
            Payload::Link(_) | Payload::Other(_) => None,
        }
    }
}

impl ApiResponse {
    pub fn record(&self) -> Option<&JobRecord> {
        match self.data.as_ref()? {
            Payload::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn submitted(&self, kind: JobKind) -> Option<Submitted> {
        self.record()?.submitted(kind)
    }

    pub fn find_job(&self, provider_id: Option<&str>, hash: Option<&str>) -> Option<&JobRecord> {
        self.data.as_ref()?.find_job(provider_id, hash)
    }

    /// Download URL, present only on a successful link request.
    pub fn download_link(&self) -> Option<&str> {
        match self.data.as_ref()? {
            Payload::Link(url) if self.success && !url.is_empty() => Some(url),
            _ => None,
        }
    }
}
