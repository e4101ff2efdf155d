use crate::config::Settings;
use crate::error::ClientError;
use crate::response::ApiResponse;
use crate::tracker::JobKind;
use reqwest::RequestBuilder;
use reqwest::multipart::{Form, Part};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Pause between attempts of the same request.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Fixed-delay retry: `max_retries + 1` attempts in total.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: RETRY_DELAY,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                        attempt, attempts, what, e, self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Giving up on {} after {} attempts: {}", what, attempts, e);
                    return Err(e);
                }
            }
        }
    }
}

/// Creation options for torrents and magnets.
#[derive(Debug, Clone)]
pub struct TorrentOptions {
    pub seed: u8,
    pub allow_zip: bool,
    pub name: String,
    pub as_queued: bool,
    pub magnet: Option<String>,
}

impl TorrentOptions {
    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("seed", self.seed.to_string()),
            ("allow_zip", self.allow_zip.to_string()),
            ("name", self.name.clone()),
            ("as_queued", self.as_queued.to_string()),
        ];
        if let Some(magnet) = &self.magnet {
            fields.push(("magnet", magnet.clone()));
        }
        fields
    }
}

/// Creation options for NZB uploads.
#[derive(Debug, Clone)]
pub struct UsenetOptions {
    pub name: String,
    pub post_processing: i32,
    pub as_queued: bool,
}

impl UsenetOptions {
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("post_processing", self.post_processing.to_string()),
            ("as_queued", self.as_queued.to_string()),
        ]
    }
}

fn list_endpoint(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Torrent => "/torrents/mylist",
        JobKind::Usenet => "/usenet/mylist",
    }
}

fn download_endpoint(kind: JobKind) -> (&'static str, &'static str) {
    match kind {
        JobKind::Torrent => ("/torrents/requestdl", "torrent_id"),
        JobKind::Usenet => ("/usenet/requestdl", "usenet_id"),
    }
}

#[derive(Clone)]
pub struct TorBoxClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    retry: RetryPolicy,
}

impl TorBoxClient {
    pub fn new(settings: &Settings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self::with_client(
            http,
            settings.api_base_url(),
            settings.torbox_api_key.clone(),
            RetryPolicy::new(settings.max_retries),
        ))
    }

    pub fn with_client(
        http: reqwest::Client,
        api_base: String,
        api_key: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            api_base,
            api_key,
            retry,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub async fn create_torrent(
        &self,
        file_name: &str,
        path: &Path,
        options: &TorrentOptions,
    ) -> Result<ApiResponse, ClientError> {
        let contents = read_upload(path).await?;
        let url = format!("{}/torrents/createtorrent", self.api_base);
        self.execute(&url, || {
            let form = upload_form(
                options.fields(),
                file_name,
                contents.clone(),
                "application/x-bittorrent",
            )?;
            Ok(self.http.post(&url).multipart(form))
        })
        .await
    }

    pub async fn create_torrent_from_magnet(
        &self,
        options: &TorrentOptions,
    ) -> Result<ApiResponse, ClientError> {
        let url = format!("{}/torrents/createtorrent", self.api_base);
        let fields = options.fields();
        self.execute(&url, || Ok(self.http.post(&url).form(&fields)))
            .await
    }

    pub async fn create_usenet_download(
        &self,
        file_name: &str,
        path: &Path,
        options: &UsenetOptions,
    ) -> Result<ApiResponse, ClientError> {
        let contents = read_upload(path).await?;
        let url = format!("{}/usenet/createusenetdownload", self.api_base);
        self.execute(&url, || {
            let form = upload_form(
                options.fields(),
                file_name,
                contents.clone(),
                "application/x-nzb",
            )?;
            Ok(self.http.post(&url).multipart(form))
        })
        .await
    }

    pub async fn list(&self, kind: JobKind, id: &str) -> Result<ApiResponse, ClientError> {
        let url = format!("{}{}", self.api_base, list_endpoint(kind));
        self.execute(&url, || Ok(self.http.get(&url).query(&[("id", id)])))
            .await
    }

    pub async fn request_download_link(
        &self,
        kind: JobKind,
        id: &str,
    ) -> Result<ApiResponse, ClientError> {
        let (endpoint, id_param) = download_endpoint(kind);
        let url = format!("{}{}", self.api_base, endpoint);
        self.execute(&url, || {
            Ok(self.http.get(&url).query(&[
                (id_param, id),
                ("zip_link", "true"),
                ("token", self.api_key.as_str()),
            ]))
        })
        .await
    }

    /// Sends the request built by `build`, rebuilding it for every attempt.
    async fn execute<F>(&self, url: &str, build: F) -> Result<ApiResponse, ClientError>
    where
        F: Fn() -> reqwest::Result<RequestBuilder>,
    {
        let build = &build;
        let transport = |source: reqwest::Error| ClientError::Transport {
            url: url.to_string(),
            source,
        };
        self.retry
            .run(url, move || async move {
                let response = build()
                    .map_err(transport)?
                    .bearer_auth(&self.api_key)
                    .send()
                    .await
                    .map_err(transport)?;
                let status = response.status();
                let body = response.text().await.map_err(transport)?;
                if !status.is_success() {
                    return Err(ClientError::Status {
                        url: url.to_string(),
                        status,
                        body,
                    });
                }
                debug!("API response from {}: {}", url, body);
                serde_json::from_str(&body).map_err(|source| ClientError::Decode {
                    url: url.to_string(),
                    source,
                })
            })
            .await
    }
}

async fn read_upload(path: &Path) -> Result<Vec<u8>, ClientError> {
    tokio::fs::read(path).await.map_err(|source| ClientError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn upload_form(
    fields: Vec<(&'static str, String)>,
    file_name: &str,
    contents: Vec<u8>,
    mime: &'static str,
) -> reqwest::Result<Form> {
    let part = Part::bytes(contents)
        .file_name(file_name.to_string())
        .mime_str(mime)?;
    Ok(fields
        .into_iter()
        .fold(Form::new(), |form, (key, value)| form.text(key, value))
        .part("file", part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_client(server: &MockServer, max_retries: u32) -> TorBoxClient {
        TorBoxClient::with_client(
            reqwest::Client::new(),
            server.url("/v1/api"),
            "key".to_string(),
            RetryPolicy {
                max_retries,
                delay: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_retry_attempts_max_retries_plus_one() {
        for max_retries in 0..4 {
            let policy = RetryPolicy {
                max_retries,
                delay: Duration::from_millis(1),
            };
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let result: Result<(), ClientError> = policy
                .run("always-fails", || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(ClientError::Io {
                            path: "x".into(),
                            source: std::io::Error::other("boom"),
                        })
                    }
                })
                .await;
            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
        }
    }

    #[tokio::test]
    async fn test_retry_stops_on_success() {
        let policy = RetryPolicy {
            max_retries: 5,
            delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = policy
            .run("flaky", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ClientError::Io {
                        path: "x".into(),
                        source: std::io::Error::other("flaky"),
                    })
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_default_policy_uses_fixed_delay() {
        let policy = RetryPolicy::new(2);
        assert_eq!(policy.attempts(), 3);
        assert_eq!(policy.delay, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_list_sends_bearer_and_id() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/api/usenet/mylist")
                .query_param("id", "7")
                .header("authorization", "Bearer key");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "success": true, "data": { "id": 7, "download_present": true } }));
        });

        let client = test_client(&server, 0);
        let resp = client.list(JobKind::Usenet, "7").await.unwrap();
        mock.assert();
        assert!(resp.find_job(Some("7"), None).unwrap().status().output_ready);
    }

    #[tokio::test]
    async fn test_request_download_link_params() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/api/torrents/requestdl")
                .query_param("torrent_id", "42")
                .query_param("zip_link", "true")
                .query_param("token", "key");
            then.status(200)
                .json_body(json!({ "success": true, "data": "https://cdn.example/42.zip" }));
        });

        let client = test_client(&server, 0);
        let resp = client
            .request_download_link(JobKind::Torrent, "42")
            .await
            .unwrap();
        mock.assert();
        assert_eq!(resp.download_link(), Some("https://cdn.example/42.zip"));
    }

    #[tokio::test]
    async fn test_non_success_status_surfaces_after_retries() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/v1/api/torrents/mylist");
            then.status(500).body("upstream down");
        });

        let client = test_client(&server, 0);
        let err = client.list(JobKind::Torrent, "1").await.unwrap_err();
        mock.assert();
        match err {
            ClientError::Status { status, body, .. } => {
                assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "upstream down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_create_torrent_uploads_file() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/api/torrents/createtorrent")
                .header("authorization", "Bearer key");
            then.status(200)
                .json_body(json!({ "success": true, "data": { "torrent_id": 11, "hash": "h" } }));
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linux.torrent");
        std::fs::write(&path, b"d8:announce0:e").unwrap();

        let options = TorrentOptions {
            seed: 1,
            allow_zip: true,
            name: "linux".to_string(),
            as_queued: false,
            magnet: None,
        };
        let client = test_client(&server, 0);
        let resp = client
            .create_torrent("linux.torrent", &path, &options)
            .await
            .unwrap();
        mock.assert();
        assert_eq!(resp.submitted(JobKind::Torrent).unwrap().identifier, "11");
    }

    #[tokio::test]
    async fn test_missing_upload_file_is_not_retried() {
        let server = MockServer::start_async().await;
        let client = test_client(&server, 3);
        let options = UsenetOptions {
            name: "gone".to_string(),
            post_processing: -1,
            as_queued: false,
        };
        let err = client
            .create_usenet_download("gone.nzb", Path::new("/nonexistent/gone.nzb"), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io { .. }));
    }

    #[test]
    fn test_torrent_fields_include_magnet() {
        let options = TorrentOptions {
            seed: 2,
            allow_zip: false,
            name: "movie".to_string(),
            as_queued: true,
            magnet: Some("magnet:?xt=urn:btih:abc".to_string()),
        };
        let fields = options.fields();
        assert!(fields.contains(&("seed", "2".to_string())));
        assert!(fields.contains(&("allow_zip", "false".to_string())));
        assert!(fields.contains(&("as_queued", "true".to_string())));
        assert!(fields.contains(&("magnet", "magnet:?xt=urn:btih:abc".to_string())));
    }
}
