//! HTTP client for a running relay.
//!
//! [`RelayClient::send`] posts a [`ChatRequest`] and feeds the response body
//! through [`consume_stream`]; [`RelayClient::upload`] sends a file to
//! `/api/upload` and returns the server's echo of it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::MAX_UPLOAD_BYTES;
use crate::chat::{ChatRequest, ErrorBody, StreamObserver, StreamOutcome, consume_stream};
use crate::context::{Datasource, DatasourceQuery};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The relay answered with a non-success status before any stream.
    #[error("relay rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("file is {size} bytes; the limit is {max}")]
    TooLarge { size: u64, max: u64 },
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata the relay echoes back for an accepted upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    pub success: bool,
    pub filename: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
}

pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("zams/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Post `request` to `/api/chat` and consume the event stream.
    ///
    /// A status-code rejection is returned as `Err` and the observer is
    /// not called. Once a stream is open, every outcome (including failure)
    /// is reported through `observer` and returned as [`StreamOutcome`].
    pub async fn send<O>(
        &self,
        request: &ChatRequest,
        observer: &mut O,
    ) -> Result<StreamOutcome, ClientError>
    where
        O: StreamObserver + ?Sized,
    {
        debug!(
            "POST /api/chat: {} messages, mode={:?}",
            request.messages.len(),
            request.mode()
        );
        let resp = self
            .http
            .post(self.url("/api/chat"))
            .json(request)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(consume_stream(resp.bytes_stream(), observer).await)
    }

    /// Upload the file at `path` as the multipart field `file`.
    ///
    /// Files over [`MAX_UPLOAD_BYTES`] are refused locally without a request.
    pub async fn upload(&self, path: impl AsRef<Path>) -> Result<UploadReceipt, ClientError> {
        let path = path.as_ref();
        let size = tokio::fs::metadata(path).await?.len();
        if size > MAX_UPLOAD_BYTES {
            return Err(ClientError::TooLarge {
                size,
                max: MAX_UPLOAD_BYTES,
            });
        }
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        self.upload_bytes(&filename, bytes).await
    }

    /// Upload in-memory content under `filename`.
    ///
    /// No local size check; the relay enforces its own ceiling.
    pub async fn upload_bytes(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadReceipt, ClientError> {
        debug!("POST /api/upload: {filename} ({} bytes)", bytes.len());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(content_type_for(filename))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(self.url("/api/upload"))
            .multipart(form)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }

    /// Fetch the datasource table filtered and sorted by `query`.
    pub async fn datasources(
        &self,
        query: &DatasourceQuery,
    ) -> Result<Vec<Datasource>, ClientError> {
        let mut url = reqwest::Url::parse(&self.url("/api/datasources"))
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(search) = &query.search {
                pairs.append_pair("search", search);
            }
            if let Some(kind) = &query.kind {
                pairs.append_pair("type", kind);
            }
            if let Some(status) = &query.status {
                pairs.append_pair("status", status);
            }
            if let Some(sort) = query.sort {
                pairs.append_pair("sort", sort.as_str());
            }
            pairs.append_pair("direction", query.direction.as_str());
        }
        let resp = self.http.get(url).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(ClientError::Rejected {
        status: status.as_u16(),
        message,
    })
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "json" => "application/json",
        "txt" | "md" => "text/plain",
        _ => "application/octet-stream",
    }
}
