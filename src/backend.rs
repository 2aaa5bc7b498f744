use anyhow::Context;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Url};
use serde::{Deserialize, Serialize};

use crate::error::RequestFailure;
use crate::upload::ProgressSink;

#[cfg(test)]
use mockall::automock;

/// Size of each body chunk handed to the transport during an upload.
pub const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Body of a successful `POST /api/upload`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UploadResponse {
    pub log_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub summary: Option<FlightSummary>,
}

/// Aggregates the backend derived from the log. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FlightSummary {
    #[serde(default)]
    pub max_altitude: Option<f64>,
    #[serde(default, rename = "flight_time")]
    pub flight_time_seconds: Option<f64>,
    #[serde(default)]
    pub message_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
}

/// One outgoing conversational turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub log_id: String,
    pub message: String,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatReply {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub response: String,
}

/// The remote log analysis service.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Upload one log file. Cumulative bytes handed to the transport are
    /// reported to `progress` as the body is sent.
    async fn upload(
        &self,
        file_name: &str,
        contents: Vec<u8>,
        progress: ProgressSink,
    ) -> Result<UploadResponse, RequestFailure>;

    async fn chat(&self, turn: &ChatTurn) -> Result<ChatReply, RequestFailure>;

    /// Drop the server-side history of a conversation.
    async fn clear_chat(&self, log_id: &str, conversation_id: &str)
        -> Result<(), RequestFailure>;
}

/// `AnalysisBackend` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    /// No request timeout is set; the transport defaults apply.
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid backend URL: {}", base_url))?;
        anyhow::ensure!(
            !base_url.cannot_be_a_base(),
            "Backend URL {} cannot be used as a base",
            base_url
        );

        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RequestFailure> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RequestFailure::NoResponse(format!("bad base URL {}", self.base_url)))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn upload(
        &self,
        file_name: &str,
        contents: Vec<u8>,
        progress: ProgressSink,
    ) -> Result<UploadResponse, RequestFailure> {
        let url = self.endpoint(&["upload"])?;
        let total = contents.len() as u64;

        let body = body_chunks(contents, progress);
        let part = Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(file_name.to_string());
        let form = Form::new().part("file", part);

        debug!("POST {} ({} bytes)", url, total);
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RequestFailure::NoResponse(e.to_string()))?;

        read_json(response).await
    }

    async fn chat(&self, turn: &ChatTurn) -> Result<ChatReply, RequestFailure> {
        let url = self.endpoint(&["chat", &turn.log_id])?;

        let mut request = self.client.post(url.clone()).json(&ChatRequest {
            message: &turn.message,
        });
        if let Some(ref conversation_id) = turn.conversation_id {
            request = request.query(&[("conversation_id", conversation_id)]);
        }

        debug!(
            "POST {} (conversation {})",
            url,
            turn.conversation_id.as_deref().unwrap_or("<new>")
        );
        let response = request
            .send()
            .await
            .map_err(|e| RequestFailure::NoResponse(e.to_string()))?;

        read_json(response).await
    }

    async fn clear_chat(
        &self,
        log_id: &str,
        conversation_id: &str,
    ) -> Result<(), RequestFailure> {
        let url = self.endpoint(&["chat", log_id])?;

        debug!("DELETE {} (conversation {})", url, conversation_id);
        let response = self
            .client
            .delete(url)
            .query(&[("conversation_id", conversation_id)])
            .send()
            .await
            .map_err(|e| RequestFailure::NoResponse(e.to_string()))?;

        check_status(response).await.map(|_| ())
    }
}

/// Slices `contents` into upload chunks as the transport pulls them,
/// reporting the cumulative byte count after each one.
fn body_chunks(
    contents: Vec<u8>,
    progress: ProgressSink,
) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + Sync + 'static {
    let total = contents.len();
    futures::stream::iter((0..total).step_by(UPLOAD_CHUNK_BYTES)).map(move |offset| {
        let end = (offset + UPLOAD_CHUNK_BYTES).min(total);
        progress.report(end as u64, total as u64);
        Ok(contents[offset..end].to_vec())
    })
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RequestFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(RequestFailure::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RequestFailure> {
    let response = check_status(response).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| RequestFailure::Decode(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| RequestFailure::Decode(e.to_string()))
}
