use std::pin::Pin;

use futures::StreamExt as _;
use reqwest::header::RETRY_AFTER;
use tracing::debug;

use crate::config::FlowClientConfig;
use crate::errors::FlowError;

/// Response body as a stream of raw chunks.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, FlowError>> + Send + 'static>>;

/// Status, rate-limit hint, and unread body of one HTTP response.
pub struct HttpReply {
    pub status: u16,
    /// Raw `Retry-After` header value, if present.
    pub retry_after: Option<String>,
    pub body: ByteStream,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Reads the remaining body as (lossy) UTF-8 text.
    pub async fn text(mut self) -> Result<String, FlowError> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// HTTP operations the flow client needs. One physical request per call; no
/// retries happen at this level.
#[async_trait::async_trait]
pub trait FlowTransport: Send + Sync {
    /// POSTs a run payload and returns as soon as the response head arrives.
    async fn post_run(&self, payload: &serde_json::Value) -> Result<HttpReply, FlowError>;

    /// POSTs a single-file multipart upload.
    async fn post_upload(&self, filename: &str, bytes: Vec<u8>) -> Result<HttpReply, FlowError>;
}

/// `FlowTransport` over a pooled `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: FlowClientConfig,
}

impl ReqwestTransport {
    pub fn new(config: FlowClientConfig) -> Result<Self, FlowError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .build()
            .map_err(|e| FlowError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key.as_deref() {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }
}

fn into_reply(response: reqwest::Response) -> HttpReply {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);
    let body = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| FlowError::transport(format!("response read failed: {e}"))));
    HttpReply {
        status,
        retry_after,
        body: Box::pin(body),
    }
}

#[async_trait::async_trait]
impl FlowTransport for ReqwestTransport {
    async fn post_run(&self, payload: &serde_json::Value) -> Result<HttpReply, FlowError> {
        let url = self.config.run_url();
        debug!(event = "http.run_request", url = %url);
        let response = self
            .authorize(self.client.post(&url).json(payload))
            .send()
            .await?;
        Ok(into_reply(response))
    }

    async fn post_upload(&self, filename: &str, bytes: Vec<u8>) -> Result<HttpReply, FlowError> {
        let url = self.config.upload_url();
        debug!(event = "http.upload_request", url = %url, filename, bytes = bytes.len() as u64);
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .authorize(self.client.post(&url).multipart(form))
            .timeout(self.config.upload_timeout)
            .send()
            .await?;
        Ok(into_reply(response))
    }
}
