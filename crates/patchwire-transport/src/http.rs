//! HTTP transport speaking the multipart incremental delivery protocol.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, TryStreamExt};
use patchwire_frame::{
    decode_stream_with_config, parse_content_type, DecoderConfig, ResponseKind, ACCEPT_INCREMENTAL,
};
use patchwire_payload::{ExecutionResult, GraphQLError};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::request::OperationRequest;
use crate::response::{payloads_from_parts, Transport, TransportResponse};
use crate::server::ErrorBody;

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Endpoint that accepts `POST`ed operations.
    pub url: String,
    /// Time allowed until response headers arrive. Streaming bodies are not
    /// bounded by it. Default: none.
    pub timeout: Option<Duration>,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Limits applied when decoding multipart bodies.
    pub decoder: DecoderConfig,
}

impl HttpTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: None,
            headers: Vec::new(),
            decoder: DecoderConfig::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Sends operations as JSON `POST` requests and reads either a single JSON
/// result or a `multipart/mixed` stream of payloads.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: Arc<HttpTransportConfig>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, config))
    }

    /// Use an existing client, sharing its connection pool.
    pub fn with_client(client: reqwest::Client, config: HttpTransportConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: OperationRequest) -> BoxFuture<'static, Result<TransportResponse>> {
        let client = self.client.clone();
        let config = Arc::clone(&self.config);
        async move { send(client, &config, request).await }.boxed()
    }
}

async fn send(
    client: reqwest::Client,
    config: &HttpTransportConfig,
    request: OperationRequest,
) -> Result<TransportResponse> {
    let mut builder = client
        .post(&config.url)
        .header(ACCEPT, ACCEPT_INCREMENTAL)
        .json(&request);
    for (name, value) in &config.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    debug!(url = %config.url, "sending operation");
    let response = match config.timeout {
        Some(limit) => tokio::time::timeout(limit, builder.send())
            .await
            .map_err(|_| TransportError::Timeout(limit))??,
        None => builder.send().await?,
    };

    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if !status.is_success() {
        let body = response.bytes().await?;
        let errors = serde_json::from_slice::<ErrorBody>(&body)
            .map(|body| body.errors)
            .unwrap_or_else(|_| vec![GraphQLError::new(String::from_utf8_lossy(&body))]);
        warn!(status = status.as_u16(), "operation rejected");
        return Err(TransportError::Rejected {
            status: status.as_u16(),
            errors,
        });
    }

    match parse_content_type(&content_type) {
        ResponseKind::Multipart { boundary } => {
            debug!(%boundary, "reading incremental response");
            let chunks = response.bytes_stream().map_err(io::Error::other);
            let parts = decode_stream_with_config(chunks, &boundary, config.decoder.clone())?;
            Ok(TransportResponse::Incremental(payloads_from_parts(parts)))
        }
        ResponseKind::Json => {
            let body = response.bytes().await?;
            let result: ExecutionResult = serde_json::from_slice(&body)?;
            Ok(TransportResponse::Single(result))
        }
        ResponseKind::Other(media_type) => Err(TransportError::UnsupportedContentType(media_type)),
    }
}
