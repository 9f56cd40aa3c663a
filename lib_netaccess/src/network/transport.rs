//! # Transport Seam
//!
//! The single operation `NetworkService` needs from an HTTP stack: execute one
//! request, once, and report the raw outcome. Retrying, classification of
//! statuses and availability bookkeeping all stay in the service.

use async_trait::async_trait;
use bytes::Bytes;

use super::error::TransportError;

/// HTTP verb of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Parameters travel in the query string.
    Get,
    /// Parameters travel as a form-encoded body.
    Post,
}

/// One request as the service hands it to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// The verb.
    pub method: HttpMethod,
    /// Absolute target URL.
    pub url: String,
    /// Query (GET) or form (POST) parameters, in order.
    pub params: Vec<(String, String)>,
    /// Request headers, in order.
    pub headers: Vec<(String, String)>,
}

impl OutboundRequest {
    /// A request without parameters or headers.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Appends parameters.
    pub fn with_params(mut self, params: &[(&str, &str)]) -> Self {
        self.params
            .extend(params.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    /// Appends headers.
    pub fn with_headers(mut self, headers: &[(String, String)]) -> Self {
        self.headers.extend_from_slice(headers);
        self
    }
}

/// Status and fully read body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// Numeric HTTP status.
    pub status: u16,
    /// Decoded (decompressed) body.
    pub body: Bytes,
}

impl TransportResponse {
    /// `true` for 2xx and 3xx.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Executes single HTTP requests. Implementations must be safe to share between tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one attempt. Never retries.
    async fn execute(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError>;
}
