//! # HTTP Transport
//!
//! A pooled `reqwest` client that performs single attempts for
//! `NetworkService`. Connect and request timeouts come from
//! [`NetworkConfig`]; gzip and deflate bodies are decoded transparently.
//!
//! The proxy is resolved per request through [`reqwest::Proxy::custom`], which
//! reads the shared [`ProxySettings`](crate::network::ProxySettings) handle. A
//! preference reload therefore reaches the next request without rebuilding
//! the client or dropping its connection pool.

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::sync::{Arc, PoisonError};
use tracing::{debug, trace};

use crate::configs::config_net::NetworkConfig;
use crate::network::{
    HttpMethod, NetError, OutboundRequest, SharedProxySettings, Transport, TransportError,
    TransportResponse,
};

/// `Transport` over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    proxy: SharedProxySettings,
}

impl HttpTransport {
    /// Builds the pooled client.
    ///
    /// # Errors
    /// `NetError::Client` if the TLS backend or the client cannot be initialised.
    pub fn new(config: &NetworkConfig, proxy: SharedProxySettings) -> Result<Self, NetError> {
        let handle = Arc::clone(&proxy);
        let dynamic_proxy = Proxy::custom(move |_url| {
            handle
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .proxy_url()
        });

        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .gzip(true)
            .deflate(true)
            .proxy(dynamic_proxy)
            .build()
            .map_err(|e| NetError::Client(e.to_string()))?;

        Ok(Self { client, proxy })
    }

    /// The proxy handle this transport reads.
    pub fn proxy_settings(&self) -> SharedProxySettings {
        Arc::clone(&self.proxy)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url).query(&request.params),
            HttpMethod::Post => self.client.post(&request.url).form(&request.params),
        };
        for (name, value) in &request.headers {
            // reqwest negotiates and decodes compression itself.
            if name.eq_ignore_ascii_case("accept-encoding") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        trace!(method = ?request.method, url = %request.url, "Sending request");
        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;
        debug!(url = %request.url, status, bytes = body.len(), "Response received");

        Ok(TransportResponse { status, body })
    }
}

/// Maps a reqwest failure onto the transport taxonomy.
fn classify(e: reqwest::Error) -> TransportError {
    let message = e.to_string();
    if e.is_builder() {
        TransportError::Malformed(message)
    } else if e.is_redirect() {
        TransportError::Protocol(message)
    } else if e.is_timeout() {
        TransportError::Timeout(message)
    } else if e.is_connect() {
        TransportError::Connect(message)
    } else if e.is_request() {
        TransportError::NoResponse(message)
    } else {
        TransportError::Io(message)
    }
}
