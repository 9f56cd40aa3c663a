//! # Network Access Service
//!
//! Performs GET/POST requests with built-in resilience and keeps the
//! process's belief about network availability.
//!
//! ## Workflow of one call:
//! 1.  **Fast-fail gate**: if manually offline, or the heuristic says the
//!     network is down, fail with `NetError::Unavailable` without any I/O.
//! 2.  **Retry loop**: attempt the request. Unrecoverable failures end the
//!     loop at once. Recoverable failures are retried after
//!     `retry_interval_ms` until `max_retry_attempts` retries are used up,
//!     i.e. at most `max_retry_attempts + 1` attempts.
//! 3.  **Signature scan**: a successful body containing a known error page is
//!     a failure (`UnavailableReason::ProxyInjected`).
//! 4.  **Bookkeeping**: the final outcome feeds the heuristic and is published
//!     as `NETWORK_COMMUNICATION_STATUS`; a heuristic flip publishes
//!     `NETWORK_STATUS_CHANGE`; a successful transfer publishes
//!     `NETWORK_BYTES_DOWNLOADED`.
//!
//! The whole loop can be bounded by a per-call deadline or cancellation token
//! ([`RequestOptions`]).

use bytes::Bytes;
use std::future::pending;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{NetError, TransportError, UnavailableReason};
use super::heuristic::ConnectivityHeuristic;
use super::proxy::{ProxyReloader, SharedProxySettings};
use super::transport::{HttpMethod, OutboundRequest, Transport, TransportResponse};
use crate::configs::config_net::NetworkConfig;
use crate::events::{BusError, EventBus, EventKind, Subscriber};

/// Per-call limits on top of the configured retry budget.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Upper bound on the whole call, retries and sleeps included.
    pub deadline: Option<Duration>,
    /// Aborts the call when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    /// Options bounded by `deadline`.
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    /// Options aborted by `cancel`.
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel: Some(cancel),
        }
    }
}

/// Shared mutable connectivity state, guarded by one mutex.
#[derive(Debug)]
struct ConnectivityState {
    heuristic: ConnectivityHeuristic,
    manual_offline: bool,
    /// Availability from the last probe; authoritative only while the heuristic is disabled.
    probe_available: bool,
    last_check_at: Option<Instant>,
}

impl ConnectivityState {
    fn is_online(&self) -> bool {
        if self.manual_offline {
            return false;
        }
        if self.heuristic.is_enabled() {
            self.heuristic.available()
        } else {
            self.probe_available
        }
    }
}

/// # Network Service
///
/// Share it as `Arc<NetworkService>`; every method takes `&self`.
pub struct NetworkService {
    config: NetworkConfig,
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    proxy: SharedProxySettings,
    reloader: Arc<dyn Subscriber>,
    state: Mutex<ConnectivityState>,
    bytes_total: AtomicU64,
    /// Bumped on every published `NETWORK_STATUS_CHANGE`.
    status_changes: AtomicU64,
    headers: Vec<(String, String)>,
}

impl NetworkService {
    /// Creates the service over a pooled reqwest client.
    ///
    /// # Errors
    /// `NetError::Client` if the HTTP client cannot be built.
    #[cfg(feature = "retrieve")]
    pub fn new(config: NetworkConfig, bus: Arc<EventBus>) -> Result<Self, NetError> {
        let proxy = config.proxy.clone().shared();
        let transport = crate::retrieve::ky_http::HttpTransport::new(&config, Arc::clone(&proxy))?;
        Ok(Self::with_transport(config, Arc::new(transport), bus, proxy))
    }

    /// Creates the service over any transport. `proxy` should be the handle the
    /// transport reads, so that preference reloads reach it.
    pub fn with_transport(
        config: NetworkConfig,
        transport: Arc<dyn Transport>,
        bus: Arc<EventBus>,
        proxy: SharedProxySettings,
    ) -> Self {
        let heuristic = ConnectivityHeuristic::new(config.failures_before_offline);
        let headers = default_headers(config.user_agent.as_deref());
        let reloader: Arc<dyn Subscriber> = Arc::new(ProxyReloader::new(Arc::clone(&proxy)));
        Self {
            transport,
            bus,
            proxy,
            reloader,
            state: Mutex::new(ConnectivityState {
                heuristic,
                manual_offline: false,
                probe_available: true,
                last_check_at: None,
            }),
            bytes_total: AtomicU64::new(0),
            status_changes: AtomicU64::new(0),
            headers,
            config,
        }
    }

    /// Subscribes the service's proxy reloader to `PREFERENCES_CHANGED`.
    pub fn attach(&self) -> Result<(), BusError> {
        self.bus
            .add_subscriber(Arc::clone(&self.reloader), &[EventKind::PreferencesChanged])?;
        Ok(())
    }

    /// Removes the proxy reloader from the bus.
    pub fn detach(&self) {
        self.bus.remove_subscriber(&self.reloader, &[]);
    }

    /// The live proxy settings handle.
    pub fn proxy_settings(&self) -> SharedProxySettings {
        Arc::clone(&self.proxy)
    }

    /// The configuration the service was built with.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectivityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// GET with `params` as the query string; returns the raw body.
    pub async fn get(&self, url: &str, params: &[(&str, &str)]) -> Result<Bytes, NetError> {
        let request = OutboundRequest::new(HttpMethod::Get, url).with_params(params);
        self.execute(request, &RequestOptions::default()).await
    }

    /// POST with `params` as a form body; returns the raw body.
    pub async fn post(&self, url: &str, params: &[(&str, &str)]) -> Result<Bytes, NetError> {
        let request = OutboundRequest::new(HttpMethod::Post, url).with_params(params);
        self.execute(request, &RequestOptions::default()).await
    }

    /// [`get`](Self::get), decoded as UTF-8 (invalid sequences replaced).
    pub async fn get_text(&self, url: &str, params: &[(&str, &str)]) -> Result<String, NetError> {
        self.get(url, params)
            .await
            .map(|body| String::from_utf8_lossy(&body).into_owned())
    }

    /// [`post`](Self::post), decoded as UTF-8 (invalid sequences replaced).
    pub async fn post_text(&self, url: &str, params: &[(&str, &str)]) -> Result<String, NetError> {
        self.post(url, params)
            .await
            .map(|body| String::from_utf8_lossy(&body).into_owned())
    }

    /// Runs `request` through the gate, the retry loop and the bookkeeping.
    ///
    /// The configured headers are appended to the request's own.
    pub async fn execute(
        &self,
        mut request: OutboundRequest,
        options: &RequestOptions,
    ) -> Result<Bytes, NetError> {
        self.ensure_available()?;
        request.headers.extend_from_slice(&self.headers);

        let url = request.url.clone();
        let cancel = options.cancel.clone().unwrap_or_default();
        // A deadline too far out to represent is no deadline.
        let deadline = options.deadline.and_then(|d| Instant::now().checked_add(d));

        let result = tokio::select! {
            result = self.execute_with_retry(&request) => result,
            _ = cancel.cancelled() => {
                debug!(url = %url, "Request cancelled by caller");
                return Err(NetError::Cancelled { url });
            }
            _ = wait_until(deadline) => {
                warn!(url = %url, "Request exceeded its deadline");
                return Err(NetError::DeadlineExceeded { url });
            }
        };

        match result {
            Ok(response) => {
                if let Some(signature) = self.find_error_signature(&response.body) {
                    warn!(url = %url, signature = %signature, "Response matched a known error page");
                    self.record_outcome(false).await;
                    return Err(UnavailableReason::ProxyInjected { signature }.into());
                }
                self.record_outcome(true).await;
                self.record_transfer(response.body.len() as u64).await;
                Ok(response.body)
            }
            Err(e) => {
                self.record_outcome(false).await;
                if let NetError::ConnectionFailure { attempts, .. } = &e {
                    let message = format!("Unable to reach {} after {} attempts", url, attempts);
                    self.bus.publish(EventKind::StatusMessage, message).await;
                }
                Err(e)
            }
        }
    }

    fn ensure_available(&self) -> Result<(), NetError> {
        let state = self.lock_state();
        if state.manual_offline {
            return Err(UnavailableReason::ManualOffline.into());
        }
        if !state.is_online() {
            return Err(UnavailableReason::HeuristicOffline.into());
        }
        Ok(())
    }

    async fn execute_with_retry(&self, request: &OutboundRequest) -> Result<TransportResponse, NetError> {
        let max_retries = self.config.max_retry_attempts;
        let mut retries: u32 = 0;

        loop {
            match self.attempt(request).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_recoverable() => {
                    warn!(url = %request.url, error = %e, "Unrecoverable request failure");
                    return Err(NetError::UnrecoverableProtocol {
                        url: request.url.clone(),
                        source: e,
                    });
                }
                Err(e) if retries < max_retries => {
                    retries += 1;
                    warn!(
                        url = %request.url,
                        error = %e,
                        retry = retries,
                        max_retries,
                        "Recoverable request failure, retrying in {} ms",
                        self.config.retry_interval_ms
                    );
                    sleep(self.config.retry_interval()).await;
                }
                Err(e) => {
                    error!(
                        url = %request.url,
                        error = %e,
                        attempts = retries + 1,
                        "Request failed, retries exhausted"
                    );
                    return Err(NetError::ConnectionFailure {
                        url: request.url.clone(),
                        attempts: retries + 1,
                        source: e,
                    });
                }
            }
        }
    }

    /// One transport call with non-success statuses folded into errors.
    async fn attempt(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let response = self.transport.execute(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(TransportError::from_status(response.status))
        }
    }

    fn find_error_signature(&self, body: &[u8]) -> Option<String> {
        if self.config.known_error_signatures.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(body);
        self.config
            .known_error_signatures
            .iter()
            .find(|sig| !sig.is_empty() && text.contains(sig.as_str()))
            .cloned()
    }

    /// Feeds the heuristic and publishes the resulting events.
    async fn record_outcome(&self, success: bool) {
        let transition = self.lock_state().heuristic.record(success);
        self.bus
            .publish(EventKind::NetworkCommunicationStatus, success)
            .await;
        if let Some(online) = transition {
            info!(online, "Network availability changed");
            self.publish_status(online).await;
        }
    }

    async fn publish_status(&self, online: bool) {
        self.status_changes.fetch_add(1, Ordering::AcqRel);
        self.bus.publish(EventKind::NetworkStatusChange, online).await;
    }

    async fn record_transfer(&self, bytes: u64) {
        let total = self.bytes_total.fetch_add(bytes, Ordering::Relaxed) + bytes;
        debug!(bytes, total, "Transfer complete");
        self.bus.publish(EventKind::NetworkBytesDownloaded, bytes).await;
    }

    /// Last computed availability. Never probes.
    pub fn is_online(&self) -> bool {
        self.lock_state().is_online()
    }

    /// Total bytes received by successful calls.
    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_total.load(Ordering::Relaxed)
    }

    /// Re-evaluates availability, probing the configured check URLs when due.
    ///
    /// A probe runs when `force` is set or the check interval has elapsed; it
    /// stops at the first reachable URL. Each probe feeds the heuristic like a
    /// regular call. While the heuristic is enabled its flag is the answer,
    /// even right after a probe; while it is disabled the probe result is.
    ///
    /// Always `false` while manually offline, without probing.
    pub async fn check_network_status(&self, force: bool) -> bool {
        let due = {
            let mut state = self.lock_state();
            if state.manual_offline {
                return false;
            }
            let due = force
                || state
                    .last_check_at
                    .map_or(true, |at| at.elapsed() >= self.config.conn_check_interval());
            if due {
                state.last_check_at = Some(Instant::now());
            }
            due
        };

        if due && !self.config.conn_check_urls.is_empty() {
            let mut reachable = false;
            for url in &self.config.conn_check_urls {
                if self.probe(url).await {
                    reachable = true;
                    break;
                }
            }
            debug!(reachable, "Connectivity probe finished");

            let transition = {
                let mut state = self.lock_state();
                if state.heuristic.is_enabled() || state.probe_available == reachable {
                    None
                } else {
                    state.probe_available = reachable;
                    Some(reachable)
                }
            };
            if let Some(online) = transition {
                info!(online, "Network availability changed");
                self.publish_status(online).await;
            }
        }

        self.is_online()
    }

    /// One attempt against a check URL; bypasses the gate and the retry loop.
    async fn probe(&self, url: &str) -> bool {
        let request = OutboundRequest::new(HttpMethod::Get, url).with_headers(&self.headers);
        let success = match self.attempt(&request).await {
            Ok(response) => self.find_error_signature(&response.body).is_none(),
            Err(e) => {
                debug!(url, error = %e, "Connectivity probe failed");
                false
            }
        };
        self.record_outcome(success).await;
        success
    }

    /// Forces the service offline until [`set_online`](Self::set_online).
    pub async fn set_offline(&self) {
        self.lock_state().manual_offline = true;
        info!("Network manually set offline");
        self.publish_status(false).await;
    }

    /// Clears the manual override, probes, and publishes the resulting status.
    ///
    /// If the probe itself flipped availability, that transition is the only
    /// status event published.
    pub async fn set_online(&self) -> bool {
        self.lock_state().manual_offline = false;
        let published_before = self.status_changes.load(Ordering::Acquire);
        let online = self.check_network_status(true).await;
        info!(online, "Manual offline cleared");
        if self.status_changes.load(Ordering::Acquire) == published_before {
            self.publish_status(online).await;
        }
        online
    }
}

fn default_headers(user_agent: Option<&str>) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = [
        ("cache-control", "no-cache"),
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        ("accept-encoding", "gzip, deflate"),
        ("accept-language", "en-US,en;q=0.9"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    if let Some(ua) = user_agent.filter(|ua| !ua.is_empty()) {
        headers.push(("user-agent".to_string(), ua.to_string()));
    }
    headers
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending::<()>().await,
    }
}
