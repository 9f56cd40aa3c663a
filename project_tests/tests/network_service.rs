//! # NetworkService over the real HTTP transport
//!
//! Runs the service against local mock servers: retries on transient
//! statuses, the offline heuristic, probes, error signatures, and proxy
//! reloads delivered over the event bus.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::{closed_port_url, ChannelSubscriber, MockServer};
use lib_netaccess::{
    DispatchMode, EventBus, EventKind, EventPayload, NetError, NetworkConfig, NetworkService,
    TransportError, UnavailableReason,
};

fn config(max_retries: u32, window: i32) -> NetworkConfig {
    NetworkConfig {
        max_retry_attempts: max_retries,
        retry_interval_ms: 10,
        failures_before_offline: window,
        connect_timeout_ms: 2_000,
        request_timeout_ms: 5_000,
        conn_check_urls: Vec::new(),
        ..NetworkConfig::default()
    }
}

fn service(config: NetworkConfig, mode: DispatchMode) -> (NetworkService, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new(mode));
    let svc = NetworkService::new(config, Arc::clone(&bus)).unwrap();
    (svc, bus)
}

#[tokio::test]
async fn test_retries_transient_statuses_until_success() {
    let server = MockServer::start(vec![(503, ""), (502, ""), (200, "AAPL,189.20")]).await;
    let (svc, _bus) = service(config(3, 3), DispatchMode::Sync);

    let body = svc.get_text(&server.url("/quote"), &[("s", "AAPL")]).await.unwrap();

    assert_eq!(body, "AAPL,189.20");
    assert_eq!(server.hits(), 3);
    assert_eq!(svc.bytes_downloaded(), 11);
    assert!(server.requests()[0].starts_with("GET /quote?s=AAPL HTTP/1.1"));
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start(vec![(404, "missing")]).await;
    let (svc, _bus) = service(config(3, 3), DispatchMode::Sync);

    let err = svc.get(&server.url("/nope"), &[]).await.unwrap_err();

    assert_eq!(server.hits(), 1);
    assert!(matches!(
        err,
        NetError::UnrecoverableProtocol {
            source: TransportError::HttpStatus(404),
            ..
        }
    ));
}

#[tokio::test]
async fn test_post_sends_form_body() {
    let server = MockServer::start(vec![(200, "saved")]).await;
    let (svc, _bus) = service(config(0, 3), DispatchMode::Sync);

    let body = svc
        .post_text(&server.url("/trades"), &[("symbol", "MSFT"), ("qty", "10")])
        .await
        .unwrap();

    assert_eq!(body, "saved");
    let head = server.requests()[0].to_ascii_lowercase();
    assert!(head.starts_with("post /trades http/1.1"));
    assert!(head.contains("content-type: application/x-www-form-urlencoded"));
}

#[tokio::test]
async fn test_refused_connections_take_the_service_offline_until_a_probe_succeeds() {
    let dead = closed_port_url().await;
    let probe = MockServer::start(vec![(200, "pong")]).await;
    let mut cfg = config(1, 2);
    cfg.conn_check_urls = vec![closed_port_url().await, probe.url("/ping")];
    let (svc, bus) = service(cfg, DispatchMode::Sync);
    let (events, mut rx) = ChannelSubscriber::new();
    bus.add_subscriber(events, &[EventKind::NetworkStatusChange]).unwrap();

    for _ in 0..2 {
        let err = svc.get(&dead, &[]).await.unwrap_err();
        assert!(matches!(err, NetError::ConnectionFailure { attempts: 2, .. }));
    }
    assert!(!svc.is_online());
    assert_eq!(rx.recv().await.unwrap().payload(), &EventPayload::Flag(false));

    let err = svc.get(&probe.url("/ping"), &[]).await.unwrap_err();
    assert!(matches!(err, NetError::Unavailable(UnavailableReason::HeuristicOffline)));
    assert_eq!(probe.hits(), 0);

    assert!(svc.check_network_status(true).await);
    assert_eq!(probe.hits(), 1);
    assert_eq!(rx.recv().await.unwrap().payload(), &EventPayload::Flag(true));
}

#[tokio::test]
async fn test_injected_error_page_is_rejected() {
    let server = MockServer::start(vec![(200, "<h1>Web Filter: access blocked</h1>")]).await;
    let mut cfg = config(3, 3);
    cfg.known_error_signatures = vec!["Web Filter".to_string()];
    let (svc, _bus) = service(cfg, DispatchMode::Sync);

    let err = svc.get(&server.url("/quote"), &[]).await.unwrap_err();

    assert!(err.is_unavailable());
    assert_eq!(server.hits(), 1);
    assert_eq!(svc.bytes_downloaded(), 0);
}

#[tokio::test]
async fn test_proxy_preferences_reroute_the_next_request() {
    let proxy = MockServer::start(vec![(200, "via proxy")]).await;
    let (svc, bus) = service(config(0, 3), DispatchMode::Sync);
    svc.attach().unwrap();

    let prefs: BTreeMap<String, String> = [
        ("proxy.useProxy", "true".to_string()),
        ("proxy.host", "127.0.0.1".to_string()),
        ("proxy.port", proxy.addr.port().to_string()),
        ("proxy.useAuth", "true".to_string()),
        ("proxy.user", "trader".to_string()),
        ("proxy.password", "pw".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    bus.publish(EventKind::PreferencesChanged, prefs).await;

    let body = svc.get_text("http://quotes.example.invalid/q", &[]).await.unwrap();

    assert_eq!(body, "via proxy");
    let head = proxy.requests()[0].clone();
    assert!(head.starts_with("GET http://quotes.example.invalid/q HTTP/1.1"));
    // base64("trader:pw")
    assert!(head.contains("dHJhZGVyOnB3"));
}

#[tokio::test]
async fn test_async_bus_delivers_call_events_in_order() {
    let server = MockServer::start(vec![(200, "12345")]).await;
    let (svc, bus) = service(config(0, 3), DispatchMode::Async);
    let (events, mut rx) = ChannelSubscriber::new();
    bus.add_subscriber_for_pattern(events, &["NETWORK_.*"]).unwrap();

    svc.get(&server.url("/"), &[]).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.kind(), EventKind::NetworkCommunicationStatus);
    assert_eq!(first.payload(), &EventPayload::Flag(true));
    assert_eq!(second.kind(), EventKind::NetworkBytesDownloaded);
    assert_eq!(second.payload(), &EventPayload::Bytes(5));

    bus.shutdown().await;
}
