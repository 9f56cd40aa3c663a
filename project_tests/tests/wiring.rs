//! # Configuration to running components
//!
//! Builds the bus and the service from a JSON file the way a binary does and
//! drives the manual offline override through an asynchronously dispatched bus.

mod common;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use common::{ChannelSubscriber, MockServer};
use lib_netaccess::{
    load_config, DispatchMode, EventBus, EventKind, EventPayload, NetError, NetworkService,
    UnavailableReason,
};

#[tokio::test]
async fn test_file_config_drives_bus_and_service() {
    let probe = MockServer::start(vec![(200, "ok")]).await;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let json = serde_json::json!({
        "events": { "dispatch": "async" },
        "network": {
            "maxRetryAttempts": 0,
            "retryIntervalMs": 10,
            "connCheckUrls": [probe.url("/health")],
            "failuresBeforeOffline": 2,
            "proxy": { "useProxy": false }
        }
    });
    write!(file, "{}", json).unwrap();

    let config = load_config(Some(file.path())).unwrap();
    assert_eq!(config.events.dispatch, DispatchMode::Async);

    let bus = Arc::new(EventBus::from_config(&config.events));
    let svc = NetworkService::new(config.network, Arc::clone(&bus)).unwrap();
    let (events, mut rx) = ChannelSubscriber::new();
    bus.add_subscriber(events, &[EventKind::NetworkStatusChange]).unwrap();

    svc.set_offline().await;
    let err = svc.get(&probe.url("/quote"), &[]).await.unwrap_err();
    assert!(matches!(err, NetError::Unavailable(UnavailableReason::ManualOffline)));
    assert_eq!(probe.hits(), 0);

    assert!(svc.set_online().await);
    assert_eq!(probe.hits(), 1);

    let mut flags = Vec::new();
    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        flags.push(event.payload().clone());
    }
    assert_eq!(flags, vec![EventPayload::Flag(false), EventPayload::Flag(true)]);

    bus.shutdown().await;
    assert_eq!(bus.subscriber_count(EventKind::NetworkStatusChange), 0);
}
