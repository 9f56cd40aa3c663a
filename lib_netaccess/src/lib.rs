//! # lib_netaccess
//!
//! The resilient network-access layer of the stock tracker together with the
//! in-process event bus it reports through.
//!
//! ## Modules:
//!
//! - **`events`**: Event model, the `EventBus` registry and the asynchronous
//!   `DispatchProxy` delivery wrapper.
//! - **`network`**: The `NetworkService` (retry loop, fast-fail gate, manual
//!   override), its `ConnectivityHeuristic`, proxy settings and error taxonomy.
//! - **`retrieve`**: The reqwest-backed HTTP transport (feature `retrieve`).
//! - **`configs`**: JSON/preferences configuration for the bus and the service.
//! - **`loggers`**: Console + rolling file `tracing` setup (feature `loggers`).

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod configs;
pub mod events;
pub mod network;

#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "loggers")]
pub mod loggers;

// Re-export the types most callers need.
pub use configs::config_net::{load_config, AppConfig, ConfigError, EventsConfig, NetworkConfig};
pub use events::{
    BusError, DispatchMode, DispatchProxy, Event, EventBus, EventKind, EventPayload, Subscriber,
    SubscriberId,
};
pub use network::{
    ConnectivityHeuristic, HttpMethod, NetError, NetworkService, OutboundRequest, ProxySettings,
    RequestOptions, SharedProxySettings, Transport, TransportError, TransportResponse,
    UnavailableReason,
};
