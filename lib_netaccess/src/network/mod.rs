//! # Network Access Module
//!
//! Everything between a scraper asking for a page and the bytes coming back:
//! the retry loop, the belief about whether the network is up, proxy routing,
//! and the translation of transport failures into one error taxonomy.
//!
//! ## Contained Modules:
//!
//! - **`service`**: `NetworkService`, the public entry point (`get`, `post`,
//!   `check_network_status`, manual on/offline).
//! - **`heuristic`**: The sliding failure window deciding availability.
//! - **`transport`**: The `Transport` seam the service drives.
//! - **`proxy`**: Proxy host/credential settings and their live reload.
//! - **`error`**: `TransportError` and the service boundary `NetError`.

/// Service boundary and transport error types.
pub mod error;
/// Sliding-window connectivity heuristic.
pub mod heuristic;
/// Proxy settings, credentials and the preference reloader.
pub mod proxy;
/// The network access service.
pub mod service;
/// The transport seam and request/response values.
pub mod transport;

pub use error::{NetError, TransportError, UnavailableReason};
pub use heuristic::ConnectivityHeuristic;
pub use proxy::{ProxyCredentials, ProxyReloader, ProxySettings, SharedProxySettings};
pub use service::{NetworkService, RequestOptions};
pub use transport::{HttpMethod, OutboundRequest, Transport, TransportResponse};
