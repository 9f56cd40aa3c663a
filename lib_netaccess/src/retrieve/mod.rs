//! # Data Retrieval Module
//!
//! The concrete HTTP stack behind `NetworkService`.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: `HttpTransport`, a pooled `reqwest` client implementing
//!   the `Transport` seam. It performs exactly one attempt per call; the
//!   retry policy lives in the service, not in client middleware.

/// reqwest-backed transport with gzip/deflate and a live-reloadable proxy.
pub mod ky_http;
