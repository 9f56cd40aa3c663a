//! # Event Notification Module
//!
//! A single-process publish/subscribe substrate. Components publish typed
//! events on an [`EventBus`]; the bus fans them out to the subscribers
//! registered for that [`EventKind`], either inline (`DispatchMode::Sync`) or
//! through one [`DispatchProxy`] worker per subscriber (`DispatchMode::Async`).
//!
//! ## Contained Modules:
//!
//! - **`event`**: `EventKind`, `EventPayload` and the immutable `Event`.
//! - **`subscriber`**: The `Subscriber` trait and its identity handle.
//! - **`proxy`**: Queued, cancellable asynchronous delivery for one subscriber.
//! - **`bus`**: The registration table and the publish fan-out.

/// Event kinds, payloads and the immutable event value.
pub mod event;
/// The `Subscriber` trait, subscriber identity and isolated delivery.
pub mod subscriber;
/// Asynchronous per-subscriber delivery worker.
pub mod proxy;
/// The registration table and publish fan-out.
pub mod bus;

pub use bus::{BusError, DispatchMode, EventBus};
pub use event::{Event, EventKind, EventPayload};
pub use proxy::DispatchProxy;
pub use subscriber::{Subscriber, SubscriberId};
