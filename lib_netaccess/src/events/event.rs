//! # Event Model
//!
//! The value that flows through the [`EventBus`](crate::events::EventBus).
//! An [`Event`] is created once by `publish`, shared between subscribers as an
//! `Arc<Event>` (so fan-out never copies the payload) and dropped once every
//! subscriber has seen it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// # Event Kind
///
/// The routing key of the bus. The network core publishes the `Network*`
/// kinds and consumes `PreferencesChanged`; the remaining kinds belong to the
/// scheduler, trading and portfolio collaborators and are opaque here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// The believed network availability changed. Payload: `Flag(online)`.
    NetworkStatusChange,
    /// Outcome of one network call or probe. Payload: `Flag(success)`.
    NetworkCommunicationStatus,
    /// Bytes received by one successful transfer. Payload: `Bytes(n)`.
    NetworkBytesDownloaded,
    /// A set of preferences changed. Payload: `Preferences(changed keys)`.
    PreferencesChanged,
    /// Human readable status line for the UI. Payload: `Text(message)`.
    StatusMessage,
    /// A scheduled job started.
    JobStarted,
    /// A scheduled job finished.
    JobFinished,
    /// A scheduled job failed.
    JobFailed,
    /// Fresh quotes were stored.
    QuotesUpdated,
    /// A trade was added to a portfolio.
    TradeAdded,
    /// A trade was removed from a portfolio.
    TradeRemoved,
    /// Portfolio valuations were recomputed.
    PortfolioRefreshed,
}

impl EventKind {
    /// Every kind, in declaration order. "All kinds" registrations use this list.
    pub const ALL: [EventKind; 12] = [
        EventKind::NetworkStatusChange,
        EventKind::NetworkCommunicationStatus,
        EventKind::NetworkBytesDownloaded,
        EventKind::PreferencesChanged,
        EventKind::StatusMessage,
        EventKind::JobStarted,
        EventKind::JobFinished,
        EventKind::JobFailed,
        EventKind::QuotesUpdated,
        EventKind::TradeAdded,
        EventKind::TradeRemoved,
        EventKind::PortfolioRefreshed,
    ];

    /// The routing name matched by pattern subscriptions.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::NetworkStatusChange => "NETWORK_STATUS_CHANGE",
            EventKind::NetworkCommunicationStatus => "NETWORK_COMMUNICATION_STATUS",
            EventKind::NetworkBytesDownloaded => "NETWORK_BYTES_DOWNLOADED",
            EventKind::PreferencesChanged => "PREFERENCES_CHANGED",
            EventKind::StatusMessage => "STATUS_MESSAGE",
            EventKind::JobStarted => "JOB_STARTED",
            EventKind::JobFinished => "JOB_FINISHED",
            EventKind::JobFailed => "JOB_FAILED",
            EventKind::QuotesUpdated => "QUOTES_UPDATED",
            EventKind::TradeAdded => "TRADE_ADDED",
            EventKind::TradeRemoved => "TRADE_REMOVED",
            EventKind::PortfolioRefreshed => "PORTFOLIO_REFRESHED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a string names no [`EventKind`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// # Event Payload
///
/// The value carried by an event. The network core only produces flags, byte
/// counts and text; `Json` carries whatever the out-of-scope collaborators need.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EventPayload {
    /// No value.
    #[default]
    Empty,
    /// A boolean state (online, success).
    Flag(bool),
    /// A byte count.
    Bytes(u64),
    /// Free text.
    Text(String),
    /// Changed preference keys and their new values.
    Preferences(BTreeMap<String, String>),
    /// Arbitrary structured data.
    Json(Value),
}

impl EventPayload {
    /// The flag, if this payload is one.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            EventPayload::Flag(v) => Some(*v),
            _ => None,
        }
    }

    /// The byte count, if this payload is one.
    pub fn as_bytes(&self) -> Option<u64> {
        match self {
            EventPayload::Bytes(n) => Some(*n),
            _ => None,
        }
    }

    /// The text, if this payload is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventPayload::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The preference delta, if this payload is one.
    pub fn as_preferences(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            EventPayload::Preferences(map) => Some(map),
            _ => None,
        }
    }
}

impl From<()> for EventPayload {
    fn from(_: ()) -> Self {
        EventPayload::Empty
    }
}

impl From<bool> for EventPayload {
    fn from(v: bool) -> Self {
        EventPayload::Flag(v)
    }
}

impl From<u64> for EventPayload {
    fn from(n: u64) -> Self {
        EventPayload::Bytes(n)
    }
}

impl From<String> for EventPayload {
    fn from(s: String) -> Self {
        EventPayload::Text(s)
    }
}

impl From<&str> for EventPayload {
    fn from(s: &str) -> Self {
        EventPayload::Text(s.to_string())
    }
}

impl From<BTreeMap<String, String>> for EventPayload {
    fn from(map: BTreeMap<String, String>) -> Self {
        EventPayload::Preferences(map)
    }
}

impl From<Value> for EventPayload {
    fn from(v: Value) -> Self {
        EventPayload::Json(v)
    }
}

/// # Event
///
/// An immutable occurrence: what happened, its value, and when it was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    kind: EventKind,
    payload: EventPayload,
    created_at: DateTime<Utc>,
}

impl Event {
    /// Creates an event stamped with the current UTC time.
    pub fn new(kind: EventKind, payload: impl Into<EventPayload>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            created_at: Utc::now(),
        }
    }

    /// The routing key.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The carried value.
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Creation time (UTC).
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
