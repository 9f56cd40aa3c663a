//! # Network Error Taxonomy
//!
//! Two layers. [`TransportError`] describes what went wrong with one attempt
//! and whether another attempt could help. [`NetError`] is what callers of
//! `NetworkService` see once the service has finished retrying.

use thiserror::Error;

/// Failure of a single request attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be built (bad URL, unsupported scheme, bad header).
    #[error("malformed request: {0}")]
    Malformed(String),
    /// The server or proxy demanded credentials (401/407).
    #[error("authentication challenge (HTTP {0})")]
    AuthChallenge(u16),
    /// Protocol-level failure such as a redirect loop.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Non-success HTTP status other than an authentication challenge.
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    /// Connect or overall request timeout.
    #[error("timed out: {0}")]
    Timeout(String),
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The request was sent but no response arrived.
    #[error("no response: {0}")]
    NoResponse(String),
    /// Any other transient I/O failure, including a broken body stream.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Maps a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 407 => TransportError::AuthChallenge(status),
            _ => TransportError::HttpStatus(status),
        }
    }

    /// `true` if retrying the same request may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransportError::Malformed(_)
            | TransportError::AuthChallenge(_)
            | TransportError::Protocol(_) => false,
            TransportError::HttpStatus(status) => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
            TransportError::Timeout(_)
            | TransportError::Connect(_)
            | TransportError::NoResponse(_)
            | TransportError::Io(_) => true,
        }
    }
}

/// Why the service refused or abandoned a call without a transport failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnavailableReason {
    /// `set_offline` is in effect.
    #[error("manually set offline")]
    ManualOffline,
    /// The last failure window contained no success.
    #[error("too many consecutive failures")]
    HeuristicOffline,
    /// A 200 response carried a known error page.
    #[error("response matched known error signature '{signature}'")]
    ProxyInjected {
        /// The configured signature found in the body.
        signature: String,
    },
}

/// Errors surfaced by `NetworkService`.
#[derive(Debug, Error)]
pub enum NetError {
    /// Not retried: the request itself, or the credentials, are wrong.
    #[error("unrecoverable protocol error for {url}: {source}")]
    UnrecoverableProtocol {
        /// Target URL.
        url: String,
        /// The failing attempt.
        #[source]
        source: TransportError,
    },
    /// Every attempt failed with a recoverable error.
    #[error("network connection failure for {url} after {attempts} attempts: {source}")]
    ConnectionFailure {
        /// Target URL.
        url: String,
        /// Total attempts made, first one included.
        attempts: u32,
        /// The last attempt's failure.
        #[source]
        source: TransportError,
    },
    /// The network is considered unavailable.
    #[error("network unavailable: {0}")]
    Unavailable(#[from] UnavailableReason),
    /// The caller's cancellation token fired.
    #[error("request to {url} cancelled")]
    Cancelled {
        /// Target URL.
        url: String,
    },
    /// The caller's overall deadline passed before the retry loop finished.
    #[error("request to {url} exceeded its deadline")]
    DeadlineExceeded {
        /// Target URL.
        url: String,
    },
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl NetError {
    /// `true` for the fast-fail and proxy-injected cases.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, NetError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(TransportError::from_status(407), TransportError::AuthChallenge(407));
        assert!(!TransportError::from_status(401).is_recoverable());
        assert!(!TransportError::from_status(404).is_recoverable());
        assert!(TransportError::from_status(503).is_recoverable());
        assert!(TransportError::from_status(429).is_recoverable());
        assert!(TransportError::Timeout("connect".into()).is_recoverable());
        assert!(!TransportError::Malformed("no scheme".into()).is_recoverable());
    }
}
