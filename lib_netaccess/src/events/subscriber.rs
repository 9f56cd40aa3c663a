//! # Subscriber
//!
//! The extension point for anything that wants to react to bus events: the
//! GUI, caches, portfolio refresh, and the network service's own proxy
//! reloader.
//!
//! Handlers are isolated. A returned error or a panic is caught and logged by
//! [`deliver_isolated`]; it never reaches the publisher and never stops the
//! delivery to the next subscriber.

use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, trace, warn};

use super::event::Event;

/// Receives events from the bus.
///
/// In `DispatchMode::Sync` the handler runs in the publisher's task, so keep it
/// short. In `DispatchMode::Async` it runs on the subscriber's own worker.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Handles one event. Errors are logged by the bus and otherwise ignored.
    async fn handle_event(&self, event: &Event) -> anyhow::Result<()>;

    /// Name used in logs. Defaults to the implementing type's name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// # Subscriber Identity
///
/// Identity of a subscriber handle, taken from its `Arc` allocation. Two clones
/// of the same `Arc` are the same subscriber; two separately allocated
/// subscribers never are, even if their contents compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(usize);

impl SubscriberId {
    /// Identity of the given handle.
    pub fn of(subscriber: &Arc<dyn Subscriber>) -> Self {
        Self(Arc::as_ptr(subscriber).cast::<()>() as usize)
    }
}

/// Runs `handle_event`, converting errors and panics into log entries.
///
/// Returns `true` when the handler completed successfully.
pub(crate) async fn deliver_isolated(subscriber: &dyn Subscriber, event: &Event) -> bool {
    match AssertUnwindSafe(subscriber.handle_event(event))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {
            trace!(subscriber = subscriber.name(), kind = %event.kind(), "event delivered");
            true
        }
        Ok(Err(e)) => {
            warn!(
                subscriber = subscriber.name(),
                kind = %event.kind(),
                error = %e,
                "Subscriber failed to handle event"
            );
            false
        }
        Err(panic) => {
            error!(
                subscriber = subscriber.name(),
                kind = %event.kind(),
                panic = %panic_message(panic.as_ref()),
                "Subscriber panicked while handling event"
            );
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    struct Failing;

    #[async_trait]
    impl Subscriber for Failing {
        async fn handle_event(&self, _event: &Event) -> anyhow::Result<()> {
            anyhow::bail!("refused")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Subscriber for Panicking {
        async fn handle_event(&self, _event: &Event) -> anyhow::Result<()> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_contained() {
        let event = Event::new(EventKind::StatusMessage, "hello");
        assert!(!deliver_isolated(&Failing, &event).await);
        assert!(!deliver_isolated(&Panicking, &event).await);
    }

    #[test]
    fn test_identity_follows_the_allocation() {
        let a: Arc<dyn Subscriber> = Arc::new(Failing);
        let b: Arc<dyn Subscriber> = Arc::new(Failing);
        assert_eq!(SubscriberId::of(&a), SubscriberId::of(&Arc::clone(&a)));
        assert_ne!(SubscriberId::of(&a), SubscriberId::of(&b));
    }
}
