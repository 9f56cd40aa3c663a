//! # Dispatch Proxy
//!
//! Decouples event production from a subscriber's processing time. Each proxy
//! owns one tokio task and an unbounded FIFO queue; the bus only pushes into the
//! queue, so `publish` never waits on a proxied subscriber.
//!
//! ```text
//! EventBus::publish ──► enqueue ──► [unbounded mpsc] ──► worker ──► subscriber.handle_event()
//!                                                          ▲
//!                          stop() ── CancellationToken ────┘
//! ```
//!
//! The worker waits on the queue and the cancellation token at the same time,
//! so `stop()` wakes a worker that is idle on an empty queue. Events still
//! queued when the proxy stops are discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::bus::BusError;
use super::event::Event;
use super::subscriber::{deliver_isolated, Subscriber, SubscriberId};

/// Queued asynchronous delivery for one subscriber.
pub struct DispatchProxy {
    /// Identity of the wrapped subscriber; the proxy is transparent for
    /// registration and removal lookups.
    id: SubscriberId,
    name: String,
    sender: mpsc::UnboundedSender<Arc<Event>>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchProxy {
    /// Wraps `subscriber` and starts its delivery worker on the current tokio runtime.
    ///
    /// # Errors
    /// Returns [`BusError::NoRuntime`] when called outside a tokio runtime.
    pub fn spawn(subscriber: Arc<dyn Subscriber>) -> Result<Self, BusError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let id = SubscriberId::of(&subscriber);
        let name = subscriber.name().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicBool::new(true));

        let worker = handle.spawn(run_worker(
            subscriber,
            receiver,
            cancel.clone(),
            Arc::clone(&running),
        ));
        debug!(subscriber = %name, "Dispatch proxy started");

        Ok(Self {
            id,
            name,
            sender,
            cancel,
            running,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Identity of the wrapped subscriber.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Name of the wrapped subscriber.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues an event for delivery and returns immediately.
    ///
    /// Returns `false` if the proxy has been stopped; the event is dropped.
    pub fn enqueue(&self, event: Arc<Event>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.sender.send(event).is_ok()
    }

    /// Signals the worker to stop. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!(subscriber = %self.name, "Stopping dispatch proxy");
            self.cancel.cancel();
        }
    }

    /// `true` until the worker loop has exited.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Waits for the worker task to exit. Call [`stop`](Self::stop) first.
    pub async fn wait_stopped(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for DispatchProxy {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for DispatchProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchProxy")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_worker(
    subscriber: Arc<dyn Subscriber>,
    mut receiver: mpsc::UnboundedReceiver<Arc<Event>>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = receiver.recv() => match next {
                Some(event) => {
                    deliver_isolated(subscriber.as_ref(), &event).await;
                }
                None => break,
            },
        }
    }
    running.store(false, Ordering::Release);
    debug!(subscriber = subscriber.name(), "Dispatch proxy worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Forwarder(mpsc::UnboundedSender<u64>);

    #[async_trait]
    impl Subscriber for Forwarder {
        async fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
            let n = event.payload().as_bytes().unwrap_or_default();
            if n == 13 {
                anyhow::bail!("unlucky");
            }
            self.0.send(n)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivers_in_fifo_order_and_survives_failures() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let proxy = DispatchProxy::spawn(Arc::new(Forwarder(tx))).unwrap();

        for n in [1u64, 2, 13, 3] {
            assert!(proxy.enqueue(Arc::new(Event::new(EventKind::NetworkBytesDownloaded, n))));
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stop_wakes_an_idle_worker() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let proxy = DispatchProxy::spawn(Arc::new(Forwarder(tx))).unwrap();
        assert!(proxy.is_running());

        proxy.stop();
        timeout(Duration::from_secs(2), proxy.wait_stopped())
            .await
            .expect("worker did not stop");
        assert!(!proxy.is_running());
        assert!(!proxy.enqueue(Arc::new(Event::new(EventKind::StatusMessage, "late"))));
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = DispatchProxy::spawn(Arc::new(Forwarder(tx))).unwrap_err();
        assert!(matches!(err, BusError::NoRuntime));
    }
}
