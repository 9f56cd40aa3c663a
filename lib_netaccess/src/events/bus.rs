//! # Event Bus
//!
//! The registration table mapping each [`EventKind`] to an ordered list of
//! subscribers, and the publish fan-out over it.
//!
//! ## Rules
//! - Registration order is delivery order within a kind.
//! - A subscriber is registered at most once per kind (identity dedup).
//! - `publish` snapshots the list under the table lock and delivers after
//!   releasing it, so a slow subscriber never blocks registrations or other
//!   publishers.
//! - A failing or panicking subscriber is logged and skipped; `publish` never
//!   returns an error.
//! - In [`DispatchMode::Async`] each subscriber gets exactly one
//!   [`DispatchProxy`], shared by every kind it is registered for, which keeps
//!   its deliveries FIFO across kinds. The proxy is stopped once the
//!   subscriber is no longer registered for any kind.
//!
//! The bus is an ordinary value: build one with [`EventBus::new`] or
//! [`EventBus::from_config`], share it as `Arc<EventBus>`, and end its life
//! with [`EventBus::shutdown`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

use super::event::{Event, EventKind, EventPayload};
use super::proxy::DispatchProxy;
use super::subscriber::{deliver_isolated, Subscriber, SubscriberId};
use crate::configs::config_net::EventsConfig;

/// Errors raised by registration calls. Publishing never fails.
#[derive(Debug, Error)]
pub enum BusError {
    /// A subscription pattern is not a valid regular expression.
    #[error("invalid subscription pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The pattern as supplied by the caller.
        pattern: String,
        /// The regex compilation error.
        #[source]
        source: regex::Error,
    },
    /// Asynchronous dispatch needs a running tokio runtime to host its workers.
    #[error("asynchronous dispatch requires a running tokio runtime")]
    NoRuntime,
}

/// How the bus delivers events, fixed for the life of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Handlers run inline, in the publisher's task.
    #[default]
    Sync,
    /// Handlers run on one dedicated worker per subscriber.
    Async,
}

#[derive(Clone)]
enum Registration {
    Direct {
        id: SubscriberId,
        subscriber: Arc<dyn Subscriber>,
    },
    Proxied(Arc<DispatchProxy>),
}

impl Registration {
    fn id(&self) -> SubscriberId {
        match self {
            Registration::Direct { id, .. } => *id,
            Registration::Proxied(proxy) => proxy.id(),
        }
    }

    async fn deliver(&self, event: &Arc<Event>) -> bool {
        match self {
            Registration::Direct { subscriber, .. } => {
                deliver_isolated(subscriber.as_ref(), event).await
            }
            Registration::Proxied(proxy) => proxy.enqueue(Arc::clone(event)),
        }
    }
}

#[derive(Default)]
struct Table {
    by_kind: HashMap<EventKind, Vec<Registration>>,
    proxies: HashMap<SubscriberId, Arc<DispatchProxy>>,
}

impl Table {
    fn is_registered_anywhere(&self, id: SubscriberId) -> bool {
        self.by_kind
            .values()
            .any(|list| list.iter().any(|r| r.id() == id))
    }
}

/// # Event Bus
///
/// Thread-safe publish/subscribe registry. Cheap to share behind an `Arc`.
pub struct EventBus {
    mode: DispatchMode,
    table: Mutex<Table>,
    published: AtomicU64,
}

impl EventBus {
    /// Creates an empty bus using the given dispatch mode.
    pub fn new(mode: DispatchMode) -> Self {
        info!(mode = ?mode, "Event bus initialized");
        Self {
            mode,
            table: Mutex::new(Table::default()),
            published: AtomicU64::new(0),
        }
    }

    /// Creates a bus from the `events` configuration section.
    pub fn from_config(config: &EventsConfig) -> Self {
        Self::new(config.dispatch)
    }

    /// The dispatch mode chosen at construction.
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    fn lock_table(&self) -> MutexGuard<'_, Table> {
        // Handlers never run under this lock, so a poisoned table is still consistent.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `subscriber` for each of `kinds`, or for every kind when `kinds` is empty.
    ///
    /// Kinds the subscriber is already registered for are skipped.
    ///
    /// # Returns
    /// The number of new registrations.
    ///
    /// # Errors
    /// [`BusError::NoRuntime`] in asynchronous mode outside a tokio runtime.
    pub fn add_subscriber(
        &self,
        subscriber: Arc<dyn Subscriber>,
        kinds: &[EventKind],
    ) -> Result<usize, BusError> {
        let kinds: &[EventKind] = if kinds.is_empty() { &EventKind::ALL } else { kinds };
        let id = SubscriberId::of(&subscriber);
        let mut table = self.lock_table();

        let registration = match self.mode {
            DispatchMode::Sync => Registration::Direct {
                id,
                subscriber: Arc::clone(&subscriber),
            },
            DispatchMode::Async => {
                let proxy = match table.proxies.get(&id) {
                    Some(existing) => Arc::clone(existing),
                    None => Arc::new(DispatchProxy::spawn(Arc::clone(&subscriber))?),
                };
                Registration::Proxied(proxy)
            }
        };

        let mut added = 0;
        for kind in kinds {
            let list = table.by_kind.entry(*kind).or_default();
            if list.iter().any(|r| r.id() == id) {
                continue;
            }
            list.push(registration.clone());
            added += 1;
        }

        if let Registration::Proxied(proxy) = &registration {
            if added > 0 {
                table.proxies.entry(id).or_insert_with(|| Arc::clone(proxy));
            } else if !table.proxies.contains_key(&id) {
                // Nothing was registered, so the fresh worker has no owner.
                proxy.stop();
            }
        }

        debug!(subscriber = subscriber.name(), added, "Subscriber registered");
        Ok(added)
    }

    /// Registers `subscriber` for every kind whose name fully matches one of `patterns`.
    ///
    /// A leading `*` is read as `.*` so simple globs work (`*_STATUS`). An
    /// empty pattern list subscribes to every kind.
    ///
    /// # Errors
    /// [`BusError::InvalidPattern`] if a pattern does not compile; nothing is
    /// registered in that case.
    pub fn add_subscriber_for_pattern(
        &self,
        subscriber: Arc<dyn Subscriber>,
        patterns: &[&str],
    ) -> Result<usize, BusError> {
        if patterns.is_empty() {
            return self.add_subscriber(subscriber, &[]);
        }

        let compiled = patterns
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>, _>>()?;

        let kinds: Vec<EventKind> = EventKind::ALL
            .iter()
            .copied()
            .filter(|kind| compiled.iter().any(|re| re.is_match(kind.name())))
            .collect();

        if kinds.is_empty() {
            debug!(subscriber = subscriber.name(), ?patterns, "Patterns matched no event kind");
            return Ok(0);
        }
        self.add_subscriber(subscriber, &kinds)
    }

    /// Removes `subscriber` from each of `kinds`, or from every kind when `kinds` is empty.
    ///
    /// If the subscriber is proxied and no registration is left, its proxy is stopped.
    ///
    /// # Returns
    /// The number of registrations removed.
    pub fn remove_subscriber(&self, subscriber: &Arc<dyn Subscriber>, kinds: &[EventKind]) -> usize {
        let kinds: &[EventKind] = if kinds.is_empty() { &EventKind::ALL } else { kinds };
        let id = SubscriberId::of(subscriber);
        let mut table = self.lock_table();

        let mut removed = 0;
        for kind in kinds {
            if let Some(list) = table.by_kind.get_mut(kind) {
                let before = list.len();
                list.retain(|r| r.id() != id);
                removed += before - list.len();
            }
        }

        if removed > 0 && !table.is_registered_anywhere(id) {
            if let Some(proxy) = table.proxies.remove(&id) {
                proxy.stop();
            }
        }

        debug!(subscriber = subscriber.name(), removed, "Subscriber removed");
        removed
    }

    /// Stops every dispatch proxy and clears the table.
    ///
    /// # Returns
    /// The stopped proxies, so a caller can wait for their workers to exit.
    pub fn remove_all_subscribers(&self) -> Vec<Arc<DispatchProxy>> {
        let proxies: Vec<Arc<DispatchProxy>> = {
            let mut table = self.lock_table();
            table.by_kind.clear();
            table.proxies.drain().map(|(_, proxy)| proxy).collect()
        };
        for proxy in &proxies {
            proxy.stop();
        }
        debug!(stopped = proxies.len(), "All subscribers removed");
        proxies
    }

    /// Removes every subscriber and waits for all delivery workers to exit.
    pub async fn shutdown(&self) {
        let proxies = self.remove_all_subscribers();
        for proxy in &proxies {
            proxy.wait_stopped().await;
        }
        info!(workers = proxies.len(), "Event bus shut down");
    }

    /// Creates an event from `kind` and `payload` and publishes it.
    ///
    /// # Returns
    /// The number of subscribers that accepted the event (handled it in sync
    /// mode, queued it in async mode).
    pub async fn publish(&self, kind: EventKind, payload: impl Into<EventPayload>) -> usize {
        self.publish_event(Event::new(kind, payload)).await
    }

    /// Publishes an already constructed event.
    pub async fn publish_event(&self, event: Event) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let event = Arc::new(event);

        let targets: Vec<Registration> = {
            let table = self.lock_table();
            match table.by_kind.get(&event.kind()) {
                Some(list) => list.clone(),
                None => return 0,
            }
        };

        let mut accepted = 0;
        for target in &targets {
            if target.deliver(&event).await {
                accepted += 1;
            }
        }
        accepted
    }

    /// Number of subscribers registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lock_table().by_kind.get(&kind).map_or(0, Vec::len)
    }

    /// `true` if `subscriber` is registered for `kind`.
    pub fn is_subscribed(&self, subscriber: &Arc<dyn Subscriber>, kind: EventKind) -> bool {
        let id = SubscriberId::of(subscriber);
        self.lock_table()
            .by_kind
            .get(&kind)
            .is_some_and(|list| list.iter().any(|r| r.id() == id))
    }

    /// Total number of publish calls since creation.
    pub fn events_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DispatchMode::default())
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        let table = self.table.get_mut().unwrap_or_else(PoisonError::into_inner);
        for proxy in table.proxies.values() {
            proxy.stop();
        }
    }
}

/// Compiles a subscription pattern into a full-match regex.
fn compile_pattern(pattern: &str) -> Result<Regex, BusError> {
    let expanded = if pattern.starts_with('*') {
        format!(".{}", pattern)
    } else {
        pattern.to_string()
    };
    Regex::new(&format!("^(?:{})$", expanded)).map_err(|source| BusError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}
