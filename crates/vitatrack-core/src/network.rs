//! Connectivity tracking
//!
//! [`NetworkMonitor`] keeps the last known connectivity state. Platform code
//! pushes [`ConnectivityEvent`]s into it, either one at a time through
//! [`NetworkMonitor::update`] or by attaching an event stream. Readers can
//! poll [`NetworkMonitor::is_online`], register listeners, or await changes
//! on a `watch` channel.

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    Unknown,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellularGeneration {
    #[serde(rename = "2g")]
    G2,
    #[serde(rename = "3g")]
    G3,
    #[serde(rename = "4g")]
    G4,
    #[serde(rename = "5g")]
    G5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Offline,
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Raw connectivity report from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityEvent {
    pub is_connected: bool,
    pub connection_type: ConnectionType,
    /// `Some(false)` means a link exists but the internet is not reachable
    pub is_internet_reachable: Option<bool>,
    pub cellular_generation: Option<CellularGeneration>,
}

impl ConnectivityEvent {
    pub fn online(connection_type: ConnectionType) -> Self {
        Self {
            is_connected: true,
            connection_type,
            is_internet_reachable: Some(true),
            cellular_generation: None,
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            connection_type: ConnectionType::Offline,
            is_internet_reachable: Some(false),
            cellular_generation: None,
        }
    }

    pub fn cellular(generation: CellularGeneration) -> Self {
        Self {
            cellular_generation: Some(generation),
            ..Self::online(ConnectionType::Cellular)
        }
    }
}

/// Current connectivity as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub is_connected: bool,
    pub connection_type: ConnectionType,
    pub cellular_generation: Option<CellularGeneration>,
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self {
            is_connected: true,
            connection_type: ConnectionType::Unknown,
            cellular_generation: None,
        }
    }
}

impl From<ConnectivityEvent> for NetworkStatus {
    fn from(event: ConnectivityEvent) -> Self {
        let is_connected = event.is_connected && event.is_internet_reachable != Some(false);
        Self {
            is_connected,
            connection_type: if is_connected {
                event.connection_type
            } else {
                ConnectionType::Offline
            },
            cellular_generation: event.cellular_generation,
        }
    }
}

/// Delivered to listeners when connectivity changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityChange {
    pub is_connected: bool,
    pub connection_type: ConnectionType,
    pub was_connected: bool,
}

pub fn classify_quality(status: &NetworkStatus) -> ConnectionQuality {
    if !status.is_connected {
        return ConnectionQuality::Offline;
    }
    match status.connection_type {
        ConnectionType::Offline => ConnectionQuality::Offline,
        ConnectionType::Wifi | ConnectionType::Ethernet => ConnectionQuality::Excellent,
        ConnectionType::Cellular => match status.cellular_generation {
            Some(CellularGeneration::G5) => ConnectionQuality::Excellent,
            Some(CellularGeneration::G4) => ConnectionQuality::Good,
            Some(CellularGeneration::G3) => ConnectionQuality::Fair,
            Some(CellularGeneration::G2) => ConnectionQuality::Poor,
            None => ConnectionQuality::Fair,
        },
        ConnectionType::Unknown => ConnectionQuality::Fair,
    }
}

type Listener = Arc<dyn Fn(&ConnectivityChange) + Send + Sync>;

struct MonitorInner {
    state: watch::Sender<NetworkStatus>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for MonitorInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorInner")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Shared connectivity state; clones observe the same state
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor {
    /// Starts online with an unknown connection type
    pub fn new() -> Self {
        Self::with_status(NetworkStatus::default())
    }

    pub fn with_status(status: NetworkStatus) -> Self {
        let (state, _) = watch::channel(status);
        Self {
            inner: Arc::new(MonitorInner {
                state,
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.state.borrow().is_connected
    }

    pub fn status(&self) -> NetworkStatus {
        *self.inner.state.borrow()
    }

    pub fn quality(&self) -> ConnectionQuality {
        classify_quality(&self.status())
    }

    /// Apply a platform event, notifying listeners on a change
    pub fn update(&self, event: ConnectivityEvent) {
        let next = NetworkStatus::from(event);
        let previous = self.inner.state.send_replace(next);
        if previous == next {
            return;
        }

        if previous.is_connected != next.is_connected {
            info!(
                online = next.is_connected,
                connection_type = ?next.connection_type,
                "Connectivity changed"
            );
        } else {
            debug!(connection_type = ?next.connection_type, "Connection type changed");
        }

        let change = ConnectivityChange {
            is_connected: next.is_connected,
            connection_type: next.connection_type,
            was_connected: previous.is_connected,
        };
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&change);
        }
    }

    pub fn set_online(&self, connection_type: ConnectionType) {
        self.update(ConnectivityEvent::online(connection_type));
    }

    pub fn set_offline(&self) {
        self.update(ConnectivityEvent::offline());
    }

    /// Register a listener; it stays attached until the subscription drops
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectivityChange) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Subscription {
            monitor: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn watch(&self) -> watch::Receiver<NetworkStatus> {
        self.inner.state.subscribe()
    }

    /// Feed events from a platform stream until it ends or the handle drops
    pub fn attach<S>(&self, events: S) -> AttachHandle
    where
        S: Stream<Item = ConnectivityEvent> + Send + 'static,
    {
        let monitor = self.clone();
        let task = tokio::spawn(async move {
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                monitor.update(event);
            }
            debug!("Connectivity event stream ended");
        });
        AttachHandle { task }
    }
}

/// Listener registration; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    monitor: Weak<MonitorInner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Task feeding a platform stream into a monitor; aborted on drop
#[derive(Debug)]
pub struct AttachHandle {
    task: JoinHandle<()>,
}

impl AttachHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for AttachHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
