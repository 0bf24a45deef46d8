//! Client Fan-out Registry
//!
//! Delivers price changes to every connected stream client.
//!
//! # Architecture
//!
//! Each client registers a [`ClientSink`] under an opaque [`ClientId`]. The
//! usual sink is a bounded tokio mpsc channel drained by the client's
//! stream session:
//! - A full channel drops the update (the next stream cycle re-sends every
//!   price)
//! - A closed channel fails the delivery and marks the client inactive
//!
//! Inactive clients stay registered until removed explicitly, so their
//! sessions can notice and drain. A bounded event history backs
//! diagnostics.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::market::PriceSample;
use crate::infrastructure::metrics::{self, DeliveryOutcome};

/// Connection events kept for diagnostics.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

// =============================================================================
// Client Identity and Sinks
// =============================================================================

/// Opaque stream client identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Failure to hand an update to one client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The client's receiving side is gone.
    #[error("client channel closed")]
    Closed,

    /// The sink refused the update.
    #[error("client sink rejected update: {0}")]
    Rejected(String),
}

/// Successful delivery outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The update was queued for the client.
    Queued,
    /// The client's buffer was full; the update was skipped.
    Dropped,
}

/// Per-client delivery target.
#[cfg_attr(test, mockall::automock)]
pub trait ClientSink: Send + Sync {
    /// Hand one update to the client without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] when the client can no longer receive.
    fn deliver(&self, sample: &PriceSample) -> Result<Delivery, DeliveryError>;
}

/// [`ClientSink`] backed by a bounded mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<PriceSample>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PriceSample>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ClientSink for ChannelSink {
    fn deliver(&self, sample: &PriceSample) -> Result<Delivery, DeliveryError> {
        match self.tx.try_send(sample.clone()) {
            Ok(()) => Ok(Delivery::Queued),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(Delivery::Dropped),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }
}

// =============================================================================
// Records and Events
// =============================================================================

struct ClientRecord {
    sink: Arc<dyn ClientSink>,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    active: bool,
}

/// Point-in-time view of one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client identifier.
    pub id: ClientId,
    /// When the client registered.
    pub connected_at: DateTime<Utc>,
    /// Last successful delivery or explicit touch.
    pub last_activity: DateTime<Utc>,
    /// Whether deliveries are still attempted.
    pub is_active: bool,
}

/// Kind of connection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEventKind {
    /// Client registered.
    Connected,
    /// Client deregistered.
    Disconnected,
    /// A delivery to the client failed.
    Error,
}

/// One entry of the connection history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEvent {
    /// Client the event belongs to.
    pub client_id: ClientId,
    /// What happened.
    pub kind: ConnectionEventKind,
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Failure detail for error events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Connection counters derived from the history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Events in the (capped) history.
    pub total: usize,
    /// Currently active clients.
    pub active: usize,
    /// `total - active`, saturating.
    pub disconnected: usize,
}

/// Outcome of one [`ClientRegistry::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients that queued the update.
    pub delivered: usize,
    /// Clients whose buffer was full.
    pub dropped: usize,
    /// Clients whose delivery failed; now inactive.
    pub failed: usize,
}

// =============================================================================
// Client Registry
// =============================================================================

/// Registry of stream clients and their sinks.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use ticker_stream::domain::market::{PriceSample, Ticker};
/// use ticker_stream::infrastructure::broadcast::{ChannelSink, ClientId, ClientRegistry};
///
/// let registry = ClientRegistry::new();
/// let (sink, mut rx) = ChannelSink::channel(8);
/// let id = ClientId::new();
/// registry.add_client(id, Arc::new(sink));
///
/// let sample = PriceSample::new(Ticker::parse("BTCUSD").unwrap(), "1.00");
/// assert_eq!(registry.broadcast(&sample).delivered, 1);
/// assert_eq!(rx.try_recv().unwrap().price, "1.00");
///
/// assert!(registry.remove_client(id));
/// assert!(!registry.remove_client(id));
/// ```
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientRecord>>,
    history: Mutex<VecDeque<ConnectionEvent>>,
    history_capacity: usize,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.client_count())
            .field("active", &self.active_client_count())
            .finish_non_exhaustive()
    }
}

impl ClientRegistry {
    /// Create an empty registry with the default history capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create an empty registry keeping at most `capacity` events.
    #[must_use]
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY))),
            history_capacity: capacity.max(1),
        }
    }

    /// Register `sink` under `id`.
    ///
    /// An existing registration with the same id is torn down first.
    pub fn add_client(&self, id: ClientId, sink: Arc<dyn ClientSink>) {
        let now = Utc::now();
        let previous = self.clients.write().insert(
            id,
            ClientRecord {
                sink,
                connected_at: now,
                last_activity: now,
                active: true,
            },
        );

        if previous.is_some() {
            tracing::warn!(client_id = %id, "Client id reused, replacing registration");
            self.record_event(id, ConnectionEventKind::Disconnected, None);
        }
        self.record_event(id, ConnectionEventKind::Connected, None);
        self.publish_client_gauge();

        tracing::info!(client_id = %id, clients = self.client_count(), "Client connected");
    }

    /// Mark `id` inactive and deregister it.
    ///
    /// Returns `false` when the client was not registered.
    pub fn remove_client(&self, id: ClientId) -> bool {
        let removed = {
            let mut clients = self.clients.write();
            if let Some(record) = clients.get_mut(&id) {
                record.active = false;
            }
            clients.remove(&id)
        };

        if removed.is_none() {
            return false;
        }

        self.record_event(id, ConnectionEventKind::Disconnected, None);
        self.publish_client_gauge();

        tracing::info!(client_id = %id, clients = self.client_count(), "Client disconnected");
        true
    }

    /// Deliver `sample` to every active client.
    ///
    /// A failed delivery marks only that client inactive.
    pub fn broadcast(&self, sample: &PriceSample) -> BroadcastReport {
        let targets: Vec<(ClientId, Arc<dyn ClientSink>)> = self
            .clients
            .read()
            .iter()
            .filter(|(_, record)| record.active)
            .map(|(id, record)| (*id, Arc::clone(&record.sink)))
            .collect();

        let mut report = BroadcastReport::default();
        let mut delivered_ids = Vec::with_capacity(targets.len());

        for (id, sink) in targets {
            match sink.deliver(sample) {
                Ok(Delivery::Queued) => {
                    report.delivered += 1;
                    delivered_ids.push(id);
                }
                Ok(Delivery::Dropped) => {
                    report.dropped += 1;
                    tracing::debug!(client_id = %id, ticker = %sample.ticker, "Client buffer full, update dropped");
                }
                Err(e) => {
                    report.failed += 1;
                    self.mark_failed(id, &e);
                }
            }
        }

        if !delivered_ids.is_empty() {
            let now = Utc::now();
            let mut clients = self.clients.write();
            for id in delivered_ids {
                if let Some(record) = clients.get_mut(&id) {
                    record.last_activity = now;
                }
            }
        }

        for (outcome, count) in [
            (DeliveryOutcome::Delivered, report.delivered),
            (DeliveryOutcome::Dropped, report.dropped),
            (DeliveryOutcome::Failed, report.failed),
        ] {
            metrics::record_deliveries(outcome, u64::try_from(count).unwrap_or(u64::MAX));
        }
        if report.failed > 0 {
            self.publish_client_gauge();
        }

        report
    }

    /// Deliver `sample` to one client.
    ///
    /// Returns `true` when the update was queued.
    pub fn deliver_to(&self, id: ClientId, sample: &PriceSample) -> bool {
        let sink = {
            let clients = self.clients.read();
            match clients.get(&id) {
                Some(record) if record.active => Arc::clone(&record.sink),
                _ => return false,
            }
        };

        match sink.deliver(sample) {
            Ok(Delivery::Queued) => {
                self.touch(id);
                true
            }
            Ok(Delivery::Dropped) => false,
            Err(e) => {
                self.mark_failed(id, &e);
                self.publish_client_gauge();
                false
            }
        }
    }

    /// Ids of active clients.
    #[must_use]
    pub fn active_client_ids(&self) -> Vec<ClientId> {
        self.clients
            .read()
            .iter()
            .filter(|(_, record)| record.active)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Whether `id` is registered and active.
    #[must_use]
    pub fn is_active(&self, id: ClientId) -> bool {
        self.clients.read().get(&id).is_some_and(|r| r.active)
    }

    /// Registered clients, active or not.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Active clients.
    #[must_use]
    pub fn active_client_count(&self) -> usize {
        self.clients.read().values().filter(|r| r.active).count()
    }

    /// Snapshot of one client.
    #[must_use]
    pub fn client_info(&self, id: ClientId) -> Option<ClientInfo> {
        self.clients.read().get(&id).map(|record| ClientInfo {
            id,
            connected_at: record.connected_at,
            last_activity: record.last_activity,
            is_active: record.active,
        })
    }

    /// Refresh `id`'s last activity. Returns `false` for unknown clients.
    pub fn touch(&self, id: ClientId) -> bool {
        self.clients.write().get_mut(&id).is_some_and(|record| {
            record.last_activity = Utc::now();
            true
        })
    }

    /// Clients that are inactive or idle for longer than `idle`.
    #[must_use]
    pub fn inactive_clients(&self, idle: Duration) -> Vec<ClientId> {
        let cutoff = chrono::Duration::from_std(idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle));

        self.clients
            .read()
            .iter()
            .filter(|(_, record)| {
                !record.active || cutoff.is_some_and(|cutoff| record.last_activity < cutoff)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Connection events, oldest first.
    #[must_use]
    pub fn connection_history(&self) -> Vec<ConnectionEvent> {
        self.history.lock().iter().cloned().collect()
    }

    /// Counters derived from the history and active clients.
    #[must_use]
    pub fn connection_stats(&self) -> ConnectionStats {
        let total = self.history.lock().len();
        let active = self.active_client_count();
        ConnectionStats {
            total,
            active,
            disconnected: total.saturating_sub(active),
        }
    }

    /// Deregister every client, returning how many were removed.
    pub fn remove_all(&self) -> usize {
        let removed: Vec<ClientId> = self.clients.write().drain().map(|(id, _)| id).collect();

        for id in &removed {
            self.record_event(*id, ConnectionEventKind::Disconnected, None);
        }
        self.publish_client_gauge();

        if !removed.is_empty() {
            tracing::info!(removed = removed.len(), "All clients removed");
        }
        removed.len()
    }

    fn mark_failed(&self, id: ClientId, error: &DeliveryError) {
        let was_active = self
            .clients
            .write()
            .get_mut(&id)
            .is_some_and(|record| std::mem::replace(&mut record.active, false));

        if was_active {
            tracing::warn!(client_id = %id, error = %error, "Delivery failed, client marked inactive");
            self.record_event(id, ConnectionEventKind::Error, Some(error.to_string()));
        }
    }

    fn record_event(&self, client_id: ClientId, kind: ConnectionEventKind, detail: Option<String>) {
        let mut history = self.history.lock();
        while history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(ConnectionEvent {
            client_id,
            kind,
            at: Utc::now(),
            detail,
        });
    }

    fn publish_client_gauge(&self) {
        metrics::set_clients(self.active_client_count());
    }
}

// =============================================================================
// Tests
// =============================================================================
