//! Stream Session
//!
//! Per-client producer of [`StreamMessage`]s. A session registers a channel
//! sink with the [`ClientRegistry`], then yields:
//!
//! 1. one `status` message,
//! 2. `price_update` messages as changes are broadcast to the client,
//! 3. every cycle, a `price_update` per active ticker followed by a
//!    `heartbeat`.
//!
//! The session ends by returning `None` once it has drained. Cleanup
//! (deregistering the client) runs exactly once, whether the session ends
//! on its own or is dropped mid-stream.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::application::ports::MarketSnapshot;
use crate::domain::market::PriceSample;
use crate::domain::streaming::{SessionState, StreamMessage};
use crate::infrastructure::broadcast::{ChannelSink, ClientId, ClientRegistry};

/// Stream session settings.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Time between cycles.
    pub cycle_interval: Duration,
    /// Per-client update buffer.
    pub buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(2),
            buffer: 256,
        }
    }
}

/// One connected stream client.
pub struct StreamSession {
    id: ClientId,
    clients: Arc<ClientRegistry>,
    snapshot: Arc<dyn MarketSnapshot>,
    updates: mpsc::Receiver<PriceSample>,
    cycle: Interval,
    state: SessionState,
    pending: VecDeque<StreamMessage>,
    failure: Option<String>,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    /// Register a new client and return its session.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn open(
        clients: Arc<ClientRegistry>,
        snapshot: Arc<dyn MarketSnapshot>,
        settings: StreamSettings,
    ) -> Self {
        let id = ClientId::new();
        let (sink, updates) = ChannelSink::channel(settings.buffer);
        clients.add_client(id, Arc::new(sink));

        let mut cycle = tokio::time::interval_at(
            Instant::now() + settings.cycle_interval,
            settings.cycle_interval,
        );
        cycle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            id,
            clients,
            snapshot,
            updates,
            cycle,
            state: SessionState::Connecting,
            pending: VecDeque::new(),
            failure: None,
        }
    }

    /// Client id registered for this session.
    #[must_use]
    pub const fn client_id(&self) -> ClientId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// End the session with an error message.
    ///
    /// The next call to [`Self::next_message`] yields one `error` message;
    /// the session then drains.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if matches!(self.state, SessionState::Connecting | SessionState::Streaming) {
            self.failure = Some(reason.into());
        }
    }

    /// Produce the next message, or `None` once the session has closed.
    pub async fn next_message(&mut self) -> Option<StreamMessage> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Some(message);
            }

            match self.state {
                SessionState::Connecting | SessionState::Streaming
                    if self.failure.is_some() =>
                {
                    let reason = self.failure.take().unwrap_or_default();
                    tracing::warn!(client_id = %self.id, reason = %reason, "Stream failed");
                    self.transition(SessionState::Draining);
                    return Some(StreamMessage::error(reason));
                }
                SessionState::Connecting => {
                    self.transition(SessionState::Streaming);
                    let count = self.snapshot.active_tickers().len();
                    return Some(StreamMessage::status(count));
                }
                SessionState::Streaming => self.wait_for_activity().await,
                SessionState::Draining => {
                    self.close();
                    return None;
                }
                SessionState::Closed => return None,
            }
        }
    }

    /// Adapt the session into a stream of messages.
    pub fn into_stream(self) -> impl Stream<Item = StreamMessage> + Send {
        futures::stream::unfold(self, |mut session| async move {
            session
                .next_message()
                .await
                .map(|message| (message, session))
        })
    }

    async fn wait_for_activity(&mut self) {
        tokio::select! {
            biased;

            _ = self.cycle.tick() => self.run_cycle(),
            update = self.updates.recv() => match update {
                Some(sample) => self.pending.push_back(StreamMessage::from_sample(&sample)),
                None => {
                    tracing::debug!(client_id = %self.id, "Delivery channel closed");
                    self.transition(SessionState::Draining);
                }
            },
        }
    }

    fn run_cycle(&mut self) {
        if !self.clients.is_active(self.id) {
            tracing::debug!(client_id = %self.id, "Client no longer active");
            self.transition(SessionState::Draining);
            return;
        }

        for ticker in self.snapshot.active_tickers() {
            let price = self.snapshot.current_price(&ticker);
            self.pending
                .push_back(StreamMessage::price_update(ticker, price));
        }
        self.pending.push_back(StreamMessage::heartbeat());
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.can_transition_to(next) {
            tracing::debug!(client_id = %self.id, from = %self.state, to = %next, "Stream state change");
            self.state = next;
        }
    }

    fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state != SessionState::Draining {
            self.transition(SessionState::Draining);
        }
        self.pending.clear();
        self.clients.remove_client(self.id);
        self.transition(SessionState::Closed);
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use futures::StreamExt;
    use parking_lot::RwLock;

    use super::*;
    use crate::domain::market::Ticker;
    use crate::domain::streaming::PENDING_PRICE;

    #[derive(Default)]
    struct FixedSnapshot {
        prices: RwLock<BTreeMap<Ticker, Option<String>>>,
    }

    impl FixedSnapshot {
        fn set(&self, ticker: &str, price: Option<&str>) {
            self.prices
                .write()
                .insert(Ticker::parse(ticker).unwrap(), price.map(str::to_string));
        }

        fn remove(&self, ticker: &str) {
            self.prices.write().remove(&Ticker::parse(ticker).unwrap());
        }
    }

    impl MarketSnapshot for FixedSnapshot {
        fn active_tickers(&self) -> Vec<Ticker> {
            self.prices.read().keys().cloned().collect()
        }

        fn current_price(&self, ticker: &Ticker) -> Option<String> {
            self.prices.read().get(ticker).cloned().flatten()
        }
    }

    const CYCLE: Duration = Duration::from_secs(2);

    fn open(clients: &Arc<ClientRegistry>, snapshot: &Arc<FixedSnapshot>) -> StreamSession {
        StreamSession::open(
            Arc::clone(clients),
            Arc::clone(snapshot) as Arc<dyn MarketSnapshot>,
            StreamSettings {
                cycle_interval: CYCLE,
                buffer: 4,
            },
        )
    }

    fn prices(messages: &[StreamMessage]) -> Vec<(String, String)> {
        messages
            .iter()
            .filter_map(|m| match m {
                StreamMessage::PriceUpdate { ticker, price, .. } => {
                    Some((ticker.to_string(), price.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn status_then_cycle_with_pending_placeholder() {
        let clients = Arc::new(ClientRegistry::new());
        let snapshot = Arc::new(FixedSnapshot::default());
        snapshot.set("BTCUSD", Some("64000.00"));
        snapshot.set("ETHUSD", None);

        let mut session = open(&clients, &snapshot);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(clients.is_active(session.client_id()));

        let status = session.next_message().await.unwrap();
        assert!(matches!(
            status,
            StreamMessage::Status { active_ticker_count: 2, .. }
        ));
        assert_eq!(session.state(), SessionState::Streaming);

        let mut cycle = Vec::new();
        for _ in 0..3 {
            cycle.push(session.next_message().await.unwrap());
        }

        assert_eq!(
            prices(&cycle),
            vec![
                ("BTCUSD".to_string(), "64000.00".to_string()),
                ("ETHUSD".to_string(), PENDING_PRICE.to_string()),
            ]
        );
        assert_eq!(cycle[2].kind(), "heartbeat");
    }

    #[tokio::test(start_paused = true)]
    async fn first_cycle_waits_one_interval() {
        let clients = Arc::new(ClientRegistry::new());
        let snapshot = Arc::new(FixedSnapshot::default());
        let mut session = open(&clients, &snapshot);
        session.next_message().await.unwrap();

        {
            let mut next = tokio_test::task::spawn(session.next_message());
            tokio_test::assert_pending!(next.poll());
        }

        let started = Instant::now();
        let heartbeat = session.next_message().await.unwrap();

        assert_eq!(heartbeat.kind(), "heartbeat");
        assert_eq!(started.elapsed(), CYCLE);
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_updates_are_pushed_between_cycles() {
        let clients = Arc::new(ClientRegistry::new());
        let snapshot = Arc::new(FixedSnapshot::default());
        let mut session = open(&clients, &snapshot);
        session.next_message().await.unwrap();

        let btc = Ticker::parse("BTCUSD").unwrap();
        clients.broadcast(&PriceSample::new(btc, "1.01"));

        let started = Instant::now();
        let update = session.next_message().await.unwrap();

        assert_eq!(prices(&[update]), vec![("BTCUSD".to_string(), "1.01".to_string())]);
        assert!(started.elapsed() < CYCLE);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_ticker_disappears_from_next_cycle() {
        let clients = Arc::new(ClientRegistry::new());
        let snapshot = Arc::new(FixedSnapshot::default());
        snapshot.set("BTCUSD", Some("1"));
        snapshot.set("SOLUSD", Some("2"));

        let mut session = open(&clients, &snapshot);
        session.next_message().await.unwrap();
        for _ in 0..3 {
            session.next_message().await.unwrap();
        }

        snapshot.remove("BTCUSD");

        let mut cycle = Vec::new();
        for _ in 0..2 {
            cycle.push(session.next_message().await.unwrap());
        }
        assert_eq!(prices(&cycle), vec![("SOLUSD".to_string(), "2".to_string())]);
        assert_eq!(cycle[1].kind(), "heartbeat");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_client_drains() {
        let clients = Arc::new(ClientRegistry::new());
        let snapshot = Arc::new(FixedSnapshot::default());
        let mut session = open(&clients, &snapshot);
        let id = session.client_id();
        session.next_message().await.unwrap();

        // A replacement sink that fails marks the client inactive.
        let (dead, dead_rx) = ChannelSink::channel(1);
        drop(dead_rx);
        clients.add_client(id, Arc::new(dead));
        clients.broadcast(&PriceSample::new(Ticker::parse("AAPL").unwrap(), "1"));
        assert!(!clients.is_active(id));

        assert_eq!(session.next_message().await, None);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(clients.client_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_ends_stream_immediately() {
        let clients = Arc::new(ClientRegistry::new());
        let snapshot = Arc::new(FixedSnapshot::default());
        let mut session = open(&clients, &snapshot);
        session.next_message().await.unwrap();

        let started = Instant::now();
        clients.remove_all();

        assert_eq!(session.next_message().await, None);
        assert!(started.elapsed() < CYCLE);
        assert_eq!(session.next_message().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_emits_error_then_closes() {
        let clients = Arc::new(ClientRegistry::new());
        let snapshot = Arc::new(FixedSnapshot::default());
        let mut session = open(&clients, &snapshot);
        session.next_message().await.unwrap();

        session.fail("source gone");

        let error = session.next_message().await.unwrap();
        assert!(matches!(&error, StreamMessage::Error { message, .. } if message == "source gone"));
        assert_eq!(session.state(), SessionState::Draining);
        assert_eq!(session.next_message().await, None);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(clients.client_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_after_close_is_ignored() {
        let clients = Arc::new(ClientRegistry::new());
        let snapshot = Arc::new(FixedSnapshot::default());
        let mut session = open(&clients, &snapshot);
        clients.remove_all();
        session.next_message().await.unwrap();
        assert_eq!(session.next_message().await, None);

        session.fail("late");
        assert_eq!(session.next_message().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_runs_exactly_once() {
        let clients = Arc::new(ClientRegistry::new());
        let snapshot = Arc::new(FixedSnapshot::default());
        let mut session = open(&clients, &snapshot);
        session.next_message().await.unwrap();
        session.fail("bye");
        session.next_message().await.unwrap();
        assert_eq!(session.next_message().await, None);
        drop(session);

        let disconnects = clients
            .connection_history()
            .iter()
            .filter(|e| e.kind == crate::infrastructure::broadcast::ConnectionEventKind::Disconnected)
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_mid_stream_deregisters_client() {
        let clients = Arc::new(ClientRegistry::new());
        let snapshot = Arc::new(FixedSnapshot::default());
        let mut session = open(&clients, &snapshot);
        session.next_message().await.unwrap();
        assert_eq!(clients.client_count(), 1);

        drop(session);
        assert_eq!(clients.client_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn into_stream_ends_with_session() {
        let clients = Arc::new(ClientRegistry::new());
        let snapshot = Arc::new(FixedSnapshot::default());
        snapshot.set("BTCUSD", Some("1"));
        let session = open(&clients, &snapshot);

        let mut stream = std::pin::pin!(session.into_stream());

        assert_eq!(stream.next().await.unwrap().kind(), "status");
        assert_eq!(stream.next().await.unwrap().kind(), "price_update");
        assert_eq!(stream.next().await.unwrap().kind(), "heartbeat");

        clients.remove_all();
        assert_eq!(stream.next().await, None);
    }
}
