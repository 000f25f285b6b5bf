// WebSocket connection lifecycle for one match at a time.
//
// A `ConnectionManager` owns at most one driver task. The driver connects,
// pumps frames through the router into the shared `TelemetryState`, and on
// close either schedules a reconnect or exits. Every state write is
// generation-guarded, so once `stop()`/`start()` return, a superseded
// driver can no longer mutate anything even if it has not been torn down
// yet.
//
//   idle -> connecting -> open -> closed -> (reconnect pending -> connecting)

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::diagnostics::{self, ClientEvent};
use crate::endpoint;
use crate::epoch::publish_if_current;
use crate::router;
use crate::state::{ConnectionStatus, TelemetryState};

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("socket error: {0}")]
    Socket(String),
}

/// Inbound frames that matter to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// Opens a socket and yields its inbound frames. The stream ending is
/// treated the same as a close frame.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<FrameStream, TransportError>;
}

/// Production connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, TransportError> {
        let (ws, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| TransportError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
        Ok(frame_stream(ws))
    }
}

/// Map raw tungstenite messages onto [`Frame`]s. Binary, ping and pong
/// messages are dropped.
pub fn frame_stream<St>(messages: St) -> FrameStream
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Send + 'static,
{
    messages
        .filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.to_string()))),
                Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Socket(e.to_string()))),
            }
        })
        .boxed()
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub server_url: String,
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
}

impl From<&TelemetryConfig> for ConnectionSettings {
    fn from(config: &TelemetryConfig) -> Self {
        ConnectionSettings {
            server_url: config.server_url.clone(),
            auto_reconnect: config.auto_reconnect,
            reconnect_interval: config.reconnect_interval,
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    state_tx: watch::Sender<TelemetryState>,
    events_tx: broadcast::Sender<ClientEvent>,
    wake: Arc<Notify>,
    driver: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self::with_connector(Arc::new(TungsteniteConnector), ConnectionSettings::from(config))
    }

    pub fn with_connector(connector: Arc<dyn Connector>, settings: ConnectionSettings) -> Self {
        let (state_tx, _rx) = watch::channel(TelemetryState::default());
        Self {
            connector,
            settings,
            state_tx,
            events_tx: diagnostics::channel(),
            wake: Arc::new(Notify::new()),
            driver: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TelemetryState> {
        self.state_tx.subscribe()
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }

    /// Point-in-time copy of the current state.
    pub fn state(&self) -> TelemetryState {
        self.state_tx.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state_tx.borrow().status()
    }

    pub fn match_id(&self) -> Option<String> {
        self.state_tx.borrow().match_id().map(str::to_string)
    }

    /// Track `match_id`. Any previous connection and pending reconnect are
    /// torn down first; starting the identifier already tracked is a no-op.
    pub fn start(&mut self, match_id: impl Into<String>) {
        let match_id = match_id.into();
        if self.match_id().as_deref() == Some(match_id.as_str()) && self.driver.is_some() {
            debug!("Already tracking match {}", match_id);
            return;
        }

        self.stop();
        self.state_tx.send_modify(|s| {
            let generation = s.bump_generation();
            *s = TelemetryState::for_match(Some(match_id.clone()), generation);
        });
        self.connect();
    }

    /// Open the socket for the tracked match. No-op while open or
    /// connecting; during a pending reconnect this skips the wait.
    pub fn connect(&mut self) {
        let (status, match_id) = {
            let state = self.state_tx.borrow();
            (state.status(), state.match_id().map(str::to_string))
        };
        let Some(match_id) = match_id else {
            warn!("connect() called with no match selected");
            return;
        };
        if matches!(status, ConnectionStatus::Open | ConnectionStatus::Connecting) {
            debug!("connect() ignored: match {} is {}", match_id, status.as_str());
            return;
        }

        let driver_alive = self.driver.as_ref().is_some_and(|d| !d.is_finished());
        if driver_alive && self.settings.auto_reconnect {
            debug!("Reconnect for match {} requested early", match_id);
            self.wake.notify_one();
            return;
        }

        let url = match endpoint::socket_url(&self.settings.server_url, &match_id) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot build socket URL for match {}: {}", match_id, e);
                diagnostics::emit(
                    &self.events_tx,
                    ClientEvent::ConnectionDegraded {
                        match_id,
                        reason: e.to_string(),
                    },
                );
                return;
            }
        };

        if let Some(old) = self.driver.take() {
            old.abort();
        }
        // Fresh notifier so a stale wake-up cannot cut the next wait short.
        self.wake = Arc::new(Notify::new());
        let mut generation = 0;
        self.state_tx.send_modify(|s| {
            generation = s.bump_generation();
            s.set_status(ConnectionStatus::Connecting);
        });

        let driver = Driver {
            connector: Arc::clone(&self.connector),
            url,
            match_id,
            generation,
            settings: self.settings.clone(),
            state_tx: self.state_tx.clone(),
            events_tx: self.events_tx.clone(),
            wake: Arc::clone(&self.wake),
        };
        self.driver = Some(tokio::spawn(driver.run()));
    }

    /// Cancel any pending reconnect, close the socket, and go idle. Safe to
    /// call repeatedly and from any state. The tracked match is kept so a
    /// later `connect()` resumes it.
    ///
    /// Status reads `Idle` as soon as this returns, but the socket itself is
    /// released asynchronously: the driver task is aborted here and its
    /// stream drops the next time the runtime polls it. The generation bump
    /// guarantees nothing from that task reaches the state in between.
    pub fn disconnect(&mut self) {
        let driver = self.driver.take();
        let had_driver = driver.is_some();
        if let Some(driver) = driver {
            driver.abort();
        }

        let mut match_id = None;
        self.state_tx.send_if_modified(|s| {
            s.bump_generation();
            match_id = s.match_id().map(str::to_string);
            s.set_status(ConnectionStatus::Idle)
        });

        if had_driver {
            if let Some(match_id) = match_id {
                info!("Disconnected from match {}", match_id);
                diagnostics::emit(&self.events_tx, ClientEvent::Stopped { match_id });
            }
        }
    }

    /// Disconnect and forget the tracked match.
    pub fn stop(&mut self) {
        self.disconnect();
        self.state_tx.send_if_modified(|s| {
            if s.match_id().is_none() {
                return false;
            }
            let generation = s.bump_generation();
            *s = TelemetryState::for_match(None, generation);
            true
        });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

struct Driver {
    connector: Arc<dyn Connector>,
    url: String,
    match_id: String,
    generation: u64,
    settings: ConnectionSettings,
    state_tx: watch::Sender<TelemetryState>,
    events_tx: broadcast::Sender<ClientEvent>,
    wake: Arc<Notify>,
}

impl Driver {
    async fn run(self) {
        loop {
            if !self.publish(|s| s.set_status(ConnectionStatus::Connecting)) {
                return;
            }
            info!("Connecting to {}", self.url);
            self.emit(ClientEvent::Connecting {
                match_id: self.match_id.clone(),
                url: self.url.clone(),
            });

            match self.connector.connect(&self.url).await {
                Ok(frames) => {
                    if !self.pump(frames).await {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Connection to match {} failed: {}", self.match_id, e);
                    self.emit(ClientEvent::ConnectionDegraded {
                        match_id: self.match_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            if !self.publish(|s| s.set_status(ConnectionStatus::Closed)) {
                return;
            }
            info!("Connection to match {} closed", self.match_id);
            self.emit(ClientEvent::Closed {
                match_id: self.match_id.clone(),
            });

            if !self.settings.auto_reconnect {
                return;
            }

            let delay = self.settings.reconnect_interval;
            if !self.publish(|s| s.set_status(ConnectionStatus::ReconnectPending)) {
                return;
            }
            info!("Reconnecting to match {} in {:?}", self.match_id, delay);
            self.emit(ClientEvent::ReconnectScheduled {
                match_id: self.match_id.clone(),
                delay,
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    /// Read frames until the socket closes. Returns `false` if this driver
    /// was superseded meanwhile.
    async fn pump(&self, mut frames: FrameStream) -> bool {
        if !self.publish(|s| {
            s.on_open();
            true
        }) {
            return false;
        }
        info!("Connected to match {}", self.match_id);
        self.emit(ClientEvent::Opened {
            match_id: self.match_id.clone(),
        });

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Frame::Text(text)) => {
                    if !self.handle_text(&text) {
                        return false;
                    }
                }
                Ok(Frame::Close) => {
                    debug!("Server sent close frame for match {}", self.match_id);
                    break;
                }
                Err(e) => {
                    // Not fatal: the close path below decides what happens next.
                    warn!("Socket error on match {}: {}", self.match_id, e);
                    self.emit(ClientEvent::ConnectionDegraded {
                        match_id: self.match_id.clone(),
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
        true
    }

    fn handle_text(&self, text: &str) -> bool {
        match router::parse_frame(text) {
            Ok(message) => self.publish(|s| router::route(s, message)),
            Err(e) => {
                warn!("Dropping frame on match {}: {}", self.match_id, e);
                self.emit(ClientEvent::MessageDropped {
                    match_id: self.match_id.clone(),
                    reason: e.to_string(),
                });
                true
            }
        }
    }

    fn publish<F>(&self, update: F) -> bool
    where
        F: FnOnce(&mut TelemetryState) -> bool,
    {
        publish_if_current(&self.state_tx, self.generation, update)
    }

    fn emit(&self, event: ClientEvent) {
        diagnostics::emit(&self.events_tx, event);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::task::{Context, Poll};

    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    // -- In-memory connector ---------------------------------------------

    type FrameTx = mpsc::UnboundedSender<Result<Frame, TransportError>>;

    /// Stream that tracks how many sockets are currently alive.
    struct TrackedStream {
        rx: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
        live: Arc<AtomicUsize>,
    }

    impl Stream for TrackedStream {
        type Item = Result<Frame, TransportError>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.rx.poll_recv(cx)
        }
    }

    impl Drop for TrackedStream {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Each `connect` pops the next scripted outcome; with nothing scripted
    /// the attempt fails as if the server were down.
    #[derive(Default)]
    struct ChannelConnector {
        script: Mutex<VecDeque<Result<(), TransportError>>>,
        senders: Mutex<Vec<(String, FrameTx)>>,
        attempts: Mutex<Vec<(String, Instant)>>,
        live: Arc<AtomicUsize>,
    }

    impl ChannelConnector {
        fn accepting(n: usize) -> Arc<Self> {
            let connector = Self::default();
            connector
                .script
                .lock()
                .unwrap()
                .extend((0..n).map(|_| Ok(())));
            Arc::new(connector)
        }

        fn sender(&self, index: usize) -> FrameTx {
            self.senders.lock().unwrap()[index].1.clone()
        }

        fn urls(&self) -> Vec<String> {
            self.attempts.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
        }

        fn attempt_times(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }

        fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ChannelConnector {
        async fn connect(&self, url: &str) -> Result<FrameStream, TransportError> {
            self.attempts
                .lock()
                .unwrap()
                .push((url.to_string(), Instant::now()));
            let outcome = self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(TransportError::Connect {
                    url: url.to_string(),
                    reason: "connection refused".into(),
                })
            });
            outcome?;
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().unwrap().push((url.to_string(), tx));
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::pin(TrackedStream {
                rx,
                live: Arc::clone(&self.live),
            }))
        }
    }

    fn settings(auto_reconnect: bool) -> ConnectionSettings {
        ConnectionSettings {
            server_url: "ws://telemetry.test".into(),
            auto_reconnect,
            reconnect_interval: Duration::from_secs(5),
        }
    }

    fn text(value: serde_json::Value) -> Result<Frame, TransportError> {
        Ok(Frame::Text(value.to_string()))
    }

    fn kill(tick: u64) -> Result<Frame, TransportError> {
        text(json!({ "type": "event", "data": {
            "type": "kill", "round": 1, "tick": tick,
            "attacker": { "steamId": "1", "name": "ace" },
            "victim": { "steamId": "2", "name": "bob" }
        }}))
    }

    async fn wait_for(
        rx: &mut watch::Receiver<TelemetryState>,
        what: impl FnMut(&TelemetryState) -> bool,
    ) -> TelemetryState {
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(what))
            .await
            .expect("state condition not reached")
            .expect("state channel closed")
            .clone()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    // -- Tests -------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn start_connects_to_match_url() {
        let connector = ChannelConnector::accepting(1);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(true));
        let mut rx = manager.subscribe();

        manager.start("1042");
        let state = wait_for(&mut rx, |s| s.is_open()).await;

        assert_eq!(state.match_id(), Some("1042"));
        assert_eq!(connector.urls(), vec!["ws://telemetry.test/ws?match=1042"]);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_routed_in_order_and_duplicates_ignored() {
        let connector = ChannelConnector::accepting(1);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(true));
        let mut rx = manager.subscribe();
        manager.start("1");
        wait_for(&mut rx, |s| s.is_open()).await;

        let tx = connector.sender(0);
        for _ in 0..5 {
            tx.send(kill(100)).unwrap();
        }
        tx.send(kill(101)).unwrap();
        let state = wait_for(&mut rx, |s| s.raw_event_count() == 6).await;

        assert_eq!(state.kill_feed().len(), 1);
        assert_eq!(state.game_log().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_is_dropped_and_reported() {
        let connector = ChannelConnector::accepting(1);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(true));
        let mut rx = manager.subscribe();
        let mut events = manager.diagnostics();
        manager.start("1");
        wait_for(&mut rx, |s| s.is_open()).await;

        let tx = connector.sender(0);
        tx.send(Ok(Frame::Text("{broken".into()))).unwrap();
        tx.send(kill(5)).unwrap();
        let state = wait_for(&mut rx, |s| s.raw_event_count() == 1).await;
        assert!(state.is_open());

        let mut saw_drop = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ClientEvent::MessageDropped { .. }) {
                saw_drop = true;
            }
        }
        assert!(saw_drop);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_clears_buffers_on_open() {
        let connector = ChannelConnector::accepting(2);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(true));
        let mut rx = manager.subscribe();
        manager.start("1");
        wait_for(&mut rx, |s| s.is_open()).await;

        let first = connector.sender(0);
        first.send(kill(1)).unwrap();
        first
            .send(text(json!({ "type": "event", "data": { "type": "round_end", "round": 1, "tick": 2 } })))
            .unwrap();
        wait_for(&mut rx, |s| s.raw_event_count() == 2).await;

        first.send(Ok(Frame::Close)).unwrap();
        wait_for(&mut rx, |s| s.status() == ConnectionStatus::ReconnectPending).await;
        let before_reopen = manager.state();
        assert_eq!(before_reopen.kill_feed().len(), 1);

        let state = wait_for(&mut rx, |s| s.is_open()).await;
        assert!(state.buffers_empty());
        assert_eq!(connector.urls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_waits_for_interval() {
        let connector = ChannelConnector::accepting(1);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(true));
        let mut rx = manager.subscribe();
        manager.start("1");
        wait_for(&mut rx, |s| s.is_open()).await;

        connector
            .sender(0)
            .send(Err(TransportError::Socket("reset by peer".into())))
            .unwrap();
        // Second attempt is refused; wait for the third to be scheduled.
        wait_for(&mut rx, |_| connector.urls().len() >= 3).await;

        let times = connector.attempt_times();
        assert!(times[1] - times[0] >= Duration::from_secs(5));
        assert!(times[2] - times[1] >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn no_reconnect_when_disabled() {
        let connector = ChannelConnector::accepting(1);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(false));
        let mut rx = manager.subscribe();
        manager.start("1");
        wait_for(&mut rx, |s| s.is_open()).await;

        drop(connector.senders.lock().unwrap().drain(..));
        wait_for(&mut rx, |s| s.status() == ConnectionStatus::Closed).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.urls().len(), 1);
        assert_eq!(manager.status(), ConnectionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_noop_while_open() {
        let connector = ChannelConnector::accepting(2);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(true));
        let mut rx = manager.subscribe();
        manager.start("1");
        wait_for(&mut rx, |s| s.is_open()).await;

        manager.connect();
        manager.connect();
        settle().await;
        assert_eq!(connector.urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_skips_pending_reconnect_wait() {
        let connector = ChannelConnector::accepting(2);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(true));
        let mut rx = manager.subscribe();
        manager.start("1");
        wait_for(&mut rx, |s| s.is_open()).await;

        connector.sender(0).send(Ok(Frame::Close)).unwrap();
        wait_for(&mut rx, |s| s.status() == ConnectionStatus::ReconnectPending).await;
        let closed_at = Instant::now();

        manager.connect();
        wait_for(&mut rx, |s| s.is_open()).await;
        assert!(Instant::now() - closed_at < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent_and_cancels_reconnect() {
        let connector = ChannelConnector::accepting(1);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(true));
        let mut rx = manager.subscribe();
        manager.disconnect();
        manager.start("1");
        wait_for(&mut rx, |s| s.is_open()).await;

        connector.sender(0).send(Ok(Frame::Close)).unwrap();
        wait_for(&mut rx, |s| s.status() == ConnectionStatus::ReconnectPending).await;

        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::Idle);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.urls().len(), 1);
        assert_eq!(manager.status(), ConnectionStatus::Idle);
        assert_eq!(manager.match_id().as_deref(), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idle_at_once_and_releases_socket_after_a_poll() {
        let connector = ChannelConnector::accepting(1);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(true));
        let mut rx = manager.subscribe();
        manager.start("1");
        wait_for(&mut rx, |s| s.is_open()).await;
        let tx = connector.sender(0);
        assert_eq!(connector.live(), 1);

        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::Idle);
        let _ = tx.send(kill(7));

        settle().await;
        assert_eq!(connector.live(), 0);
        assert_eq!(manager.state().raw_event_count(), 0);
        assert_eq!(manager.status(), ConnectionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_matches_leaves_one_socket_and_ignores_the_old_one() {
        let connector = ChannelConnector::accepting(2);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(true));
        let mut rx = manager.subscribe();

        manager.start("A");
        wait_for(&mut rx, |s| s.is_open()).await;
        let old = connector.sender(0);

        manager.start("B");
        // Nothing from A may land after start() returns.
        let _ = old.send(kill(1));
        let state = wait_for(&mut rx, |s| s.is_open() && s.match_id() == Some("B")).await;
        settle().await;

        assert!(state.buffers_empty());
        assert_eq!(manager.state().raw_event_count(), 0);
        assert_eq!(connector.live(), 1);
        assert_eq!(connector.urls().last().unwrap(), "ws://telemetry.test/ws?match=B");

        connector.sender(1).send(kill(2)).unwrap();
        let state = wait_for(&mut rx, |s| s.raw_event_count() == 1).await;
        assert_eq!(state.raw_events().next().unwrap().tick, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_driver_cannot_write_after_stop() {
        let connector = ChannelConnector::accepting(1);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(true));
        let mut rx = manager.subscribe();
        manager.start("A");
        wait_for(&mut rx, |s| s.is_open()).await;
        let generation = {
            use crate::epoch::Generational;
            rx.borrow().generation()
        };

        manager.stop();
        // A write tagged with the old generation is rejected.
        assert!(!publish_if_current(&manager.state_tx, generation, |s| {
            s.set_status(ConnectionStatus::Open)
        }));
        assert_eq!(manager.status(), ConnectionStatus::Idle);
        assert!(manager.match_id().is_none());
        settle().await;
        assert_eq!(connector.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_same_match_twice_is_noop() {
        let connector = ChannelConnector::accepting(2);
        let mut manager = ConnectionManager::with_connector(connector.clone(), settings(true));
        let mut rx = manager.subscribe();
        manager.start("7");
        wait_for(&mut rx, |s| s.is_open()).await;
        manager.start("7");
        settle().await;
        assert_eq!(connector.urls().len(), 1);
        assert!(manager.state().is_open());
    }

    #[tokio::test]
    async fn frame_stream_maps_tungstenite_messages() {
        use futures_util::stream;
        use tokio_tungstenite::tungstenite::Error as WsError;

        let messages: Vec<Result<Message, WsError>> = vec![
            Ok(Message::Ping(vec![].into())),
            Ok(Message::Text("hello".into())),
            Ok(Message::Binary(vec![1, 2].into())),
            Ok(Message::Close(None)),
            Err(WsError::ConnectionClosed),
        ];
        let frames: Vec<_> = frame_stream(stream::iter(messages)).collect().await;
        assert_eq!(
            frames,
            vec![
                Ok(Frame::Text("hello".into())),
                Ok(Frame::Close),
                Err(TransportError::Socket(WsError::ConnectionClosed.to_string())),
            ]
        );
    }
}
