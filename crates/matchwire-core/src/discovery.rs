// Active-match discovery.
//
// `MatchDiscovery` performs one list fetch. `DiscoveryPoller` repeats it on
// a fixed interval while active and publishes the result through a watch
// channel, separating "server offline" from application errors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::endpoint::{self, EndpointError};
use crate::epoch::{publish_if_current, Generational};
use crate::fetch::{FetchError, OfflineAwareFetcher};
use crate::protocol::{ActiveMatchInfo, MatchListResponse};

// ---------------------------------------------------------------------------
// One-shot list fetch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MatchDiscovery {
    fetcher: OfflineAwareFetcher,
    url: String,
}

impl MatchDiscovery {
    pub fn new(fetcher: OfflineAwareFetcher, http_base: &str) -> Result<Self, EndpointError> {
        Ok(Self {
            fetcher,
            url: endpoint::matches_url(http_base)?,
        })
    }

    pub fn from_config(config: &TelemetryConfig) -> Result<Self, EndpointError> {
        Self::new(
            OfflineAwareFetcher::new(config.request_timeout),
            &config.http_url(),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<Vec<ActiveMatchInfo>, FetchError> {
        let response: MatchListResponse = self.fetcher.get_json(&self.url).await?;
        Ok(response.matches)
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryState {
    pub matches: Vec<ActiveMatchInfo>,
    pub loading: bool,
    /// Set only for application errors.
    pub error: Option<String>,
    /// Set when the server is unreachable; cleared by the next success.
    pub server_offline: bool,
    pub active: bool,
    generation: u64,
}

impl Generational for DiscoveryState {
    fn generation(&self) -> u64 {
        self.generation
    }
}

impl DiscoveryState {
    fn apply(&mut self, result: Result<Vec<ActiveMatchInfo>, FetchError>) {
        self.loading = false;
        match result {
            Ok(matches) => {
                self.matches = matches;
                self.error = None;
                self.server_offline = false;
            }
            Err(FetchError::ServerUnreachable { .. }) => {
                self.error = None;
                self.server_offline = true;
            }
            Err(err @ FetchError::Application { .. }) => {
                self.error = Some(err.to_string());
            }
        }
    }
}

pub struct DiscoveryPoller {
    discovery: Arc<MatchDiscovery>,
    interval: Duration,
    state_tx: watch::Sender<DiscoveryState>,
    refresh: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl DiscoveryPoller {
    pub fn new(discovery: MatchDiscovery, interval: Duration) -> Self {
        let (state_tx, _rx) = watch::channel(DiscoveryState::default());
        Self {
            discovery: Arc::new(discovery),
            interval,
            state_tx,
            refresh: Arc::new(Notify::new()),
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DiscoveryState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> DiscoveryState {
        self.state_tx.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Fetch immediately, then every `interval` until [`stop`](Self::stop).
    /// Calling `start` on an active poller does nothing.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let mut generation = 0;
        self.state_tx.send_modify(|s| {
            generation = s.generation + 1;
            s.generation = generation;
            s.active = true;
        });

        let discovery = Arc::clone(&self.discovery);
        let refresh = Arc::clone(&self.refresh);
        let state_tx = self.state_tx.clone();
        let interval = self.interval;
        info!("Discovery polling started ({:?} interval)", interval);
        self.task = Some(tokio::spawn(async move {
            poll_loop(discovery, interval, refresh, state_tx, generation).await;
        }));
    }

    /// Request an immediate re-fetch. Ignored while inactive.
    pub fn refresh(&self) {
        if self.task.is_some() {
            self.refresh.notify_one();
        }
    }

    /// Cancel the timer and any in-flight request. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        self.state_tx.send_modify(|s| {
            s.generation += 1;
            s.active = false;
            s.loading = false;
        });
        info!("Discovery polling stopped");
    }
}

impl Drop for DiscoveryPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_loop(
    discovery: Arc<MatchDiscovery>,
    interval: Duration,
    refresh: Arc<Notify>,
    state_tx: watch::Sender<DiscoveryState>,
    generation: u64,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // The first tick completes immediately.
            _ = ticker.tick() => {}
            _ = refresh.notified() => {
                debug!("Manual discovery refresh");
                ticker.reset();
            }
        }

        if !publish_if_current(&state_tx, generation, |s| {
            s.loading = true;
            true
        }) {
            return;
        }

        let result = discovery.fetch().await;
        match &result {
            Ok(matches) => debug!("Discovered {} active matches", matches.len()),
            Err(e) => warn!("Discovery poll failed: {}", e),
        }

        if !publish_if_current(&state_tx, generation, |s| {
            s.apply(result);
            true
        }) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str) -> ActiveMatchInfo {
        ActiveMatchInfo {
            match_id: id.into(),
            ..Default::default()
        }
    }

    #[test]
    fn offline_flag_set_on_unreachable_and_cleared_on_success() {
        let mut state = DiscoveryState::default();
        state.apply(Ok(vec![info("1")]));
        state.apply(Err(FetchError::ServerUnreachable {
            reason: "timeout".into(),
        }));
        assert!(state.server_offline);
        assert!(state.error.is_none());
        // Last known list survives an outage.
        assert_eq!(state.matches.len(), 1);

        state.apply(Ok(vec![]));
        assert!(!state.server_offline);
        assert!(state.matches.is_empty());
    }

    #[test]
    fn application_error_sets_message_only() {
        let mut state = DiscoveryState {
            loading: true,
            ..Default::default()
        };
        state.apply(Err(FetchError::Application {
            status: 503,
            body: "maintenance".into(),
        }));
        assert!(!state.loading);
        assert!(!state.server_offline);
        assert!(state.error.as_deref().unwrap().contains("503"));
    }

    #[test]
    fn discovery_url_derives_from_config() {
        let config = TelemetryConfig::default().with_server_url("wss://live.example.gg");
        let discovery = MatchDiscovery::from_config(&config).unwrap();
        assert_eq!(discovery.url(), "https://live.example.gg/api/matches");
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_marks_inactive() {
        let config = TelemetryConfig::default().with_server_url("ws://127.0.0.1:9");
        let mut poller =
            DiscoveryPoller::new(MatchDiscovery::from_config(&config).unwrap(), config.poll_interval);
        poller.start();
        assert!(poller.is_active());
        assert!(poller.state().active);
        poller.stop();
        poller.stop();
        assert!(!poller.is_active());
        let state = poller.state();
        assert!(!state.active);
        assert!(!state.loading);
    }
}
