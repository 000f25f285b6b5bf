// One-shot match snapshot fetch over REST.
//
// Used when a live socket is not needed. A 404 from the single-match
// endpoint is reported as `NotFound`, distinct from other HTTP errors.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::endpoint::{self, EndpointError};
use crate::epoch::{publish_if_current, Generational};
use crate::fetch::{FetchError, OfflineAwareFetcher};
use crate::protocol::MatchSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("match {match_id} not found")]
    NotFound { match_id: String },

    #[error("telemetry server returned HTTP {status}: {body}")]
    Application { status: u16, body: String },

    #[error("telemetry server unreachable: {reason}")]
    ServerUnreachable { reason: String },

    /// The request URL could not be built; nothing was sent.
    #[error(transparent)]
    InvalidUrl(#[from] EndpointError),
}

impl SnapshotError {
    fn from_fetch(err: FetchError, match_id: &str) -> Self {
        match err {
            FetchError::Application { status: 404, .. } => SnapshotError::NotFound {
                match_id: match_id.to_string(),
            },
            FetchError::Application { status, body } => SnapshotError::Application { status, body },
            FetchError::ServerUnreachable { reason } => SnapshotError::ServerUnreachable { reason },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SnapshotError::NotFound { .. })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SnapshotClient {
    fetcher: OfflineAwareFetcher,
    http_base: String,
}

impl SnapshotClient {
    pub fn new(fetcher: OfflineAwareFetcher, http_base: impl Into<String>) -> Self {
        Self {
            fetcher,
            http_base: http_base.into(),
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(
            OfflineAwareFetcher::new(config.request_timeout),
            config.http_url(),
        )
    }

    pub async fn fetch(&self, match_id: &str) -> Result<MatchSnapshot, SnapshotError> {
        let url = endpoint::match_url(&self.http_base, match_id)?;
        self.fetcher
            .get_json(&url)
            .await
            .map_err(|e| SnapshotError::from_fetch(e, match_id))
    }
}

// ---------------------------------------------------------------------------
// Activation handle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotState {
    pub match_id: Option<String>,
    pub snapshot: Option<MatchSnapshot>,
    pub loading: bool,
    pub error: Option<SnapshotError>,
    generation: u64,
}

impl Generational for SnapshotState {
    fn generation(&self) -> u64 {
        self.generation
    }
}

/// Fetches a match once per activation or identifier change; no polling.
pub struct SnapshotFetcher {
    client: Arc<SnapshotClient>,
    state_tx: watch::Sender<SnapshotState>,
    task: Option<JoinHandle<()>>,
}

impl SnapshotFetcher {
    pub fn new(client: SnapshotClient) -> Self {
        let (state_tx, _rx) = watch::channel(SnapshotState::default());
        Self {
            client: Arc::new(client),
            state_tx,
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SnapshotState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SnapshotState {
        self.state_tx.borrow().clone()
    }

    /// Fetch `match_id`. No-op if it is already the active identifier.
    pub fn activate(&mut self, match_id: impl Into<String>) {
        let match_id = match_id.into();
        if self.state_tx.borrow().match_id.as_deref() == Some(match_id.as_str()) {
            debug!("Snapshot fetcher already active for match {}", match_id);
            return;
        }
        self.cancel_in_flight();
        self.state_tx.send_modify(|s| {
            let generation = s.generation + 1;
            *s = SnapshotState {
                match_id: Some(match_id.clone()),
                generation,
                ..Default::default()
            };
        });
        self.spawn_fetch(match_id);
    }

    /// Re-fetch the active identifier, keeping the last snapshot visible
    /// until the new one arrives.
    pub fn refetch(&mut self) {
        let Some(match_id) = self.state_tx.borrow().match_id.clone() else {
            debug!("Refetch requested with no active match");
            return;
        };
        self.cancel_in_flight();
        self.state_tx.send_modify(|s| {
            s.generation += 1;
        });
        self.spawn_fetch(match_id);
    }

    /// Cancel any in-flight request and forget the identifier.
    pub fn deactivate(&mut self) {
        self.cancel_in_flight();
        self.state_tx.send_modify(|s| {
            let generation = s.generation + 1;
            *s = SnapshotState {
                generation,
                ..Default::default()
            };
        });
    }

    fn cancel_in_flight(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn spawn_fetch(&mut self, match_id: String) {
        let generation = self.state_tx.borrow().generation;
        let client = Arc::clone(&self.client);
        let state_tx = self.state_tx.clone();

        publish_if_current(&state_tx, generation, |s| {
            s.loading = true;
            true
        });

        info!("Fetching snapshot for match {}", match_id);
        self.task = Some(tokio::spawn(async move {
            let result = client.fetch(&match_id).await;
            if let Err(e) = &result {
                warn!("Snapshot fetch for match {} failed: {}", match_id, e);
            }
            publish_if_current(&state_tx, generation, |s| {
                s.loading = false;
                match result {
                    Ok(snapshot) => {
                        s.snapshot = Some(snapshot);
                        s.error = None;
                    }
                    Err(err) => s.error = Some(err),
                }
                true
            });
        }));
    }
}

impl Drop for SnapshotFetcher {
    fn drop(&mut self) {
        self.cancel_in_flight();
    }
}
