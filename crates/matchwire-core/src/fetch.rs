// Offline-aware REST fetching.
//
// Every request runs under a fixed timeout and its outcome is classified as
// success, application error (the server answered with a non-2xx status or
// an undecodable body), or server unreachable (timeout or transport
// failure). No retries here; polling callers decide when to try again.

use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::REST_TIMEOUT;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("telemetry server unreachable: {reason}")]
    ServerUnreachable { reason: String },

    #[error("telemetry server returned HTTP {status}: {body}")]
    Application { status: u16, body: String },
}

impl FetchError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, FetchError::ServerUnreachable { .. })
    }

    /// HTTP status for application errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Application { status, .. } => Some(*status),
            FetchError::ServerUnreachable { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OfflineAwareFetcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl Default for OfflineAwareFetcher {
    fn default() -> Self {
        Self::new(REST_TIMEOUT)
    }
}

impl OfflineAwareFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// `GET url` and decode a JSON body into `T`.
    pub async fn get_json<T>(&self, url: &str) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let (status, body) = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| {
            warn!("Undecodable response from {}: {}", url, e);
            FetchError::Application { status, body }
        })
    }

    /// `GET url`, returning the status and body of a 2xx response.
    pub async fn get_text(&self, url: &str) -> Result<(u16, String), FetchError> {
        let request = async {
            let response = self.http.get(url).send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = match tokio::time::timeout(self.timeout, request).await {
            Err(_) => {
                debug!("GET {} timed out after {:?}", url, self.timeout);
                return Err(FetchError::ServerUnreachable {
                    reason: format!("no response within {:?}", self.timeout),
                });
            }
            Ok(Err(e)) => {
                debug!("GET {} failed at transport level: {}", url, e);
                return Err(FetchError::ServerUnreachable {
                    reason: e.to_string(),
                });
            }
            Ok(Ok(parts)) => parts,
        };

        if !status.is_success() {
            return Err(FetchError::Application {
                status: status.as_u16(),
                body,
            });
        }
        Ok((status.as_u16(), body))
    }
}
