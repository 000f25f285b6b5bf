// Library root: real-time match telemetry client.
//
// Discovery and snapshot fetching go over REST; live tracking of a single
// match goes over a WebSocket owned by `connection::ConnectionManager`.
// Everything a consumer reads comes out of watch channels as plain values.

pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod discovery;
pub mod endpoint;
pub mod feed;
pub mod fetch;
pub mod protocol;
pub mod router;
pub mod snapshot;
pub mod state;
pub mod sync;

mod epoch;

pub use config::TelemetryConfig;
pub use connection::ConnectionManager;
pub use discovery::{DiscoveryPoller, MatchDiscovery};
pub use snapshot::{SnapshotClient, SnapshotFetcher};
pub use state::{ConnectionStatus, TelemetryState};
