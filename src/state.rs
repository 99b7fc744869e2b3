//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterClient, KindRegistry};
use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Cluster connection; `None` when no kubeconfig could be loaded.
    pub cluster: Option<Arc<dyn ClusterClient>>,
    /// Kind lookup table, built once.
    pub kinds: Arc<KindRegistry>,
    /// Number of open WebSocket stream connections.
    pub active_streams: Arc<AtomicU32>,
    /// Cancelled on server shutdown; every connection scope derives from it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, cluster: Option<Arc<dyn ClusterClient>>) -> Self {
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            cluster,
            kinds: Arc::new(KindRegistry::builtin()),
            active_streams: Arc::new(AtomicU32::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    /// The cluster client, or [`Error::NotConnected`].
    pub fn cluster(&self) -> Result<Arc<dyn ClusterClient>> {
        self.cluster.clone().ok_or(Error::NotConnected)
    }
}
