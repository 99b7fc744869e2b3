//! Forwards one [`WatchSession`] into a connection's outbound queue.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::outbox::{Outbound, Outbox};
use super::watch::{WatchMessage, WatchSession, WatchSpec};
use crate::cluster::{ClusterClient, KindRegistry};

pub struct EventRelay {
    outbox: Outbox,
    token: CancellationToken,
}

impl EventRelay {
    pub fn new(outbox: Outbox, token: CancellationToken) -> Self {
        Self { outbox, token }
    }

    /// Start a session for `spec` and forward it until the watch ends, the
    /// client goes away or the token is cancelled. A start failure is
    /// reported once.
    pub async fn run(self, client: Arc<dyn ClusterClient>, kinds: &KindRegistry, spec: WatchSpec) {
        let started = tokio::select! {
            biased;
            () = self.token.cancelled() => return,
            started = WatchSession::start(client, kinds, &spec, &self.token) => started,
        };
        match started {
            Ok(session) => self.forward(session).await,
            Err(e) => {
                warn!(kind = %spec.kind, "Watch failed to start: {e}");
                let _ = self.outbox.error(&e, &self.token).await;
            }
        }
    }

    async fn forward(&self, mut session: WatchSession) {
        while let Some(message) = session.recv().await {
            let (outbound, terminal) = match message {
                WatchMessage::Event(event) => encode(&event),
                WatchMessage::Failed(reason) => {
                    warn!("Watch terminated: {reason}");
                    (Outbound::error(reason), true)
                }
            };
            if self.outbox.send(outbound, &self.token).await.is_err() {
                debug!("Outbound queue closed, stopping watch");
                break;
            }
            if terminal {
                break;
            }
        }
        session.shutdown().await;
    }
}

/// Encode one event as a JSON frame. An event that cannot be encoded ends the
/// watch with a single error frame instead of being skipped.
fn encode<T: Serialize>(event: &T) -> (Outbound, bool) {
    match serde_json::to_value(event) {
        Ok(value) => (Outbound::Json(value), false),
        Err(e) => {
            warn!("Watch event could not be encoded: {e}");
            (Outbound::error(format!("failed to encode watch event: {e}")), true)
        }
    }
}
