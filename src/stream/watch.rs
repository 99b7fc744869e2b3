//! List-then-watch subscription for one resource kind.
//!
//! A [`WatchSession`] lists the matching objects to establish a baseline,
//! opens a watch from the listing's resource version and runs a producer task
//! that normalizes every notification into a [`ResourceEvent`]. Events are
//! delivered in exactly the order the API server sent them. The session never
//! resubscribes: the first stream failure becomes a single terminal
//! [`WatchMessage::Failed`] and the producer exits.

use std::sync::Arc;

use futures::StreamExt;
use kube::api::{DynamicObject, WatchEvent};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cluster::{ClusterClient, KindRegistry, Selectors, WatchStream};
use crate::error::Result;

/// Events buffered between the producer task and the relay.
const EVENT_BUFFER: usize = 16;

/// What to watch. Fixed for the lifetime of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSpec {
    pub kind: String,
    /// Empty means all namespaces.
    pub namespace: String,
    pub selectors: Selectors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// One normalized change notification, serialized as `{"type", "object"}`.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceEvent {
    #[serde(rename = "type")]
    pub change: ChangeType,
    pub object: DynamicObject,
}

#[derive(Debug)]
pub enum WatchMessage {
    Event(ResourceEvent),
    /// The remote stream ended or failed. Always the last message.
    Failed(String),
}

/// Map a raw notification to a message. Bookmarks carry no object change.
fn normalize(event: WatchEvent<DynamicObject>) -> Option<WatchMessage> {
    let (change, object) = match event {
        WatchEvent::Added(object) => (ChangeType::Added, object),
        WatchEvent::Modified(object) => (ChangeType::Modified, object),
        WatchEvent::Deleted(object) => (ChangeType::Deleted, object),
        WatchEvent::Bookmark(_) => return None,
        WatchEvent::Error(status) => {
            return Some(WatchMessage::Failed(format!(
                "watch failed: {} ({})",
                status.message, status.code
            )))
        }
    };
    Some(WatchMessage::Event(ResourceEvent { change, object }))
}

/// Cloneable handle that stops a session from any task.
#[derive(Clone)]
pub struct StopHandle(CancellationToken);

impl StopHandle {
    pub fn stop(&self) {
        self.0.cancel();
    }
}

pub struct WatchSession {
    token: CancellationToken,
    events: mpsc::Receiver<WatchMessage>,
    task: JoinHandle<()>,
}

impl WatchSession {
    /// Resolve the kind, list, open the watch and spawn the producer.
    ///
    /// An unsupported kind fails before any remote call. A failed list or
    /// watch call fails the start and leaves nothing running. The session is
    /// cancelled together with `parent`.
    pub async fn start(
        client: Arc<dyn ClusterClient>,
        kinds: &KindRegistry,
        spec: &WatchSpec,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let kind = kinds.resolve(&spec.kind)?;
        let listing = client
            .list(kind, &spec.namespace, &spec.selectors)
            .await?;
        let stream = client
            .watch(
                kind,
                &spec.namespace,
                &spec.selectors,
                &listing.resource_version,
            )
            .await?;
        debug!(
            kind = kind.name,
            namespace = %spec.namespace,
            baseline = listing.items.len(),
            resource_version = %listing.resource_version,
            "Watch started"
        );

        let token = parent.child_token();
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let task = tokio::spawn(produce(listing.items, stream, tx, token.clone()));
        Ok(Self {
            token,
            events,
            task,
        })
    }

    /// Next message, or `None` once the session is stopped or exhausted.
    /// Nothing is delivered after [`stop`](Self::stop), even if buffered.
    pub async fn recv(&mut self) -> Option<WatchMessage> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => None,
            message = self.events.recv() => message,
        }
    }

    /// Cancel the watch. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.token.clone())
    }

    /// Stop and wait until the producer has dropped the remote stream.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Err(e) = (&mut self.task).await {
            warn!("Watch producer task failed: {e}");
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Producer loop. Returning drops `stream`, which closes the remote watch.
async fn produce(
    baseline: Vec<DynamicObject>,
    mut stream: WatchStream,
    tx: mpsc::Sender<WatchMessage>,
    token: CancellationToken,
) {
    for object in baseline {
        let event = ResourceEvent {
            change: ChangeType::Added,
            object,
        };
        if !hand_off(&tx, WatchMessage::Event(event), &token).await {
            return;
        }
    }

    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return,
            next = stream.next() => next,
        };
        let message = match next {
            Some(Ok(event)) => match normalize(event) {
                Some(message) => message,
                None => continue,
            },
            Some(Err(e)) => WatchMessage::Failed(e.to_string()),
            None => WatchMessage::Failed("watch stream closed by server".to_string()),
        };
        let terminal = matches!(message, WatchMessage::Failed(_));
        if terminal {
            debug!("Watch ended");
        }
        if !hand_off(&tx, message, &token).await || terminal {
            return;
        }
    }
}

async fn hand_off(
    tx: &mpsc::Sender<WatchMessage>,
    message: WatchMessage,
    token: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        sent = tx.send(message) => sent.is_ok(),
    }
}
