//! Per-connection outbound queue.
//!
//! Producers (watch relay, log tailer, exec reader) push [`Outbound`] messages
//! into a bounded channel drained by the connection's single send task. The
//! hand-off blocks when the queue is full, so a slow client throttles its
//! producer instead of growing memory. Every send also watches the
//! connection's cancellation token: a disconnect unblocks a stalled producer
//! immediately.

use std::fmt::Display;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A message bound for the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Structured message, sent as a JSON text frame.
    Json(Value),
    /// Pre-formatted text (terminal output), sent as a text frame.
    Text(String),
    /// Raw bytes from a remote stream, sent as a binary frame.
    Bytes(Bytes),
}

impl Outbound {
    pub fn error(err: impl Display) -> Self {
        Self::Json(json!({ "error": err.to_string() }))
    }
}

/// The queue is gone (client disconnected) or the connection was cancelled.
#[derive(Debug, thiserror::Error)]
#[error("outbound queue closed")]
pub struct Closed;

/// Cloneable producer handle for one connection's outbound queue.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Outbound>,
}

impl Outbox {
    /// Create a queue holding at most `depth` undelivered messages.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }

    /// Hand a message to the send task, waiting for queue space.
    pub async fn send(&self, message: Outbound, token: &CancellationToken) -> Result<(), Closed> {
        tokio::select! {
            biased;
            () = token.cancelled() => Err(Closed),
            sent = self.tx.send(message) => sent.map_err(|_| Closed),
        }
    }

    /// Send a single `{"error": ...}` notification.
    pub async fn error(&self, err: impl Display, token: &CancellationToken) -> Result<(), Closed> {
        self.send(Outbound::error(err), token).await
    }
}
