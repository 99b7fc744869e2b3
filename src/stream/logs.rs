//! Container log tailing.

use std::sync::Arc;

use bytes::Bytes;
use futures::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::outbox::{Outbound, Outbox};
use crate::cluster::ClusterClient;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRequest {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
    pub follow: bool,
    pub tail_lines: u32,
}

impl LogRequest {
    pub fn validate(&self) -> Result<()> {
        if self.pod.trim().is_empty() {
            return Err(Error::MissingParameter("pod name"));
        }
        Ok(())
    }
}

/// Streams one container log into an outbound queue, one binary message per
/// read, bytes untouched.
pub struct LogTailer {
    client: Arc<dyn ClusterClient>,
    outbox: Outbox,
    chunk_size: usize,
}

impl LogTailer {
    pub fn new(client: Arc<dyn ClusterClient>, outbox: Outbox, chunk_size: usize) -> Self {
        Self {
            client,
            outbox,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Run until end of stream, a read error, a closed queue or cancellation.
    /// Errors are reported once; client disconnects are not reported.
    pub async fn run(self, request: LogRequest, token: CancellationToken) {
        if let Err(e) = request.validate() {
            let _ = self.outbox.error(&e, &token).await;
            return;
        }

        let opened = tokio::select! {
            biased;
            () = token.cancelled() => return,
            opened = self.client.log_stream(&request) => opened,
        };
        let mut reader = match opened {
            Ok(reader) => reader,
            Err(e) => {
                warn!(pod = %request.pod, "Failed to open log stream: {e}");
                let _ = self.outbox.error(&e, &token).await;
                return;
            }
        };
        debug!(pod = %request.pod, follow = request.follow, "Log stream opened");

        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let read = tokio::select! {
                biased;
                () = token.cancelled() => break,
                read = reader.read(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    debug!(pod = %request.pod, "Log stream ended");
                    break;
                }
                Ok(n) => {
                    let chunk = Outbound::Bytes(Bytes::copy_from_slice(&buf[..n]));
                    if self.outbox.send(chunk, &token).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(pod = %request.pod, "Log stream read failed: {e}");
                    let _ = self.outbox.error(&e, &token).await;
                    break;
                }
            }
        }
    }
}
