//! Interactive exec sessions over a message transport.
//!
//! Output read from the remote process goes out as one binary message per
//! read, without batching. Client messages are fed to the process's stdin
//! through a [`MessageReader`], which turns message boundaries into a plain
//! byte stream. The remote process is released on every exit path.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::input::MessageReader;
use super::outbox::{Outbound, Outbox};
use crate::cluster::{ClusterClient, ProcessOutput};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
    pub command: Vec<String>,
    pub tty: bool,
    /// Initial terminal size as `(cols, rows)`, TTY sessions only.
    pub size: Option<(u16, u16)>,
}

impl ExecRequest {
    pub fn validate(&self) -> Result<()> {
        if self.pod.trim().is_empty() {
            return Err(Error::MissingParameter("pod name"));
        }
        if self.command.is_empty() {
            return Err(Error::MissingParameter("command"));
        }
        Ok(())
    }
}

/// Render an error for display in the client's terminal.
fn terminal_error(message: impl std::fmt::Display) -> Outbound {
    Outbound::Text(format!("\x1b[1;31mError: {message}\x1b[0m\r\n"))
}

pub struct ExecBridge {
    client: Arc<dyn ClusterClient>,
    outbox: Outbox,
    chunk_size: usize,
}

impl ExecBridge {
    pub fn new(client: Arc<dyn ClusterClient>, outbox: Outbox, chunk_size: usize) -> Self {
        Self {
            client,
            outbox,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Run one session. `input` carries the client's raw input messages.
    ///
    /// Ends when the process exits, its connection fails, or `token` is
    /// cancelled. A missing parameter is reported as a structured error;
    /// establishment and process failures are written as terminal text.
    pub async fn run(
        self,
        request: ExecRequest,
        input: mpsc::Receiver<Bytes>,
        token: CancellationToken,
    ) {
        if let Err(e) = request.validate() {
            let _ = self.outbox.error(&e, &token).await;
            return;
        }

        let opened = tokio::select! {
            biased;
            () = token.cancelled() => return,
            opened = self.client.exec(&request) => opened,
        };
        let mut process = match opened {
            Ok(process) => process,
            Err(e) => {
                warn!(pod = %request.pod, "Exec failed to start: {e}");
                let _ = self.outbox.send(terminal_error(&e), &token).await;
                return;
            }
        };
        info!(pod = %request.pod, command = ?request.command, tty = request.tty, "Exec session started");

        if request.tty {
            if let Some((cols, rows)) = request.size {
                process.resize(cols, rows).await;
            }
        }

        let stdin = process.take_stdin();
        let mut input_pump = Box::pin(async move {
            let Some(mut stdin) = stdin else {
                return;
            };
            let mut reader = MessageReader::new(input);
            match tokio::io::copy(&mut reader, &mut stdin).await {
                Ok(n) => debug!(bytes = n, "Exec input closed"),
                Err(e) => debug!("Exec stdin write failed: {e}"),
            }
            let _ = stdin.shutdown().await;
        });
        let mut output_pumps = Box::pin(futures::future::join_all(
            process
                .take_outputs()
                .into_iter()
                .map(|output| self.pump_output(output, &token)),
        ));

        let mut input_done = false;
        let outcome = loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break None,
                errors = &mut output_pumps => break Some(errors),
                () = &mut input_pump, if !input_done => input_done = true,
            }
        };
        // Closing stdin lets the remote side deliver its final status.
        drop(input_pump);

        let Some(errors) = outcome else {
            debug!(pod = %request.pod, "Exec session cancelled");
            return;
        };
        if let Some(e) = errors.into_iter().flatten().next() {
            let _ = self.outbox.send(terminal_error(&e), &token).await;
        }

        let failure = tokio::select! {
            biased;
            () = token.cancelled() => None,
            failure = process.finish() => failure,
        };
        if let Some(message) = failure {
            debug!(pod = %request.pod, "Exec process failed: {message}");
            let _ = self.outbox.send(terminal_error(message), &token).await;
        }
        info!(pod = %request.pod, "Exec session ended");
    }

    /// Forward one output stream. Returns the read error, if any.
    async fn pump_output(
        &self,
        mut output: ProcessOutput,
        token: &CancellationToken,
    ) -> Option<std::io::Error> {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            match output.read(&mut buf).await {
                Ok(0) => return None,
                Ok(n) => {
                    let chunk = Outbound::Bytes(Bytes::copy_from_slice(&buf[..n]));
                    if self.outbox.send(chunk, token).await.is_err() {
                        return None;
                    }
                }
                Err(e) => return Some(e),
            }
        }
    }
}
