//! Per-connection cancellation scope.
//!
//! A [`ConnectionScope`] owns the connection's cancellation token and the one
//! subsystem currently running for it. Activating a new subsystem cancels and
//! awaits the previous one first, so two subsystems never overlap on the same
//! connection. Closing (or dropping) the scope cancels whatever is active,
//! which tears down its remote watch, log or exec connection.

use std::fmt;
use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Watch,
    Logs,
    Exec,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Watch => "watch",
            Self::Logs => "logs",
            Self::Exec => "exec",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Active {
    mode: Mode,
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ConnectionScope {
    id: Uuid,
    token: CancellationToken,
    active: Option<Active>,
}

impl ConnectionScope {
    /// New scope cancelled together with `parent` (server shutdown).
    pub fn new(id: Uuid, parent: &CancellationToken) -> Self {
        Self {
            id,
            token: parent.child_token(),
            active: None,
        }
    }

    /// Replace the active subsystem. `start` receives the token the new
    /// subsystem must honour.
    pub async fn activate<F, Fut>(&mut self, mode: Mode, start: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.deactivate().await;
        let token = self.token.child_token();
        let task = tokio::spawn(start(token.clone()));
        debug!(conn = %self.id, %mode, "Subsystem started");
        self.active = Some(Active { mode, token, task });
    }

    /// Cancel the active subsystem and wait for it to release its resources.
    pub async fn deactivate(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
            if let Err(e) = active.task.await {
                warn!(conn = %self.id, mode = %active.mode, "Subsystem task failed: {e}");
            }
        }
    }

    /// Resolves with the mode of the active subsystem once it ends on its
    /// own. Never resolves while nothing is active. Cancel-safe.
    pub async fn finished(&mut self) -> Mode {
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };
        if let Err(e) = (&mut active.task).await {
            warn!(conn = %self.id, mode = %active.mode, "Subsystem task failed: {e}");
        }
        let mode = active.mode;
        self.active = None;
        debug!(conn = %self.id, %mode, "Subsystem ended");
        mode
    }

    /// Cancel everything and wait for the active subsystem to stop.
    pub async fn close(mut self) {
        self.token.cancel();
        self.deactivate().await;
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
