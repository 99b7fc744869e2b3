//! WebSocket transport for the three stream modes.
//!
//! ## Routes
//!
//! | Route           | Mode  | Query                                                          |
//! |-----------------|-------|----------------------------------------------------------------|
//! | `/ws/resources` | watch | `type`/`kind`, `namespace`, `labelSelector`, `fieldSelector`   |
//! | `/ws/logs`      | logs  | `namespace`, `pod`, `container`, `follow`, `tailLines`         |
//! | `/ws/exec`      | exec  | `namespace`, `pod`, `container`, `command`*, `tty`, `cols`, `rows` |
//!
//! *`command` may repeat to build an argument vector.
//!
//! ## Frames (server → client)
//!
//! - watch: JSON text `{"type": "ADDED"|"MODIFIED"|"DELETED", "object": {...}}`
//! - logs, exec: binary frames with the exact bytes read from the remote stream
//! - errors: JSON text `{"error": "..."}`; exec establishment and process
//!   failures are ANSI-formatted text meant for the terminal
//!
//! ## Frames (client → server)
//!
//! - exec: text or binary frames, forwarded to stdin as raw bytes
//! - watch: `{"type": "watch", "kind", "namespace", "labelSelector",
//!   "fieldSelector"}` replaces the active watch
//!
//! Log and exec connections close once their stream ends. A watch connection
//! stays open after its watch ends so the client can subscribe again.
//!
//! Browser clients must set `binaryType = "arraybuffer"` on the socket to
//! receive log and exec frames as raw bytes rather than `Blob`s.
//!
//! Exec input the remote process has not consumed yet is held per connection
//! up to `server.max_pending_input` bytes. Past that the session ends with
//! `{"error": "exec input buffer full"}`. The socket keeps being read while
//! input is pending, so a client disconnect always tears the session down.

pub mod scope;

use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cluster::{ClusterClient, Selectors};
use crate::config::StreamsConfig;
use crate::stream::{
    EventRelay, ExecBridge, ExecRequest, LogRequest, LogTailer, Outbound, Outbox, WatchSpec,
};
use crate::AppState;
use scope::{ConnectionScope, Mode};

/// Client input messages buffered ahead of the exec process's stdin.
const INPUT_BUFFER: usize = 64;

/// How long queued frames may take to flush after the connection loop ends.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a connection-level notice may wait for outbound queue space.
const NOTICE_TIMEOUT: Duration = Duration::from_secs(1);

/// Query parameters for `/ws/resources`, also the body of a `watch` control
/// message.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchQuery {
    #[serde(alias = "type")]
    pub kind: Option<String>,
    pub namespace: Option<String>,
    #[serde(default)]
    pub label_selector: String,
    #[serde(default)]
    pub field_selector: String,
}

impl WatchQuery {
    fn into_spec(self, defaults: &StreamsConfig) -> WatchSpec {
        WatchSpec {
            kind: self.kind.unwrap_or_else(|| "pods".to_string()),
            namespace: self
                .namespace
                .unwrap_or_else(|| defaults.default_namespace.clone()),
            selectors: Selectors {
                label: self.label_selector,
                field: self.field_selector,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    pub namespace: Option<String>,
    #[serde(default)]
    pub pod: String,
    pub container: Option<String>,
    pub follow: Option<bool>,
    pub tail_lines: Option<u32>,
}

impl LogsQuery {
    fn into_request(self, defaults: &StreamsConfig) -> LogRequest {
        LogRequest {
            namespace: self
                .namespace
                .unwrap_or_else(|| defaults.default_namespace.clone()),
            pod: self.pod,
            container: self.container.filter(|c| !c.is_empty()),
            follow: self.follow.unwrap_or(defaults.log_follow),
            tail_lines: self.tail_lines.unwrap_or(defaults.log_tail_lines),
        }
    }
}

/// Build an exec request from raw query pairs (`command` may repeat).
fn exec_request(pairs: Vec<(String, String)>, defaults: &StreamsConfig) -> ExecRequest {
    let mut request = ExecRequest {
        namespace: defaults.default_namespace.clone(),
        pod: String::new(),
        container: None,
        command: Vec::new(),
        tty: true,
        size: None,
    };
    let (mut cols, mut rows) = (None, None);
    for (key, value) in pairs {
        match key.as_str() {
            "namespace" => request.namespace = value,
            "pod" => request.pod = value,
            "container" if !value.is_empty() => request.container = Some(value),
            "command" if !value.is_empty() => request.command.push(value),
            "tty" => request.tty = !matches!(value.as_str(), "false" | "0"),
            "cols" => cols = value.parse::<u16>().ok(),
            "rows" => rows = value.parse::<u16>().ok(),
            _ => {}
        }
    }
    if request.command.is_empty() {
        request.command.push(defaults.exec_command.clone());
    }
    request.size = cols.zip(rows);
    request
}

/// Mode requested at upgrade time, with its parameters.
enum Start {
    Watch(WatchSpec),
    Logs(LogRequest),
    Exec(ExecRequest),
}

impl Start {
    fn mode(&self) -> Mode {
        match self {
            Self::Watch(_) => Mode::Watch,
            Self::Logs(_) => Mode::Logs,
            Self::Exec(_) => Mode::Exec,
        }
    }
}

/// Control messages accepted on a watch connection.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Control {
    Watch(WatchQuery),
}

/// `GET /ws/resources` — watch mode.
pub async fn watch_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let spec = query.into_spec(&state.config.streams);
    ws.on_upgrade(move |socket| handle_socket(socket, state, Start::Watch(spec)))
}

/// `GET /ws/logs` — log mode.
pub async fn logs_upgrade(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let request = query.into_request(&state.config.streams);
    ws.on_upgrade(move |socket| handle_socket(socket, state, Start::Logs(request)))
}

/// `GET /ws/exec` — exec mode.
pub async fn exec_upgrade(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
    ws: WebSocketUpgrade,
) -> Response {
    let request = exec_request(pairs, &state.config.streams);
    ws.on_upgrade(move |socket| handle_socket(socket, state, Start::Exec(request)))
}

/// Client input read from the socket but not yet taken by the exec session.
struct PendingInput {
    frames: VecDeque<Bytes>,
    bytes: usize,
    limit: usize,
}

impl PendingInput {
    fn new(limit: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            bytes: 0,
            limit,
        }
    }

    /// Queue `frame`. Returns `false` when the queue now holds more than
    /// `limit` bytes.
    #[must_use]
    fn push(&mut self, frame: Bytes) -> bool {
        self.bytes += frame.len();
        self.frames.push_back(frame);
        self.bytes <= self.limit
    }

    fn front(&self) -> Option<&Bytes> {
        self.frames.front()
    }

    fn pop(&mut self) {
        if let Some(frame) = self.frames.pop_front() {
            self.bytes -= frame.len();
        }
    }

    fn clear(&mut self) {
        self.frames.clear();
        self.bytes = 0;
    }

    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Hand the oldest pending frame to the exec session. Returns `false` once
/// the session no longer takes input. Cancelling this leaves `next` unsent.
async fn feed(input: Option<&mpsc::Sender<Bytes>>, next: Option<&Bytes>) -> bool {
    match (input, next) {
        (Some(tx), Some(frame)) => tx.send(frame.clone()).await.is_ok(),
        _ => false,
    }
}

/// Queue an error notice for the client without stalling the connection
/// loop behind a client that stopped reading.
async fn notify(outbox: &Outbox, message: impl Display, token: &CancellationToken) {
    if tokio::time::timeout(NOTICE_TIMEOUT, outbox.error(message, token))
        .await
        .is_err()
    {
        debug!("Dropped notice, client is not reading");
    }
}

/// Spawn the subsystem for `start` in `scope`. Returns the stdin feed for
/// exec sessions.
async fn launch(
    scope: &mut ConnectionScope,
    state: &AppState,
    client: &Arc<dyn ClusterClient>,
    outbox: &Outbox,
    start: Start,
) -> Option<mpsc::Sender<Bytes>> {
    let client = Arc::clone(client);
    let outbox = outbox.clone();
    let chunk_size = state.config.server.read_chunk_size;
    match start {
        Start::Watch(spec) => {
            let kinds = Arc::clone(&state.kinds);
            scope
                .activate(Mode::Watch, move |token| async move {
                    EventRelay::new(outbox, token)
                        .run(client, &kinds, spec)
                        .await;
                })
                .await;
            None
        }
        Start::Logs(request) => {
            scope
                .activate(Mode::Logs, move |token| {
                    LogTailer::new(client, outbox, chunk_size).run(request, token)
                })
                .await;
            None
        }
        Start::Exec(request) => {
            let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
            scope
                .activate(Mode::Exec, move |token| {
                    ExecBridge::new(client, outbox, chunk_size).run(request, input_rx, token)
                })
                .await;
            Some(input_tx)
        }
    }
}

/// Main WebSocket event loop.
///
/// Splits the socket into a sink and a stream. Outgoing frames are funneled
/// through the connection's [`Outbox`] so the active subsystem can send
/// without holding the socket. The loop reads client frames, feeds pending
/// exec input and watches for the subsystem ending. No branch awaits the
/// remote side, so a closed socket is noticed promptly. On exit the scope is
/// closed, which tears down every remote resource the connection opened.
async fn handle_socket(socket: WebSocket, state: AppState, start: Start) {
    let conn_id = Uuid::new_v4();
    let initial_mode = start.mode();
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbox, mut rx) = Outbox::channel(state.config.server.outbound_queue_depth);

    // Task: forward queued messages to the WebSocket sink, then close it
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let frame = match message {
                Outbound::Json(value) => match serde_json::to_string(&value) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        error!("WS send: failed to serialize message: {e}");
                        continue;
                    }
                },
                Outbound::Text(text) => Message::Text(text.into()),
                Outbound::Bytes(bytes) => Message::Binary(bytes),
            };
            if ws_sink.send(frame).await.is_err() {
                return;
            }
        }
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    let streams = state.active_streams.fetch_add(1, Ordering::Relaxed) + 1;
    info!(conn = %conn_id, mode = %initial_mode, streams, "WebSocket connected");

    let mut scope = ConnectionScope::new(conn_id, &state.shutdown);

    match state.cluster() {
        Ok(client) => {
            let mut input = launch(&mut scope, &state, &client, &outbox, start).await;
            let mut pending = PendingInput::new(state.config.server.max_pending_input);

            loop {
                tokio::select! {
                    frame = ws_stream.next() => {
                        let Some(Ok(frame)) = frame else { break };
                        let data = match frame {
                            Message::Text(text) if input.is_some() => Some(Bytes::from(text)),
                            Message::Binary(data) if input.is_some() => Some(data),
                            Message::Text(text) => {
                                if initial_mode == Mode::Watch {
                                    match serde_json::from_str::<Control>(&text) {
                                        Ok(Control::Watch(query)) => {
                                            let spec = query.into_spec(&state.config.streams);
                                            debug!(conn = %conn_id, kind = %spec.kind, "Re-targeting watch");
                                            input = launch(
                                                &mut scope,
                                                &state,
                                                &client,
                                                &outbox,
                                                Start::Watch(spec),
                                            )
                                            .await;
                                        }
                                        Err(e) => {
                                            notify(
                                                &outbox,
                                                format!("invalid control message: {e}"),
                                                &state.shutdown,
                                            )
                                            .await;
                                        }
                                    }
                                }
                                None
                            }
                            Message::Close(_) => break,
                            _ => None,
                        };
                        if let Some(data) = data {
                            if !pending.push(data) {
                                warn!(conn = %conn_id, bytes = pending.bytes, "Exec input not consumed, closing");
                                notify(&outbox, "exec input buffer full", &state.shutdown).await;
                                break;
                            }
                        }
                    }
                    delivered = feed(input.as_ref(), pending.front()), if !pending.is_empty() => {
                        if delivered {
                            pending.pop();
                        } else {
                            pending.clear();
                        }
                    }
                    () = state.shutdown.cancelled() => break,
                    mode = scope.finished() => {
                        if mode == Mode::Watch {
                            debug!(conn = %conn_id, "Watch ended, connection stays open");
                        } else {
                            break;
                        }
                    }
                }
            }
            drop(input);
        }
        Err(e) => {
            warn!(conn = %conn_id, "Rejecting stream: {e}");
            let _ = outbox.error(e, &state.shutdown).await;
        }
    }

    scope.close().await;
    drop(outbox);
    if tokio::time::timeout(FLUSH_TIMEOUT, send_task).await.is_err() {
        debug!(conn = %conn_id, "Client did not drain final frames");
    }

    let streams = state.active_streams.fetch_sub(1, Ordering::Relaxed) - 1;
    info!(conn = %conn_id, streams, "WebSocket disconnected");
}
