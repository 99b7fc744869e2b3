//! Streaming subsystems bridged onto a client connection.
//!
//! Each connection runs at most one of them at a time: a resource watch
//! ([`relay::EventRelay`] over a [`watch::WatchSession`]), a log tail
//! ([`logs::LogTailer`]) or an interactive exec session
//! ([`exec::ExecBridge`]). All of them produce into the connection's
//! [`outbox::Outbox`] and stop when the connection's token is cancelled.

pub mod exec;
pub mod input;
pub mod logs;
pub mod outbox;
pub mod relay;
pub mod watch;

pub use exec::{ExecBridge, ExecRequest};
pub use logs::{LogRequest, LogTailer};
pub use outbox::{Outbound, Outbox};
pub use relay::EventRelay;
pub use watch::{WatchSession, WatchSpec};
