//! Client messages as a continuous byte stream.
//!
//! A remote process reads its stdin in whatever sizes it likes, while the
//! client delivers input as whole messages. [`MessageReader`] bridges the two:
//! when a read asks for fewer bytes than the next message holds, the remainder
//! is kept in a [`ResidualBuffer`] and served first on the next read. Bytes
//! come out exactly as they went in, in order, with nothing dropped or
//! repeated.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Unread tail of the most recent client message.
#[derive(Debug, Default, PartialEq)]
pub enum ResidualBuffer {
    #[default]
    Empty,
    Holding(Bytes),
}

impl ResidualBuffer {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Start serving `message`. Empty messages leave the buffer empty.
    pub fn hold(&mut self, message: Bytes) {
        debug_assert!(self.is_empty(), "residual bytes would be overwritten");
        if !message.is_empty() {
            *self = Self::Holding(message);
        }
    }

    /// Copy as many held bytes as `buf` has room for and keep the rest.
    /// Returns the number of bytes copied.
    pub fn drain_into(&mut self, buf: &mut ReadBuf<'_>) -> usize {
        let Self::Holding(mut held) = std::mem::take(self) else {
            return 0;
        };
        let n = held.len().min(buf.remaining());
        buf.put_slice(&held.split_to(n));
        if !held.is_empty() {
            *self = Self::Holding(held);
        }
        n
    }
}

/// [`AsyncRead`] over a channel of client messages. Reaches end of stream
/// once the sender side is dropped and every held byte has been read.
pub struct MessageReader {
    rx: mpsc::Receiver<Bytes>,
    residual: ResidualBuffer,
}

impl MessageReader {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            residual: ResidualBuffer::Empty,
        }
    }
}

impl AsyncRead for MessageReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        // A zero-length read must not pull a message off the channel.
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            if !this.residual.is_empty() {
                this.residual.drain_into(buf);
                return Poll::Ready(Ok(()));
            }
            match ready!(this.rx.poll_recv(cx)) {
                Some(message) => this.residual.hold(message),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}
