//! The connection's single owning transport slot, and the optional debug tee
//! decorator that observes bytes flowing over it.
//!
//! STARTTLS replaces the transport exactly once, in place: the buffered
//! reader/writer built on top of it is torn down and rebuilt on the new,
//! encrypted stream. To make that swap a simple assignment rather than a
//! generic-parameter juggling act, every transport — plaintext TCP, the
//! rustls-wrapped stream after a handshake, and either one further wrapped
//! by the debug tee — is boxed behind one trait object.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Any stream the engine can drive: readable, writable, sendable across the
/// task boundary, and safe to store behind a `Box` (no internal pinning
/// requirements of its own).
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// The connection's transport, boxed so STARTTLS can replace it without
/// changing the `Connection`'s type.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Observes a copy of every byte that crosses a transport, in both
/// directions.
///
/// Implementations receive concurrent calls from every open connection and
/// are responsible for their own synchronization — the engine does not
/// serialize access on the caller's behalf, matching the "must be safe for
/// concurrent append" requirement on the shared debug sink.
pub trait DebugSink: Send + Sync {
    fn write_bytes(&self, bytes: &[u8]);
}

/// Wraps a transport so every read and write is also handed to a
/// [`DebugSink`], without otherwise changing the transport's behavior.
pub struct Tee<T> {
    inner: T,
    sink: Arc<dyn DebugSink>,
}

impl<T> Tee<T> {
    pub fn new(inner: T, sink: Arc<dyn DebugSink>) -> Self {
        Self { inner, sink }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Tee<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let res = Pin::new(&mut this.inner).poll_read(cx, buf);
        if res.is_ready() {
            let after = buf.filled().len();
            if after > before {
                this.sink.write_bytes(&buf.filled()[before..after]);
            }
        }
        res
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Tee<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_write(cx, data);
        if let Poll::Ready(Ok(n)) = &res {
            this.sink.write_bytes(&data[..*n]);
        }
        res
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// A [`DebugSink`] that appends to an in-memory buffer, used by tests that
/// need to assert on the tee's observed bytes.
#[cfg(test)]
pub(crate) struct VecDebugSink(std::sync::Mutex<Vec<u8>>);

#[cfg(test)]
impl VecDebugSink {
    pub(crate) fn new() -> Self {
        Self(std::sync::Mutex::new(Vec::new()))
    }

    pub(crate) fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl DebugSink for VecDebugSink {
    fn write_bytes(&self, bytes: &[u8]) {
        self.0.lock().unwrap().extend_from_slice(bytes);
    }
}
