//! Shared low-level I/O helpers used by the Line Reader and the Data Reader.
//!
//! Both components read CRLF-delimited lines from a buffered transport, and
//! both need to refuse to buffer an unbounded amount of data before finding
//! the delimiter (this is the "without unbounded buffering" requirement that
//! makes the Data Reader the hard part of this crate). `read_line_bounded`
//! scans whatever the inner reader already has filled via `fill_buf`/`consume`
//! instead of growing a `Vec` one `read_until` call at a time, so a slow-loris
//! client sending a multi-gigabyte line with no `\n` is bounded at `limit`
//! bytes rather than at available memory.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Reads one line, including its trailing `\n` (and `\r` if present), from
/// `reader`, refusing to buffer more than `limit` bytes while searching for
/// the delimiter.
///
/// Returns `Ok(None)` on a clean EOF with no bytes read at all. Returns
/// `Err(UnexpectedEof)` if the transport closes mid-line (bytes were read but
/// no `\n` was found before EOF).
pub(crate) async fn read_line_bounded<R>(reader: &mut R, limit: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return if line.is_empty() {
                Ok(None)
            } else {
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-line",
                ))
            };
        }

        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            if line.len() + pos + 1 > limit {
                reader.consume(pos + 1);
                return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
            }
            line.extend_from_slice(&available[..=pos]);
            reader.consume(pos + 1);
            return Ok(Some(line));
        }

        let used = available.len();
        if line.len() + used > limit {
            reader.consume(used);
            return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
        }
        line.extend_from_slice(available);
        reader.consume(used);
    }
}

/// Guards a future with the connection's idle deadline, refreshing the
/// deadline on every call (a fresh `timeout` is armed per call, which is
/// exactly "refresh on every read/write").
#[derive(Debug, Clone, Copy)]
pub(crate) struct IdleTimer {
    duration: Option<Duration>,
}

impl IdleTimer {
    pub(crate) fn new(duration: Option<Duration>) -> Self {
        Self { duration }
    }

    pub(crate) async fn guard<F, T>(&self, fut: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        match self.duration {
            Some(d) => tokio::time::timeout(d, fut).await.map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, "idle timeout exceeded")
            })?,
            None => fut.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_crlf_line() {
        let mut r = BufReader::new(&b"HELO there\r\nMORE"[..]);
        let line = read_line_bounded(&mut r, 1024).await.unwrap().unwrap();
        assert_eq!(line, b"HELO there\r\n");
    }

    #[tokio::test]
    async fn empty_eof_is_none() {
        let mut r = BufReader::new(&b""[..]);
        let line = read_line_bounded(&mut r, 1024).await.unwrap();
        assert!(line.is_none());
    }

    #[tokio::test]
    async fn mid_line_eof_errors() {
        let mut r = BufReader::new(&b"no terminator"[..]);
        let err = read_line_bounded(&mut r, 1024).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn overlong_line_is_bounded() {
        let data = vec![b'a'; 4096];
        let mut r = BufReader::new(&data[..]);
        let err = read_line_bounded(&mut r, 1024).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn idle_timer_without_deadline_never_times_out() {
        let timer = IdleTimer::new(None);
        let result = timer.guard(async { Ok(42) }).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn idle_timer_trips_on_slow_future() {
        let timer = IdleTimer::new(Some(Duration::from_millis(10)));
        let result = timer
            .guard(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }
}
