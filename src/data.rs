//! The DATA body reader: dot-unstuffing, `CRLF.CRLF` termination, and the
//! size cap.
//!
//! The reader consumes lines from the same buffered transport the command
//! loop reads from (so pipelined bytes that arrive after the terminator stay
//! in order for whatever command follows). It is exposed to the backend as a
//! finite, non-restartable, lazily produced sequence of chunks: the backend
//! calls [`DataReader::next_chunk`] until it returns `None`. Whatever the
//! backend did not consume, the engine drains with [`DataReader::drain`]
//! once delivery returns, so the command stream stays aligned regardless of
//! how much of the body the backend actually read.

use tokio::io::AsyncBufRead;

use crate::io_util::read_line_bounded;

/// A single line read while buffering for the DATA terminator became larger
/// than this many bytes with no `\n` in sight. Independent of
/// `max_message_bytes` — this bounds a single line's buffering, not the
/// whole message.
const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub enum DataError {
    /// The running body size exceeded the configured `max_message_bytes`.
    TooLarge,
    /// The transport closed before the `CRLF.CRLF` terminator was seen.
    UnexpectedEof,
    /// The underlying transport failed.
    Io(std::io::Error),
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::TooLarge => write!(f, "message exceeds the configured size limit"),
            DataError::UnexpectedEof => {
                write!(f, "connection closed before end of message data")
            }
            DataError::Io(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for DataError {}

impl From<DataError> for crate::error::Error {
    fn from(e: DataError) -> Self {
        match e {
            DataError::TooLarge => crate::error::Error::SizeExceeded,
            DataError::UnexpectedEof => crate::error::Error::UnexpectedEof,
            DataError::Io(e) => crate::error::Error::Io(e),
        }
    }
}

/// Lets a `Backend::User::send` implementation propagate a `DataReader`
/// failure with `?` and still have the engine report the right reply code:
/// `552` for the size cap, `554` for anything else.
impl From<DataError> for crate::error::DeliveryError {
    fn from(e: DataError) -> Self {
        let text = e.to_string();
        match e {
            DataError::TooLarge => crate::error::DeliveryError::with_code(552, text),
            DataError::UnexpectedEof => crate::error::DeliveryError::with_code(554, text),
            DataError::Io(_) => crate::error::DeliveryError::generic(text),
        }
    }
}

/// Reads the DATA body from `stream`, one dot-unstuffed line at a time,
/// stopping at the `CRLF.CRLF` terminator.
pub struct DataReader<'c, S> {
    stream: &'c mut S,
    max_bytes: Option<usize>,
    delivered_bytes: usize,
    terminated: bool,
}

impl<'c, S> DataReader<'c, S>
where
    S: AsyncBufRead + Unpin,
{
    pub(crate) fn new(stream: &'c mut S, max_bytes: Option<usize>) -> Self {
        Self {
            stream,
            max_bytes,
            delivered_bytes: 0,
            terminated: false,
        }
    }

    /// Returns the next chunk of body bytes (a single unstuffed line,
    /// including its CRLF), or `None` once the terminator has been
    /// consumed.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DataError> {
        if self.terminated {
            return Ok(None);
        }

        let raw = read_line_bounded(self.stream, MAX_LINE_BYTES)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => DataError::UnexpectedEof,
                _ => DataError::Io(e),
            })?;

        let Some(raw) = raw else {
            return Err(DataError::UnexpectedEof);
        };

        let (content, had_crlf) = strip_line_terminator(&raw);

        if had_crlf && content == b"." {
            self.terminated = true;
            return Ok(None);
        }

        let mut out = if content.first() == Some(&b'.') && content.len() > 1 {
            content[1..].to_vec()
        } else {
            content.to_vec()
        };
        if had_crlf {
            out.extend_from_slice(b"\r\n");
        } else {
            out.push(b'\n');
        }

        self.delivered_bytes += out.len();
        if let Some(max) = self.max_bytes {
            if self.delivered_bytes > max {
                self.terminated = true;
                return Err(DataError::TooLarge);
            }
        }

        Ok(Some(out))
    }

    /// Reads the entire body into memory. A convenience for backends that
    /// don't need to stream.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, DataError> {
        let mut body = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Consumes and discards any remaining body bytes up to the terminator.
    ///
    /// Called by the engine after the backend's delivery call returns,
    /// regardless of whether the backend read the whole body, so that the
    /// next command line read starts at the right place.
    pub(crate) async fn drain(&mut self) -> Result<(), DataError> {
        while self.next_chunk().await?.is_some() {}
        Ok(())
    }
}

/// Splits off the line terminator (`\r\n` or bare `\n`) from a line returned
/// by [`read_line_bounded`], reporting whether it was a proper CRLF.
fn strip_line_terminator(raw: &[u8]) -> (&[u8], bool) {
    if let Some(stripped) = raw.strip_suffix(b"\r\n") {
        (stripped, true)
    } else if let Some(stripped) = raw.strip_suffix(b"\n") {
        (stripped, false)
    } else {
        (raw, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn collect(input: &[u8], max_bytes: Option<usize>) -> Result<Vec<u8>, DataError> {
        let mut reader = BufReader::new(input);
        let mut data = DataReader::new(&mut reader, max_bytes);
        data.read_to_end().await
    }

    #[tokio::test]
    async fn empty_body_is_lone_dot() {
        let body = collect(b".\r\n", None).await.unwrap();
        assert_eq!(body, b"");
    }

    #[tokio::test]
    async fn simple_body() {
        let body = collect(b"Hi\r\n.\r\n", None).await.unwrap();
        assert_eq!(body, b"Hi\r\n");
    }

    #[tokio::test]
    async fn dot_unstuffing_strips_one_leading_dot() {
        let body = collect(b"..foo\r\n.\r\n", None).await.unwrap();
        assert_eq!(body, b".foo\r\n");
    }

    #[tokio::test]
    async fn bare_dot_mid_line_is_verbatim() {
        let body = collect(b"a.b\r\n.\r\n", None).await.unwrap();
        assert_eq!(body, b"a.b\r\n");
    }

    #[tokio::test]
    async fn multi_line_body() {
        let body = collect(b"line one\r\nline two\r\n.\r\n", None).await.unwrap();
        assert_eq!(body, b"line one\r\nline two\r\n");
    }

    #[tokio::test]
    async fn missing_terminator_is_unexpected_eof() {
        let err = collect(b"Hi\r\n", None).await.unwrap_err();
        assert!(matches!(err, DataError::UnexpectedEof));
    }

    #[tokio::test]
    async fn oversize_body_errors() {
        let err = collect(b"0123456789\r\n.\r\n", Some(5)).await.unwrap_err();
        assert!(matches!(err, DataError::TooLarge));
    }

    #[tokio::test]
    async fn drain_consumes_remaining_body() {
        let mut reader = BufReader::new(&b"one\r\ntwo\r\n.\r\nafter"[..]);
        let mut data = DataReader::new(&mut reader, None);
        // Backend only reads the first chunk...
        let first = data.next_chunk().await.unwrap();
        assert_eq!(first.unwrap(), b"one\r\n");
        // ...and the engine drains the rest.
        data.drain().await.unwrap();
        // The unrelated trailing bytes (a pipelined next command) are left
        // untouched in the underlying reader.
        use tokio::io::AsyncReadExt;
        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "after");
    }
}
