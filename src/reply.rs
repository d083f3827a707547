//! Formats and sends multi-line SMTP replies.
//!
//! For `n` lines, lines `1..n-1` are sent as `CODE-TEXT\r\n` and the final
//! line as `CODE TEXT\r\n`, matching the RFC 5321 continuation convention.
//! Every call flushes and refreshes the connection's idle deadline.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::io_util::IdleTimer;

/// Writes a reply with the given three-digit code and one or more text
/// lines, then flushes.
pub(crate) async fn write_reply<W>(
    writer: &mut W,
    idle: &IdleTimer,
    code: u16,
    lines: &[&str],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let lines: &[&str] = if lines.is_empty() { &[""] } else { lines };

    idle.guard(async {
        let (last, head) = lines.split_last().expect("lines is never empty");
        for line in head {
            writer
                .write_all(format!("{code}-{line}\r\n").as_bytes())
                .await?;
        }
        writer
            .write_all(format!("{code} {last}\r\n").as_bytes())
            .await?;
        writer.flush().await
    })
    .await
}
