use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Longest inbound command accepted by the server, excluding the line ending.
pub const MAX_COMMAND_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine {
    Text(String),
    TooLong,
}

/// Reads one newline-terminated line without buffering more than `max_bytes`
/// of it. An oversized line is drained up to its terminator so the next read
/// starts on a fresh command.
pub async fn read_bounded_line<R>(reader: &mut R, max_bytes: usize) -> io::Result<Option<InboundLine>>
where
    R: AsyncBufRead + Unpin,
{
    let mut collected = Vec::new();
    let mut overflow = false;

    loop {
        let (consumed, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                if collected.is_empty() && !overflow {
                    return Ok(None);
                }
                break;
            }
            match available.iter().position(|byte| *byte == b'\n') {
                Some(newline) => {
                    if !overflow {
                        collected.extend_from_slice(&available[..newline]);
                    }
                    (newline + 1, true)
                }
                None => {
                    if !overflow {
                        collected.extend_from_slice(available);
                    }
                    (available.len(), false)
                }
            }
        };
        reader.consume(consumed);

        // One extra byte of slack for a trailing '\r'.
        if collected.len() > max_bytes + 1 {
            overflow = true;
            collected = Vec::new();
        }
        if done {
            break;
        }
    }

    if overflow {
        return Ok(Some(InboundLine::TooLong));
    }
    let text = String::from_utf8_lossy(&collected);
    let text = text.trim_end_matches(LINE_ENDINGS);
    if text.len() > max_bytes {
        return Ok(Some(InboundLine::TooLong));
    }
    Ok(Some(InboundLine::Text(text.to_string())))
}

/// Reads one line of any length, `None` on a closed stream.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Single write so multi-line payloads reach the peer as one logical send.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
