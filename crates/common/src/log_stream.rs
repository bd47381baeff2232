//! Server-Sent Events log streaming
//!
//! Streams live lines from a [`LogRingBuffer`] to any async writer in SSE
//! framing. The consumer disconnecting is detected by the first failed write,
//! at which point the reader slot is released.

use crate::error::{Error, Result};
use crate::log_ring::{LogRingBuffer, ReaderGuard};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

const CONNECTED_COMMENT: &[u8] = b": log stream connected\n\n";
const KEEPALIVE_COMMENT: &[u8] = b": keepalive\n\n";

/// Log stream pacing
#[derive(Debug, Clone, Copy)]
pub struct LogStreamConfig {
    /// Sleep between polls when no line is available
    pub poll_interval: Duration,
    /// Empty polls before a keepalive comment is written
    pub keepalive_idle_polls: u32,
}

impl Default for LogStreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            keepalive_idle_polls: 100,
        }
    }
}

/// Format one log line as an SSE `data:` event
pub fn sse_event(line: &str) -> String {
    format!("data: {}\n\n", line)
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Stream log lines to `writer` until it fails
///
/// Returns the number of lines delivered. Fails up front with
/// [`Error::NoReaderSlots`] when every reader slot is taken.
pub async fn stream_logs<W>(
    ring: &LogRingBuffer,
    writer: &mut W,
    config: LogStreamConfig,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let Some(reader) = ReaderGuard::allocate(ring) else {
        warn!("No log reader slots available");
        return Err(Error::NoReaderSlots);
    };
    info!("Log stream started (reader {})", reader.id().0);

    let mut delivered = 0u64;
    if send(writer, CONNECTED_COMMENT).await.is_err() {
        debug!("Log stream consumer gone before first write");
        return Ok(delivered);
    }

    let mut idle_polls = 0u32;
    loop {
        match reader.read() {
            Some(line) if !line.is_empty() => {
                idle_polls = 0;
                if send(writer, sse_event(&line).as_bytes()).await.is_err() {
                    break;
                }
                delivered += 1;
            }
            _ => {
                idle_polls += 1;
                if idle_polls >= config.keepalive_idle_polls {
                    idle_polls = 0;
                    if send(writer, KEEPALIVE_COMMENT).await.is_err() {
                        break;
                    }
                }
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }

    info!(
        "Log stream ended (reader {}, {} lines delivered)",
        reader.id().0,
        delivered
    );
    Ok(delivered)
}
