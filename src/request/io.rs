//! Low-level socket I/O with timeout and cancellation handling.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::{RECEIVE_IDLE_WINDOW, ReceiveMode, ServerInfo};
use crate::error::{AppError, Result};
use crate::wire::{CodecError, MAX_RECEIVE_SIZE, Reply, decode_reply, decode_reply_idle};

/// Length of one connect attempt.
pub(crate) const CONNECT_SLICE: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 8192;

/// Connect to the device, retrying in one-second attempts until `limit` is used up.
pub(crate) async fn connect(server: &ServerInfo, limit: Duration, cancel: &CancellationToken) -> Result<TcpStream> {
    let addr = server.socket_addr();
    let deadline = Instant::now() + limit;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let slice_end = (Instant::now() + CONNECT_SLICE).min(deadline);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            r = timeout(slice_end.saturating_duration_since(Instant::now()), TcpStream::connect(&addr)) => r,
        };

        let failure = match outcome {
            Ok(Ok(stream)) => {
                trace!("Connected to {addr} on attempt {attempt}");
                return Ok(stream);
            }
            Ok(Err(e)) => format!("Failed to connect to {addr}: {e}"),
            Err(_) => format!("Connection timeout to {addr}"),
        };

        if Instant::now() >= deadline || slice_end >= deadline {
            debug!("{failure} (giving up after {attempt} attempt(s))");
            return Err(AppError::TcpConnectionFailed(failure));
        }

        // Refused connections fail instantly; hold off until the slice is over.
        tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            _ = sleep(slice_end.saturating_duration_since(Instant::now())) => {}
        }
    }
}

/// Write the whole frame, looping until every byte is flushed.
pub(crate) async fn write_frame(
    stream: &mut TcpStream,
    frame: &[u8],
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let deadline = Instant::now() + limit;
    let mut sent = 0;

    while sent < frame.len() {
        let written = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            r = timeout(deadline.saturating_duration_since(Instant::now()), stream.write(&frame[sent..])) => r,
        };
        match written {
            Ok(Ok(0)) => {
                error!("Write failed: connection closed after {sent} bytes");
                return Err(AppError::TcpConnectionFailed("Write failed: connection closed".to_string()));
            }
            Ok(Ok(n)) => sent += n,
            Ok(Err(e)) => {
                error!("Write failed: {e}");
                return Err(AppError::TcpConnectionFailed(format!("Write failed: {e}")));
            }
            Err(_) => return Err(AppError::DeviceTimeout("Write timeout".to_string())),
        }
    }

    trace!("TX {} bytes", frame.len());
    Ok(())
}

/// Read one reply according to `mode`.
pub(crate) async fn read_reply(
    stream: &mut TcpStream,
    mode: ReceiveMode,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<Reply> {
    match mode {
        ReceiveMode::UntilEom => read_until_eom(stream, limit, cancel).await,
        ReceiveMode::UntilIdle => {
            let buf = read_until_idle(stream, MAX_RECEIVE_SIZE, limit, cancel).await?;
            Ok(decode_reply_idle(&buf)?)
        }
        ReceiveMode::Bounded { max } => {
            let buf = read_until_idle(stream, max, limit, cancel).await?;
            Ok(decode_reply_idle(&buf)?)
        }
    }
}

async fn read_chunk(
    stream: &mut TcpStream,
    chunk: &mut [u8],
    wait: Duration,
    cancel: &CancellationToken,
) -> Result<Option<usize>> {
    let read = tokio::select! {
        _ = cancel.cancelled() => return Err(AppError::Cancelled),
        r = timeout(wait, stream.read(chunk)) => r,
    };
    match read {
        Ok(Ok(n)) => Ok(Some(n)),
        Ok(Err(e)) => {
            error!("Read failed: {e}");
            Err(AppError::TcpConnectionFailed(format!("Read failed: {e}")))
        }
        Err(_) => Ok(None),
    }
}

async fn read_until_eom(stream: &mut TcpStream, limit: Duration, cancel: &CancellationToken) -> Result<Reply> {
    let deadline = Instant::now() + limit;
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = match read_chunk(stream, &mut chunk, deadline.saturating_duration_since(Instant::now()), cancel).await? {
            Some(0) => {
                return Err(AppError::TcpConnectionFailed(format!(
                    "Connection closed after {} bytes without EOM",
                    buf.len()
                )));
            }
            Some(n) => n,
            None => {
                error!("Read timeout after {} bytes", buf.len());
                return Err(AppError::DeviceTimeout("Read timeout".to_string()));
            }
        };
        buf.extend_from_slice(&chunk[..n]);

        match decode_reply(&buf) {
            Ok(reply) => {
                trace!("RX {} bytes: {:?} {}", buf.len(), reply.kind, reply.status);
                return Ok(reply);
            }
            Err(CodecError::Incomplete) if buf.len() <= MAX_RECEIVE_SIZE => continue,
            Err(CodecError::Incomplete) => {
                error!("Reply too large: {} bytes", buf.len());
                return Err(CodecError::SizeExceeded {
                    size: buf.len(),
                    max: MAX_RECEIVE_SIZE,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Read until the peer stays quiet for [`RECEIVE_IDLE_WINDOW`] or closes.
///
/// The first byte may take the full `limit` to show up. A peer still sending
/// once `max` bytes are in is an oversized reply, never a truncated one.
async fn read_until_idle(
    stream: &mut TcpStream,
    max: usize,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let deadline = Instant::now() + limit;
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    while buf.len() < max {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let wait = if buf.is_empty() {
            remaining
        } else {
            RECEIVE_IDLE_WINDOW.min(remaining)
        };
        let want = (max - buf.len()).min(READ_CHUNK);
        match read_chunk(stream, &mut chunk[..want], wait, cancel).await? {
            Some(0) | None => break,
            Some(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    if buf.is_empty() {
        error!("Read timeout: nothing received");
        return Err(AppError::DeviceTimeout("Read timeout".to_string()));
    }
    if buf.len() >= max {
        let wait = RECEIVE_IDLE_WINDOW.min(deadline.saturating_duration_since(Instant::now()));
        if let Some(n) = read_chunk(stream, &mut chunk[..1], wait, cancel).await?
            && n > 0
        {
            error!("Reply too large: more than {max} bytes");
            return Err(CodecError::SizeExceeded { size: buf.len() + n, max }.into());
        }
    }
    debug!("RX {} bytes (idle terminated)", buf.len());
    Ok(buf)
}
