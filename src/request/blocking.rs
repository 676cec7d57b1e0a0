//! Blocking variant of the request exchange.
//!
//! Provides blocking I/O for callers that cannot await a notification;
//! do not call from inside the async runtime (use `spawn_blocking`).

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::io::CONNECT_SLICE;
use super::{RECEIVE_IDLE_WINDOW, ReceiveMode, RequestInfo, ServerInfo};
use crate::error::{AppError, Result};
use crate::wire::{
    CodecError, MAX_RECEIVE_SIZE, Reply, StatusCode, decode_reply, decode_reply_idle, encode_request,
};

/// Run one exchange and return the reply directly.
pub(crate) fn execute(server: &ServerInfo, info: &RequestInfo, mode: ReceiveMode) -> Reply {
    let frame = match encode_request(info.kind, &info.session, &info.payload) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("{} to {server}: {e}", info.kind);
            return Reply::failed(StatusCode::MaxBufferLimit);
        }
    };

    let deadline = Instant::now() + info.timeout;
    let result = connect(server, deadline).and_then(|mut stream| {
        stream.set_write_timeout(Some(remaining(deadline)?))?;
        stream.write_all(&frame)?;
        receive(&mut stream, mode, deadline)
    });

    match result {
        Ok(reply) => {
            debug!("{} to {server} (blocking): {}", info.kind, reply.status);
            reply
        }
        Err(AppError::Codec(e @ CodecError::SizeExceeded { .. })) => {
            warn!("{} to {server}: {e}", info.kind);
            Reply::failed(StatusCode::MaxBufferLimit)
        }
        Err(AppError::Codec(e)) => {
            warn!("{} to {server}: unparsable reply: {e}", info.kind);
            Reply::unknown()
        }
        Err(e) => {
            warn!("{} to {server} failed: {e}", info.kind);
            Reply::failed(StatusCode::ServerNotResponding)
        }
    }
}

fn remaining(deadline: Instant) -> Result<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(AppError::DeviceTimeout("Request timeout".to_string()));
    }
    Ok(left)
}

fn resolve(server: &ServerInfo) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = server.socket_addr().to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(AppError::TcpConnectionFailed(format!("No address for {server}")));
    }
    Ok(addrs)
}

fn connect(server: &ServerInfo, deadline: Instant) -> Result<TcpStream> {
    let addrs = resolve(server)?;
    loop {
        let slice_end = Instant::now() + CONNECT_SLICE;
        let slice = remaining(deadline)?.min(CONNECT_SLICE);
        let mut last_error = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, slice) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }

        if slice_end >= deadline {
            let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
            return Err(AppError::TcpConnectionFailed(format!("Failed to connect to {server}: {reason}")));
        }
        std::thread::sleep(slice_end.saturating_duration_since(Instant::now()));
    }
}

fn receive(stream: &mut TcpStream, mode: ReceiveMode, deadline: Instant) -> Result<Reply> {
    let max = match mode {
        ReceiveMode::UntilEom | ReceiveMode::UntilIdle => MAX_RECEIVE_SIZE,
        ReceiveMode::Bounded { max } => max,
    };
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let wait = match (mode, buf.is_empty()) {
            (ReceiveMode::UntilEom, _) | (_, true) => remaining(deadline)?,
            _ => RECEIVE_IDLE_WINDOW.min(deadline.saturating_duration_since(Instant::now())),
        };
        if wait.is_zero() {
            break;
        }
        stream.set_read_timeout(Some(wait))?;

        let want = (max - buf.len()).min(chunk.len());
        let n = match stream.read(&mut chunk[..want]) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if mode == ReceiveMode::UntilEom || buf.is_empty() {
                    return Err(AppError::DeviceTimeout("Read timeout".to_string()));
                }
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            if mode == ReceiveMode::UntilEom {
                return Err(AppError::TcpConnectionFailed("Connection closed before EOM".to_string()));
            }
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if mode == ReceiveMode::UntilEom {
            match decode_reply(&buf) {
                Ok(reply) => return Ok(reply),
                Err(CodecError::Incomplete) if buf.len() < max => continue,
                Err(CodecError::Incomplete) => {
                    return Err(CodecError::SizeExceeded { size: buf.len(), max }.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
        if buf.len() >= max {
            if peer_has_more(stream, deadline)? {
                return Err(CodecError::SizeExceeded { size: buf.len() + 1, max }.into());
            }
            break;
        }
    }

    if buf.is_empty() {
        return Err(AppError::DeviceTimeout("Read timeout".to_string()));
    }
    Ok(decode_reply_idle(&buf)?)
}

/// Whether the peer keeps sending past the receive limit.
fn peer_has_more(stream: &mut TcpStream, deadline: Instant) -> Result<bool> {
    let wait = RECEIVE_IDLE_WINDOW.min(deadline.saturating_duration_since(Instant::now()));
    if wait.is_zero() {
        return Ok(false);
    }
    stream.set_read_timeout(Some(wait))?;
    let mut byte = [0u8; 1];
    match stream.read(&mut byte) {
        Ok(n) => Ok(n > 0),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
