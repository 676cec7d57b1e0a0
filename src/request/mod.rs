//! One-shot requests against a recorder.
//!
//! Every request kind runs the same connect, send, receive, parse cycle on a
//! short-lived TCP connection. What differs per kind (payload prefix, timeout)
//! is supplied by a [`RequestProfile`].

mod blocking;
mod command;
mod generic;
mod io;
mod password_reset;
mod pool;
mod task;

#[cfg(test)]
mod tests;

use std::fmt;
use std::time::Duration;

use crate::wire::RequestKind;

pub use command::{Command, CommandProfile, CommandRequest, CommandResponse};
pub use generic::{ConfigProfile, GenericRequest};
pub use password_reset::{PasswordResetCommand, PasswordResetProfile, PasswordResetRequest, PasswordResetResponse};
pub use pool::{COMMAND_SESSIONS, CONFIG_SESSIONS, PASSWORD_RESET_SESSIONS, SessionLease, SessionPool};
pub use task::{NetworkTask, TaskHandle};

pub(crate) use io::{connect, read_reply, write_frame};

/// How long a receive may sit without new bytes before an idle-terminated read ends.
pub const RECEIVE_IDLE_WINDOW: Duration = Duration::from_millis(500);

/// Largest snapshot image accepted from the device.
pub const SNAPSHOT_MAX_SIZE: usize = 4 * 1024 * 1024;

/// Device endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub address: String,
    pub tcp_port: u16,
}

impl ServerInfo {
    pub fn new(address: impl Into<String>, tcp_port: u16) -> Self {
        Self {
            address: address.into(),
            tcp_port,
        }
    }

    /// `host:port`, bracketing bare IPv6 addresses.
    pub fn socket_addr(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.tcp_port)
        } else {
            format!("{}:{}", self.address, self.tcp_port)
        }
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.socket_addr())
    }
}

/// Everything needed to put one request on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub session: String,
    pub kind: RequestKind,
    pub payload: Vec<u8>,
    pub timeout: Duration,
}

/// When a receive is considered complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Stop at the first end-of-message byte.
    UntilEom,
    /// Stop once the peer goes quiet; the last end-of-message byte ends the frame.
    UntilIdle,
    /// Like `UntilIdle`, but also stop after `max` bytes.
    Bounded { max: usize },
}

/// Per-kind policy: which request kind, how long to wait, how to frame the arguments.
pub trait RequestProfile {
    fn kind(&self) -> RequestKind;

    fn timeout(&self) -> Duration;

    fn frame_payload(&self, args: &[u8]) -> Vec<u8> {
        args.to_vec()
    }

    fn receive_mode(&self) -> ReceiveMode {
        ReceiveMode::UntilEom
    }

    fn request_info(&self, session: &str, args: &[u8]) -> RequestInfo {
        RequestInfo {
            session: session.to_string(),
            kind: self.kind(),
            payload: self.frame_payload(args),
            timeout: self.timeout(),
        }
    }
}
