//! Persistent device session.
//!
//! A [`ConnectRequest`] logs in, waits for the owner to allow polling, then
//! polls the device until told to stop, fetching events when the device
//! flags them and reconnecting (with port fallback) when the link dies.

mod connect;
mod local;
mod machine;
mod resolver;


use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::request::ServerInfo;
use crate::wire::{FSP, Reply, StatusCode, fields};

pub use connect::{ConnectRequest, SessionChannels};
pub use local::LocalChannel;
pub use machine::{LinkState, Phase};
pub use resolver::{DirectoryClient, Resolved};

/// Upper bound on the wait between failed logins.
pub const MAX_LOGIN_RETRY_DELAY: Duration = Duration::from_secs(300);

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `username FSP password FSP`
    pub(crate) fn login_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        payload.extend_from_slice(self.username.as_bytes());
        payload.push(FSP);
        payload.extend_from_slice(self.password.as_bytes());
        payload.push(FSP);
        payload
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Session parameters advertised by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginInfo {
    pub session: String,
    pub keep_alive: Duration,
    pub response_timeout: Duration,
    pub camera_count: u16,
    pub model: String,
}

impl LoginInfo {
    /// Parse `keep-alive FSP response-timeout FSP camera-count FSP model`.
    /// Missing or zero timings fall back to the given defaults.
    pub fn from_reply(reply: &Reply, default_keep_alive: Duration, default_response_timeout: Duration) -> Self {
        let parts = fields(&reply.payload, FSP);
        let text = |i: usize| {
            parts
                .get(i)
                .map(|f| String::from_utf8_lossy(f).trim().to_string())
                .unwrap_or_default()
        };
        let secs = |i: usize| {
            text(i)
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
        };

        Self {
            session: reply.session.clone().unwrap_or_default(),
            keep_alive: secs(0).unwrap_or(default_keep_alive),
            response_timeout: secs(1).unwrap_or(default_response_timeout),
            camera_count: text(2).parse().unwrap_or(0),
            model: text(3),
        }
    }
}

/// Owner's decision after a login result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPermission {
    Proceed,
    Abort,
}

/// Messages the session sends to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The endpoint the session is now talking to.
    Endpoint(ServerInfo),
    /// Outcome of a login attempt; a success waits for a [`PollPermission`].
    LoginResult { status: StatusCode, info: Option<LoginInfo> },
    /// Link state changed.
    Link(LinkState),
    /// A successful poll reply.
    Poll(Reply),
    /// Result of an event fetch, successful or not.
    Event(Reply),
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    Cancelled,
    /// The owner refused to start polling.
    Aborted,
    /// Login failed and automatic re-login is off.
    LoginFailed(StatusCode),
    /// The owner dropped its end of the channels.
    ChannelClosed,
}

/// Everything a persistent session needs to know up front.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Device name, used in log lines.
    pub name: String,
    pub server: ServerInfo,
    pub forwarded_port: Option<u16>,
    pub credentials: Credentials,
    pub auto_login: bool,
    /// Registered name or MAC address to look up before connecting.
    pub directory_id: Option<String>,
    pub directory_url: Option<String>,
    /// Local IPC socket, consulted for loopback devices only.
    pub local_channel: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub login_timeout: Duration,
    pub login_retry_delay: Duration,
    pub poll_interval: Duration,
    /// Used when the login reply does not advertise one.
    pub default_keep_alive: Duration,
    pub default_response_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(name: impl Into<String>, server: ServerInfo, credentials: Credentials) -> Self {
        Self {
            name: name.into(),
            server,
            forwarded_port: None,
            credentials,
            auto_login: true,
            directory_id: None,
            directory_url: None,
            local_channel: None,
            connect_timeout: Duration::from_secs(5),
            login_timeout: Duration::from_secs(10),
            login_retry_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            default_keep_alive: DEFAULT_KEEP_ALIVE,
            default_response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub(crate) fn is_loopback(&self) -> bool {
        let address = self.server.address.trim_matches(|c| c == '[' || c == ']');
        address.eq_ignore_ascii_case("localhost") || address.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
    }
}
