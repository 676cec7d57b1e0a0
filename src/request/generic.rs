//! Generic request: connect, send, receive, parse.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::blocking;
use super::io::{connect, read_reply, write_frame};
use super::task::NetworkTask;
use super::{ReceiveMode, RequestInfo, RequestProfile, ServerInfo};
use crate::error::AppError;
use crate::wire::{CodecError, Reply, RequestKind, StatusCode, encode_request};

/// Default wait for configuration get/set/default replies.
const CONFIG_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a request stopped.
#[derive(Debug, Clone, Copy)]
enum Stage {
    Connecting,
    Sending,
    Receiving,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connecting => "connect",
            Stage::Sending => "send",
            Stage::Receiving => "receive",
        };
        f.write_str(name)
    }
}

/// Profile for configuration table requests.
#[derive(Debug, Clone, Copy)]
pub struct ConfigProfile {
    kind: RequestKind,
    timeout: Duration,
}

impl ConfigProfile {
    pub fn get() -> Self {
        Self::new(RequestKind::GetConfig)
    }

    pub fn set() -> Self {
        Self::new(RequestKind::SetConfig)
    }

    pub fn default_config() -> Self {
        Self::new(RequestKind::DefaultConfig)
    }

    fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            timeout: CONFIG_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl RequestProfile for ConfigProfile {
    fn kind(&self) -> RequestKind {
        self.kind
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// One request/reply exchange on a fresh TCP connection.
#[derive(Debug, Clone)]
pub struct GenericRequest {
    server: ServerInfo,
    info: RequestInfo,
    mode: ReceiveMode,
}

impl GenericRequest {
    pub fn new(server: ServerInfo, info: RequestInfo) -> Self {
        Self {
            server,
            info,
            mode: ReceiveMode::UntilEom,
        }
    }

    /// Build from a profile, framing `args` the way the profile wants.
    pub fn from_profile(server: ServerInfo, profile: &impl RequestProfile, session: &str, args: &[u8]) -> Self {
        Self {
            server,
            info: profile.request_info(session, args),
            mode: profile.receive_mode(),
        }
    }

    pub fn with_receive_mode(mut self, mode: ReceiveMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    pub fn info(&self) -> &RequestInfo {
        &self.info
    }

    pub fn receive_mode(&self) -> ReceiveMode {
        self.mode
    }

    /// Run the exchange. Failures are folded into the reply status:
    /// `MaxBufferLimit` when either frame is too large, `ServerNotResponding`
    /// when the device cannot be reached, `InvalidMessage` for an unparsable reply.
    pub async fn execute(&self, cancel: &CancellationToken) -> Reply {
        let frame = match encode_request(self.info.kind, &self.info.session, &self.info.payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{} to {}: {e}", self.info.kind, self.server);
                return Reply::failed(StatusCode::MaxBufferLimit);
            }
        };

        // One deadline covers all three stages.
        let deadline = Instant::now() + self.info.timeout;
        let left = || deadline.saturating_duration_since(Instant::now());
        let mut stage = Stage::Connecting;
        let result = async {
            let mut stream = connect(&self.server, left(), cancel).await?;
            stage = Stage::Sending;
            write_frame(&mut stream, &frame, left(), cancel).await?;
            stage = Stage::Receiving;
            read_reply(&mut stream, self.mode, left(), cancel).await
        }
        .await;

        match result {
            Ok(reply) => {
                debug!("{} to {}: {}", self.info.kind, self.server, reply.status);
                reply
            }
            Err(AppError::Codec(e @ CodecError::SizeExceeded { .. })) => {
                warn!("{} to {}: {e}", self.info.kind, self.server);
                Reply::failed(StatusCode::MaxBufferLimit)
            }
            Err(AppError::Codec(e)) => {
                warn!("{} to {}: unparsable reply: {e}", self.info.kind, self.server);
                Reply::unknown()
            }
            Err(e) => {
                warn!("{} to {} failed at {stage}: {e}", self.info.kind, self.server);
                Reply::failed(StatusCode::ServerNotResponding)
            }
        }
    }

    /// Same exchange on blocking sockets, for callers outside the runtime.
    pub fn execute_blocking(&self) -> Reply {
        blocking::execute(&self.server, &self.info, self.mode)
    }
}

impl NetworkTask for GenericRequest {
    type Output = Reply;

    async fn run(self, cancel: CancellationToken) -> Reply {
        self.execute(&cancel).await
    }
}
