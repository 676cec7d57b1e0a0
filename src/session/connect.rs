//! The persistent session driver.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::local::LocalChannel;
use super::machine::{Phase, PollOutcome, PollStep, PollTracker, PortSelector};
use super::resolver::DirectoryClient;
use super::{ConnectOptions, LoginInfo, MAX_LOGIN_RETRY_DELAY, PollPermission, SessionEvent, SessionExit};
use crate::error::AppError;
use crate::request::{GenericRequest, NetworkTask, ReceiveMode, RequestInfo, ServerInfo, connect, read_reply, write_frame};
use crate::wire::{FSP, Reply, RequestKind, ResponseKind, StatusCode, encode_request, fields};

const EVENT_CAPACITY: usize = 64;

/// Owner's ends of the session channels.
#[derive(Debug)]
pub struct SessionChannels {
    pub events: mpsc::Receiver<SessionEvent>,
    pub permission: mpsc::Sender<PollPermission>,
}

type Flow = std::result::Result<Phase, SessionExit>;

/// Login, poll and event loop for one device.
#[derive(Debug)]
pub struct ConnectRequest {
    options: ConnectOptions,
    address: String,
    ports: PortSelector,
    announced: Option<ServerInfo>,
    tracker: PollTracker,
    session: String,
    keep_alive: Duration,
    response_timeout: Duration,
    local: Option<LocalChannel>,
    pending: Option<TcpStream>,
    events: mpsc::Sender<SessionEvent>,
    permission: mpsc::Receiver<PollPermission>,
}

impl ConnectRequest {
    pub fn new(options: ConnectOptions) -> (Self, SessionChannels) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (permission_tx, permission_rx) = mpsc::channel(1);

        let local = match &options.local_channel {
            Some(path) if options.is_loopback() => Some(LocalChannel::new(path, options.connect_timeout)),
            _ => None,
        };

        let request = Self {
            address: options.server.address.clone(),
            ports: PortSelector::new(options.server.tcp_port, options.forwarded_port),
            announced: None,
            tracker: PollTracker::new(),
            session: String::new(),
            keep_alive: options.default_keep_alive,
            response_timeout: options.default_response_timeout,
            local,
            pending: None,
            events: event_tx,
            permission: permission_rx,
            options,
        };
        let channels = SessionChannels {
            events: event_rx,
            permission: permission_tx,
        };
        (request, channels)
    }

    fn endpoint(&self) -> ServerInfo {
        ServerInfo::new(self.address.clone(), self.ports.current())
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> SessionExit {
        let name = self.options.name.clone();
        let mut phase = Phase::Resolving;
        info!("[{name}] Session starting");

        loop {
            if cancel.is_cancelled() {
                return SessionExit::Cancelled;
            }
            trace!("[{name}] {phase}");

            let next = match phase {
                Phase::Resolving => self.resolve(cancel).await,
                Phase::Connecting => self.connect_cycle(cancel).await,
                Phase::LoggingIn => self.login(cancel).await,
                Phase::AwaitingPollPermission => self.await_permission(cancel).await,
                Phase::Polling => self.poll(cancel).await,
                Phase::DeliveringEvent => self.deliver_event(cancel).await,
                Phase::Disconnected => {
                    warn!("[{name}] Link lost, reconnecting");
                    self.session.clear();
                    Ok(Phase::Resolving)
                }
            };

            match next {
                Ok(next) => phase = next,
                Err(exit) => {
                    info!("[{name}] Session ended: {exit:?}");
                    return exit;
                }
            }
        }
    }

    async fn emit(&self, event: SessionEvent, cancel: &CancellationToken) -> std::result::Result<(), SessionExit> {
        tokio::select! {
            _ = cancel.cancelled() => Err(SessionExit::Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| SessionExit::ChannelClosed),
        }
    }

    /// Sleep unless cancelled.
    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> std::result::Result<(), SessionExit> {
        tokio::select! {
            _ = cancel.cancelled() => Err(SessionExit::Cancelled),
            _ = sleep(delay) => Ok(()),
        }
    }

    /// Wait before reconnecting, cut short when the local service moved to a new port.
    async fn retry_after(&mut self, delay: Duration, cancel: &CancellationToken) -> std::result::Result<(), SessionExit> {
        if self.sync_local_port().await {
            return Ok(());
        }
        debug!("[{}] Retrying in {delay:?}", self.options.name);
        self.pause(delay, cancel).await
    }

    /// Ask the local service for its current port. Returns true when it moved.
    async fn sync_local_port(&mut self) -> bool {
        let Some(local) = &self.local else {
            return false;
        };
        match local.tcp_port().await {
            Ok(port) if port != self.ports.primary() => {
                info!(
                    "[{}] Local service moved from port {} to {port}",
                    self.options.name,
                    self.ports.primary()
                );
                self.ports.set_primary(port);
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!("[{}] Local port query failed: {e}", self.options.name);
                false
            }
        }
    }

    async fn resolve(&mut self, cancel: &CancellationToken) -> Flow {
        let Some(identifier) = self.options.directory_id.clone() else {
            return Ok(Phase::Connecting);
        };

        let mut base_url = self.options.directory_url.clone();
        if let Some(local) = &self.local {
            match local.directory_address().await {
                Ok(url) => base_url = Some(url),
                Err(e) => debug!("[{}] Local directory query failed: {e}", self.options.name),
            }
        }
        let Some(base_url) = base_url else {
            warn!("[{}] No directory service configured for {identifier}", self.options.name);
            return Ok(Phase::Connecting);
        };

        let lookup = async {
            let client = DirectoryClient::new(&base_url, self.response_timeout)?;
            client.resolve(&identifier).await
        };
        let resolved = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionExit::Cancelled),
            r = lookup => r,
        };

        match resolved {
            Ok(resolved) => {
                info!("[{}] {identifier} resolved to {}", self.options.name, resolved.address);
                self.address = resolved.address;
                if let Some(port) = resolved.port {
                    self.ports.set_primary(port);
                }
            }
            Err(e) => warn!("[{}] Lookup of {identifier} failed, using {}: {e}", self.options.name, self.address),
        }
        Ok(Phase::Connecting)
    }

    /// Current port, then the other one; on double failure go back and wait.
    async fn connect_cycle(&mut self, cancel: &CancellationToken) -> Flow {
        self.sync_local_port().await;
        let attempts = if self.ports.has_fallback() { 2 } else { 1 };

        for _ in 0..attempts {
            let server = self.endpoint();
            match connect(&server, self.options.connect_timeout, cancel).await {
                Ok(stream) => {
                    info!("[{}] Connected to {server}", self.options.name);
                    if self.announced.as_ref() != Some(&server) {
                        self.announced = Some(server.clone());
                        self.emit(SessionEvent::Endpoint(server), cancel).await?;
                    }
                    self.pending = Some(stream);
                    return Ok(Phase::LoggingIn);
                }
                Err(AppError::Cancelled) => return Err(SessionExit::Cancelled),
                Err(e) => {
                    warn!("[{}] {server}: {e}", self.options.name);
                    self.ports.flip();
                }
            }
        }

        self.retry_after(self.response_timeout, cancel).await?;
        Ok(Phase::Connecting)
    }

    async fn login(&mut self, cancel: &CancellationToken) -> Flow {
        let Some(mut stream) = self.pending.take() else {
            return Ok(Phase::Connecting);
        };

        let info = RequestInfo {
            session: String::new(),
            kind: RequestKind::Login,
            payload: self.options.credentials.login_payload(),
            timeout: self.options.login_timeout,
        };
        let frame = match encode_request(info.kind, &info.session, &info.payload) {
            Ok(frame) => frame,
            Err(e) => {
                error!("[{}] Login frame: {e}", self.options.name);
                return self.login_failed(StatusCode::MaxBufferLimit, cancel).await;
            }
        };

        let deadline = Instant::now() + info.timeout;
        let exchange = async {
            write_frame(&mut stream, &frame, info.timeout, cancel).await?;
            let left = deadline.saturating_duration_since(Instant::now());
            read_reply(&mut stream, ReceiveMode::UntilEom, left, cancel).await
        };
        let reply = match exchange.await {
            Ok(reply) if reply.kind == ResponseKind::Login || !reply.status.is_success() => reply,
            Ok(_) => Reply::unknown(),
            Err(AppError::Cancelled) => return Err(SessionExit::Cancelled),
            Err(AppError::Codec(e)) => {
                warn!("[{}] Unparsable login reply: {e}", self.options.name);
                Reply::unknown()
            }
            Err(e) => {
                warn!("[{}] Login exchange failed: {e}", self.options.name);
                Reply::failed(StatusCode::ServerNotResponding)
            }
        };
        drop(stream);

        if !reply.status.is_success() {
            return self.login_failed(reply.status, cancel).await;
        }

        let login = LoginInfo::from_reply(
            &reply,
            self.options.default_keep_alive,
            self.options.default_response_timeout,
        );
        info!(
            "[{}] Logged in: keep-alive {:?}, response timeout {:?}, {} cameras",
            self.options.name, login.keep_alive, login.response_timeout, login.camera_count
        );
        self.session = login.session.clone();
        self.keep_alive = login.keep_alive;
        self.response_timeout = login.response_timeout;

        self.emit(
            SessionEvent::LoginResult {
                status: StatusCode::Success,
                info: Some(login),
            },
            cancel,
        )
        .await?;
        Ok(Phase::AwaitingPollPermission)
    }

    async fn login_failed(&mut self, status: StatusCode, cancel: &CancellationToken) -> Flow {
        warn!("[{}] Login failed: {status}", self.options.name);
        self.emit(SessionEvent::LoginResult { status, info: None }, cancel).await?;

        if !self.options.auto_login {
            return Err(SessionExit::LoginFailed(status));
        }
        let delay = self.options.login_retry_delay.min(MAX_LOGIN_RETRY_DELAY);
        self.retry_after(delay, cancel).await?;
        Ok(Phase::Resolving)
    }

    async fn await_permission(&mut self, cancel: &CancellationToken) -> Flow {
        let decision = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionExit::Cancelled),
            d = self.permission.recv() => d,
        };

        match decision {
            Some(PollPermission::Proceed) => {
                debug!("[{}] Polling every {:?}", self.options.name, self.options.poll_interval);
                if let Some(state) = self.tracker.on_login(self.keep_alive) {
                    self.emit(SessionEvent::Link(state), cancel).await?;
                }
                Ok(Phase::Polling)
            }
            Some(PollPermission::Abort) => Err(SessionExit::Aborted),
            None => Err(SessionExit::ChannelClosed),
        }
    }

    /// One request on a fresh connection to the current endpoint.
    async fn exchange(&self, kind: RequestKind, cancel: &CancellationToken) -> Reply {
        let info = RequestInfo {
            session: self.session.clone(),
            kind,
            payload: Vec::new(),
            timeout: self.response_timeout,
        };
        GenericRequest::new(self.endpoint(), info).execute(cancel).await
    }

    async fn poll(&mut self, cancel: &CancellationToken) -> Flow {
        let reply = self.exchange(RequestKind::Poll, cancel).await;
        if cancel.is_cancelled() {
            return Err(SessionExit::Cancelled);
        }

        let outcome = poll_outcome(&reply);
        let (step, change) = self.tracker.on_poll(outcome, self.response_timeout);
        if outcome == PollOutcome::Failed {
            debug!(
                "[{}] Poll failed ({}), keep-alive left {:?}",
                self.options.name,
                reply.status,
                self.tracker.budget_left()
            );
        }

        if let Some(state) = change {
            self.emit(SessionEvent::Link(state), cancel).await?;
        }
        if matches!(outcome, PollOutcome::Idle | PollOutcome::EventAvailable) {
            self.emit(SessionEvent::Poll(reply), cancel).await?;
        }

        match step {
            PollStep::FetchEvent => Ok(Phase::DeliveringEvent),
            PollStep::Continue => {
                self.pause(self.options.poll_interval, cancel).await?;
                Ok(Phase::Polling)
            }
            PollStep::Reconnect => Ok(Phase::Disconnected),
        }
    }

    async fn deliver_event(&mut self, cancel: &CancellationToken) -> Flow {
        let reply = self.exchange(RequestKind::EventFetch, cancel).await;
        if cancel.is_cancelled() {
            return Err(SessionExit::Cancelled);
        }
        self.emit(SessionEvent::Event(reply), cancel).await?;
        Ok(Phase::Polling)
    }
}

impl NetworkTask for ConnectRequest {
    type Output = SessionExit;

    async fn run(mut self, cancel: CancellationToken) -> SessionExit {
        let exit = self.drive(&cancel).await;
        if let Some(state) = self.tracker.on_lost() {
            // Best effort; the owner may already be gone.
            let _ = self.events.try_send(SessionEvent::Link(state));
        }
        exit
    }
}

/// Classify a poll reply. The first payload field flags a pending event.
fn poll_outcome(reply: &Reply) -> PollOutcome {
    match reply.status {
        StatusCode::InvalidSession => PollOutcome::SessionInvalid,
        StatusCode::EventAvailable => PollOutcome::EventAvailable,
        StatusCode::Success if reply.kind == ResponseKind::Poll => {
            match fields(&reply.payload, FSP).first() {
                Some(flag) if *flag == b"1" => PollOutcome::EventAvailable,
                _ => PollOutcome::Idle,
            }
        }
        _ => PollOutcome::Failed,
    }
}
