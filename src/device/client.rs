//! One device: its persistent session, request pools and cached state.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::events::{DeviceEvent, HealthStatus, LiveEvent};
use super::manager::Notification;
use super::DeviceSettings;
use crate::error::{AppError, Result};
use crate::request::{
    CONFIG_SESSIONS, Command, CommandRequest, CommandResponse, ConfigProfile, GenericRequest, NetworkTask,
    PasswordResetCommand, PasswordResetRequest, ServerInfo, SessionPool, TaskHandle,
};
use crate::session::{
    ConnectRequest, LinkState, LoginInfo, PollPermission, SessionChannels, SessionEvent, SessionExit,
};
use crate::wire::{Reply, RequestKind, StatusCode};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Mutable per-device state, one lock per field.
#[derive(Debug)]
struct DeviceState {
    server: RwLock<ServerInfo>,
    session: RwLock<Option<String>>,
    login: RwLock<Option<LoginInfo>>,
    health: RwLock<Option<HealthStatus>>,
    link: RwLock<LinkState>,
}

/// Client for one recorder.
///
/// Starting a client spawns its persistent session. Ad-hoc requests run on
/// their own short connections and report back on the shared notification channel.
#[derive(Debug)]
pub struct DeviceClient {
    name: String,
    settings: DeviceSettings,
    state: Arc<DeviceState>,
    config_pool: Arc<SessionPool>,
    command_pool: Arc<SessionPool>,
    reset_pool: Arc<SessionPool>,
    notify: mpsc::UnboundedSender<Notification>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl DeviceClient {
    /// Start the device session. Must be called inside a Tokio runtime.
    pub fn start(
        settings: DeviceSettings,
        command_pool: Arc<SessionPool>,
        reset_pool: Arc<SessionPool>,
        notify: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        let name = settings.name().to_string();
        let state = Arc::new(DeviceState {
            server: RwLock::new(settings.connect.server.clone()),
            session: RwLock::new(None),
            login: RwLock::new(None),
            health: RwLock::new(None),
            link: RwLock::new(LinkState::Disconnected),
        });
        let client = Self {
            name: name.clone(),
            settings: settings.clone(),
            state: Arc::clone(&state),
            config_pool: Arc::new(SessionPool::new("config", CONFIG_SESSIONS)),
            command_pool,
            reset_pool,
            notify: notify.clone(),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        };

        let (session, channels) = ConnectRequest::new(settings.connect.clone());
        let pump = Pump {
            name,
            max_cameras: settings.max_cameras,
            state,
            notify,
        };
        client
            .tracker
            .spawn(pump.run(session.spawn(), channels, client.cancel.clone()));
        client
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Endpoint currently used, including any port fallback.
    pub fn server(&self) -> ServerInfo {
        read(&self.state.server).clone()
    }

    pub fn link_state(&self) -> LinkState {
        *read(&self.state.link)
    }

    pub fn login_info(&self) -> Option<LoginInfo> {
        read(&self.state.login).clone()
    }

    pub fn health(&self) -> Option<HealthStatus> {
        read(&self.state.health).clone()
    }

    pub fn session_token(&self) -> Result<String> {
        read(&self.state.session)
            .clone()
            .ok_or_else(|| AppError::NotLoggedIn(self.name.clone()))
    }

    fn config_request(&self, kind: RequestKind, payload: &[u8]) -> Result<GenericRequest> {
        let profile = match kind {
            RequestKind::GetConfig => ConfigProfile::get(),
            RequestKind::SetConfig => ConfigProfile::set(),
            RequestKind::DefaultConfig => ConfigProfile::default_config(),
            other => {
                return Err(AppError::validation(format!("{other} is not a configuration request")));
            }
        };
        let session = self.session_token()?;
        Ok(GenericRequest::from_profile(self.server(), &profile, &session, payload))
    }

    /// Queue a configuration get/set/default; the reply arrives as [`DeviceEvent::Config`].
    pub fn submit_request(&self, kind: RequestKind, payload: &[u8]) -> Result<()> {
        let request = self.config_request(kind, payload)?;
        let lease = self
            .config_pool
            .lease()
            .ok_or(AppError::NoFreeSession(self.config_pool.name()))?;

        let name = self.name.clone();
        let notify = self.notify.clone();
        let cancel = self.cancel.child_token();
        self.tracker.spawn(async move {
            let reply = request.run(cancel).await;
            drop(lease);
            let _ = notify.send((name, DeviceEvent::Config { kind, reply }));
        });
        Ok(())
    }

    /// Configuration request on blocking sockets. Call from a plain thread,
    /// never from inside the async runtime.
    pub fn submit_blocking_request(&self, kind: RequestKind, payload: &[u8]) -> Result<Reply> {
        let request = self.config_request(kind, payload)?;
        let _lease = self
            .config_pool
            .lease()
            .ok_or(AppError::NoFreeSession(self.config_pool.name()))?;
        Ok(request.execute_blocking())
    }

    fn command_request(&self, command: Command, args: &[u8]) -> Result<CommandRequest> {
        let session = self.session_token()?;
        let lease = self
            .command_pool
            .lease()
            .ok_or(AppError::NoFreeSession(self.command_pool.name()))?;
        Ok(CommandRequest::new(
            lease,
            self.server(),
            &session,
            command,
            args,
            self.settings.pre_video_loss,
        ))
    }

    /// Queue a command; fails at once, without touching the network, when
    /// every command slot is taken.
    pub fn submit_command(&self, command: Command, args: &[u8]) -> Result<()> {
        let request = self.command_request(command, args)?;
        debug!("[{}] {command} on command session {}", self.name, request.session_index());

        let name = self.name.clone();
        let notify = self.notify.clone();
        let cancel = self.cancel.child_token();
        self.tracker.spawn(async move {
            let response = request.run(cancel).await;
            let _ = notify.send((name, DeviceEvent::Command(response)));
        });
        Ok(())
    }

    /// Run a command on blocking sockets. Call from a plain thread.
    pub fn submit_blocking_command(&self, command: Command, args: &[u8]) -> Result<CommandResponse> {
        let request = self.command_request(command, args)?;
        let reply = request.request().execute_blocking();
        Ok(CommandResponse {
            command,
            session_index: request.session_index(),
            reply,
        })
    }

    /// Queue a password-reset step. Needs no login.
    pub fn submit_password_reset(&self, command: PasswordResetCommand, args: &[u8]) -> Result<()> {
        let lease = self
            .reset_pool
            .lease()
            .ok_or(AppError::NoFreeSession(self.reset_pool.name()))?;
        let request = PasswordResetRequest::new(lease, self.server(), command, args);

        let name = self.name.clone();
        let notify = self.notify.clone();
        let cancel = self.cancel.child_token();
        self.tracker.spawn(async move {
            let response = request.run(cancel).await;
            let _ = notify.send((name, DeviceEvent::PasswordReset(response)));
        });
        Ok(())
    }

    /// Stop the session and every in-flight request, then wait for them.
    pub async fn shutdown(&self) {
        info!("[{}] Shutting down", self.name);
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Drop for DeviceClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Consumes session events, vets logins and publishes typed notifications.
struct Pump {
    name: String,
    max_cameras: u16,
    state: Arc<DeviceState>,
    notify: mpsc::UnboundedSender<Notification>,
}

impl Pump {
    async fn run(self, session: TaskHandle<SessionExit>, mut channels: SessionChannels, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    session.cancel();
                    break;
                }
                event = channels.events.recv() => match event {
                    Some(event) => self.on_event(event, &channels).await,
                    None => break,
                },
            }
        }

        let exit = session.wait().await.unwrap_or(SessionExit::Cancelled);
        *write(&self.state.session) = None;
        let last = std::mem::replace(&mut *write(&self.state.link), LinkState::Disconnected);
        if last == LinkState::Connected {
            info!("[{}] Disconnected", self.name);
            self.publish(DeviceEvent::Link(LinkState::Disconnected));
        }
        self.publish(DeviceEvent::SessionEnded(exit));
    }

    fn publish(&self, event: DeviceEvent) {
        let _ = self.notify.send((self.name.clone(), event));
    }

    /// Refuse logins that cannot be used safely.
    fn vet(&self, info: &LoginInfo) -> std::result::Result<(), StatusCode> {
        if info.session.is_empty() {
            warn!("[{}] Login reply carried no session token", self.name);
            return Err(StatusCode::InvalidMessage);
        }
        if info.camera_count > self.max_cameras {
            warn!(
                "[{}] Device reports {} cameras, limit is {}",
                self.name, info.camera_count, self.max_cameras
            );
            return Err(StatusCode::ResourceLimit);
        }
        Ok(())
    }

    async fn on_event(&self, event: SessionEvent, channels: &SessionChannels) {
        match event {
            SessionEvent::Endpoint(server) => {
                debug!("[{}] Using {server}", self.name);
                *write(&self.state.server) = server;
            }
            SessionEvent::LoginResult {
                status: StatusCode::Success,
                info: Some(info),
            } => {
                let decision = match self.vet(&info) {
                    Ok(()) => {
                        *write(&self.state.session) = Some(info.session.clone());
                        self.publish(DeviceEvent::LoggedIn {
                            model: info.model.clone(),
                            camera_count: info.camera_count,
                        });
                        *write(&self.state.login) = Some(info);
                        PollPermission::Proceed
                    }
                    Err(status) => {
                        self.publish(DeviceEvent::LoginFailed(status));
                        PollPermission::Abort
                    }
                };
                let _ = channels.permission.send(decision).await;
            }
            SessionEvent::LoginResult { status, .. } => {
                *write(&self.state.session) = None;
                self.publish(DeviceEvent::LoginFailed(status));
            }
            SessionEvent::Link(link) => {
                info!("[{}] {link:?}", self.name);
                *write(&self.state.link) = link;
                if link == LinkState::Disconnected {
                    *write(&self.state.session) = None;
                }
                self.publish(DeviceEvent::Link(link));
            }
            SessionEvent::Poll(reply) => {
                let health = HealthStatus::parse(&reply.payload);
                *write(&self.state.health) = Some(health.clone());
                self.publish(DeviceEvent::Health(health));
            }
            SessionEvent::Event(reply) if reply.status.is_success() => {
                for event in LiveEvent::parse_all(&reply.payload) {
                    self.publish(DeviceEvent::Live(event));
                }
            }
            SessionEvent::Event(reply) => {
                warn!("[{}] Event fetch failed: {}", self.name, reply.status);
                self.publish(DeviceEvent::EventFetchFailed(reply.status));
            }
        }
    }
}
