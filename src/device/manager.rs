//! Registry of device clients sharing one set of session pools.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use super::client::DeviceClient;
use super::events::DeviceEvent;
use super::DeviceSettings;
use crate::error::{AppError, Result};
use crate::request::{
    COMMAND_SESSIONS, Command, CommandResponse, PASSWORD_RESET_SESSIONS, PasswordResetCommand, SessionPool,
};
use crate::wire::{Reply, RequestKind};

/// A device event tagged with the device name.
pub type Notification = (String, DeviceEvent);

/// All configured devices, addressed by name.
///
/// Owns the process-wide command and password-reset pools and hands them to
/// every client, so the limits hold across devices.
#[derive(Debug)]
pub struct DeviceManager {
    devices: BTreeMap<String, DeviceClient>,
    command_pool: Arc<SessionPool>,
    reset_pool: Arc<SessionPool>,
    notify: mpsc::UnboundedSender<Notification>,
}

impl DeviceManager {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notify, rx) = mpsc::unbounded_channel();
        let manager = Self {
            devices: BTreeMap::new(),
            command_pool: Arc::new(SessionPool::new("command", COMMAND_SESSIONS)),
            reset_pool: Arc::new(SessionPool::new("password reset", PASSWORD_RESET_SESSIONS)),
            notify,
        };
        (manager, rx)
    }

    /// Start a device. Names must be unique.
    pub fn add_device(&mut self, settings: DeviceSettings) -> Result<()> {
        let name = settings.name().to_string();
        if self.devices.contains_key(&name) {
            return Err(AppError::validation(format!("device {name} already registered")));
        }
        info!("Adding device {name} at {}", settings.connect.server);
        let client = DeviceClient::start(
            settings,
            Arc::clone(&self.command_pool),
            Arc::clone(&self.reset_pool),
            self.notify.clone(),
        );
        self.devices.insert(name, client);
        Ok(())
    }

    /// Stop a device and wait for its tasks.
    pub async fn remove_device(&mut self, name: &str) -> Result<()> {
        let client = self
            .devices
            .remove(name)
            .ok_or_else(|| AppError::UnknownDevice(name.to_string()))?;
        client.shutdown().await;
        Ok(())
    }

    pub fn device(&self, name: &str) -> Result<&DeviceClient> {
        self.devices
            .get(name)
            .ok_or_else(|| AppError::UnknownDevice(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn submit_request(&self, name: &str, kind: RequestKind, payload: &[u8]) -> Result<()> {
        self.device(name)?.submit_request(kind, payload)
    }

    /// Blocking variant of [`submit_request`](Self::submit_request); call from a plain thread.
    pub fn submit_blocking_request(&self, name: &str, kind: RequestKind, payload: &[u8]) -> Result<Reply> {
        self.device(name)?.submit_blocking_request(kind, payload)
    }

    pub fn submit_command(&self, name: &str, command: Command, args: &[u8]) -> Result<()> {
        self.device(name)?.submit_command(command, args)
    }

    pub fn submit_blocking_command(&self, name: &str, command: Command, args: &[u8]) -> Result<CommandResponse> {
        self.device(name)?.submit_blocking_command(command, args)
    }

    pub fn submit_password_reset(&self, name: &str, command: PasswordResetCommand, args: &[u8]) -> Result<()> {
        self.device(name)?.submit_password_reset(command, args)
    }

    /// Reserve a command slot by hand. Pair with [`release_command_session`](Self::release_command_session).
    pub fn get_free_command_session(&self) -> Option<usize> {
        self.command_pool.get_free_session()
    }

    pub fn release_command_session(&self, index: usize) {
        self.command_pool.release_session(index);
    }

    pub fn command_pool(&self) -> &Arc<SessionPool> {
        &self.command_pool
    }

    /// Stop every device and wait for all of them.
    pub async fn shutdown(&mut self) {
        for (_, client) in std::mem::take(&mut self.devices) {
            client.shutdown().await;
        }
        self.command_pool.reset();
        self.reset_pool.reset();
    }
}
