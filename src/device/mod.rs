//! Per-device orchestration and the process-wide device registry.

mod client;
mod events;
mod manager;


use std::time::Duration;

use crate::session::ConnectOptions;

pub use client::DeviceClient;
pub use events::{DeviceEvent, HealthStatus, LiveEvent};
pub use manager::{DeviceManager, Notification};

/// Everything needed to bring one device online.
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub connect: ConnectOptions,
    /// Logins advertising more cameras than this are refused.
    pub max_cameras: u16,
    /// How long live view start may take before the device reports video loss.
    pub pre_video_loss: Duration,
}

impl DeviceSettings {
    pub fn new(connect: ConnectOptions) -> Self {
        Self {
            connect,
            max_cameras: 64,
            pre_video_loss: Duration::from_secs(10),
        }
    }

    pub fn name(&self) -> &str {
        &self.connect.name
    }
}
