//! Device commands (PTZ, playback search, live view, maintenance).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::generic::GenericRequest;
use super::pool::SessionLease;
use super::task::NetworkTask;
use super::{ReceiveMode, RequestProfile, SNAPSHOT_MAX_SIZE, ServerInfo};
use crate::error::AppError;
use crate::wire::{FSP, Reply, RequestKind};

/// Commands carried by `SET_CMD` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    StartLiveStream,
    StopLiveStream,
    ChangeLiveStreamType,
    PtzControl,
    PtzPresetGoto,
    PtzTourStart,
    PtzTourStop,
    FocusControl,
    IrisControl,
    SearchRecord,
    SearchMonthRecord,
    StartPlayback,
    PausePlayback,
    StopPlayback,
    SearchEventLog,
    GetDateTime,
    SetDateTime,
    StartManualRecord,
    StopManualRecord,
    ManualAlarmOutput,
    Snapshot,
    GetCameraInfo,
    GetMacAddress,
    GetHealthStatus,
    ChangePassword,
    Logout,
    RestartDevice,
    ShutdownDevice,
    FormatDisk,
    UpgradeFirmware,
}

impl Command {
    pub const ALL: [Command; 30] = [
        Command::StartLiveStream,
        Command::StopLiveStream,
        Command::ChangeLiveStreamType,
        Command::PtzControl,
        Command::PtzPresetGoto,
        Command::PtzTourStart,
        Command::PtzTourStop,
        Command::FocusControl,
        Command::IrisControl,
        Command::SearchRecord,
        Command::SearchMonthRecord,
        Command::StartPlayback,
        Command::PausePlayback,
        Command::StopPlayback,
        Command::SearchEventLog,
        Command::GetDateTime,
        Command::SetDateTime,
        Command::StartManualRecord,
        Command::StopManualRecord,
        Command::ManualAlarmOutput,
        Command::Snapshot,
        Command::GetCameraInfo,
        Command::GetMacAddress,
        Command::GetHealthStatus,
        Command::ChangePassword,
        Command::Logout,
        Command::RestartDevice,
        Command::ShutdownDevice,
        Command::FormatDisk,
        Command::UpgradeFirmware,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            Command::StartLiveStream => "SRT_LV_STRM",
            Command::StopLiveStream => "STP_LV_STRM",
            Command::ChangeLiveStreamType => "CHG_LV_STRM",
            Command::PtzControl => "PTZ_CTRL",
            Command::PtzPresetGoto => "PTZ_PRST_GO",
            Command::PtzTourStart => "SRT_PTZ_TOUR",
            Command::PtzTourStop => "STP_PTZ_TOUR",
            Command::FocusControl => "FOCUS_CTRL",
            Command::IrisControl => "IRIS_CTRL",
            Command::SearchRecord => "SRCH_RCD",
            Command::SearchMonthRecord => "SRCH_MNTH_RCD",
            Command::StartPlayback => "PLYBCK_RCD",
            Command::PausePlayback => "PAUSE_PLYBCK",
            Command::StopPlayback => "STP_PLYBCK",
            Command::SearchEventLog => "SRCH_EVT_LOG",
            Command::GetDateTime => "GET_DATE_TIME",
            Command::SetDateTime => "SET_DATE_TIME",
            Command::StartManualRecord => "SRT_MAN_REC",
            Command::StopManualRecord => "STP_MAN_REC",
            Command::ManualAlarmOutput => "ALRM_OUT",
            Command::Snapshot => "SNP_SHT",
            Command::GetCameraInfo => "GET_CAM_INFO",
            Command::GetMacAddress => "GET_MAC",
            Command::GetHealthStatus => "GET_STATUS",
            Command::ChangePassword => "CHG_PWD",
            Command::Logout => "LOGOUT",
            Command::RestartDevice => "RESTRT_DEV",
            Command::ShutdownDevice => "SHUTDOWN_DEV",
            Command::FormatDisk => "FORMAT_HDD",
            Command::UpgradeFirmware => "UPGRD_FIRMWARE",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.wire_name() == name)
    }

    /// Seconds to wait for the reply.
    pub fn timeout_secs(self) -> u64 {
        match self {
            Command::StartLiveStream => 10,
            Command::StopLiveStream | Command::ChangeLiveStreamType => 10,
            Command::PtzControl
            | Command::PtzPresetGoto
            | Command::PtzTourStart
            | Command::PtzTourStop
            | Command::FocusControl
            | Command::IrisControl => 10,
            Command::SearchRecord | Command::SearchEventLog => 60,
            Command::SearchMonthRecord => 30,
            Command::StartPlayback => 30,
            Command::PausePlayback | Command::StopPlayback => 10,
            Command::GetDateTime => 5,
            Command::SetDateTime => 10,
            Command::StartManualRecord | Command::StopManualRecord | Command::ManualAlarmOutput => 10,
            Command::Snapshot => 20,
            Command::GetCameraInfo | Command::GetMacAddress | Command::GetHealthStatus => 10,
            Command::ChangePassword => 10,
            Command::Logout => 5,
            Command::RestartDevice | Command::ShutdownDevice => 20,
            Command::FormatDisk => 300,
            Command::UpgradeFirmware => 600,
        }
    }

    /// Replies that carry raw binary data are read until the device goes quiet.
    pub fn receive_mode(self) -> ReceiveMode {
        match self {
            Command::Snapshot => ReceiveMode::Bounded { max: SNAPSHOT_MAX_SIZE },
            Command::SearchMonthRecord => ReceiveMode::UntilIdle,
            _ => ReceiveMode::UntilEom,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Command {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire_name(&s.to_ascii_uppercase()).ok_or_else(|| AppError::parse(format!("unknown command {s}")))
    }
}

/// Framing and timeout policy for one command.
///
/// Live view start waits for the configured pre-video-loss duration
/// instead of the table entry.
#[derive(Debug, Clone, Copy)]
pub struct CommandProfile {
    command: Command,
    pre_video_loss: Duration,
}

impl CommandProfile {
    pub fn new(command: Command, pre_video_loss: Duration) -> Self {
        Self {
            command,
            pre_video_loss,
        }
    }

    pub fn command(&self) -> Command {
        self.command
    }
}

impl RequestProfile for CommandProfile {
    fn kind(&self) -> RequestKind {
        RequestKind::SetCommand
    }

    fn timeout(&self) -> Duration {
        match self.command {
            Command::StartLiveStream => self.pre_video_loss.max(Duration::from_secs(1)),
            other => Duration::from_secs(other.timeout_secs()),
        }
    }

    fn frame_payload(&self, args: &[u8]) -> Vec<u8> {
        let name = self.command.wire_name().as_bytes();
        let mut payload = Vec::with_capacity(name.len() + 1 + args.len());
        payload.extend_from_slice(name);
        payload.push(FSP);
        payload.extend_from_slice(args);
        payload
    }

    fn receive_mode(&self) -> ReceiveMode {
        self.command.receive_mode()
    }
}

/// Reply to a command, tagged with the slot that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub command: Command,
    pub session_index: usize,
    pub reply: Reply,
}

/// A command running on a reserved command session slot.
#[derive(Debug)]
pub struct CommandRequest {
    command: Command,
    lease: SessionLease,
    request: GenericRequest,
}

impl CommandRequest {
    pub fn new(
        lease: SessionLease,
        server: ServerInfo,
        session: &str,
        command: Command,
        args: &[u8],
        pre_video_loss: Duration,
    ) -> Self {
        let profile = CommandProfile::new(command, pre_video_loss);
        Self {
            command,
            lease,
            request: GenericRequest::from_profile(server, &profile, session, args),
        }
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn session_index(&self) -> usize {
        self.lease.index()
    }

    pub fn request(&self) -> &GenericRequest {
        &self.request
    }
}

impl NetworkTask for CommandRequest {
    type Output = CommandResponse;

    async fn run(self, cancel: CancellationToken) -> CommandResponse {
        let reply = self.request.execute(&cancel).await;
        let session_index = self.lease.index();
        drop(self.lease);
        CommandResponse {
            command: self.command,
            session_index,
            reply,
        }
    }
}
