//! Recorder protocol constants, message kinds and status codes.

use std::fmt;

// Control bytes
pub const SOM: u8 = 0x01;
pub const EOM: u8 = 0x04;
pub const FSP: u8 = 0x1E;
pub const FVS: u8 = 0x1F;

/// Largest frame the device accepts in one request.
pub const MAX_SEND_BUFFER_SIZE: usize = 64 * 1024;

/// Safety limit for frames read in end-marker mode.
pub const MAX_RECEIVE_SIZE: usize = 1_000_000;

/// Length of the status prefix in a login reply payload.
pub(crate) const LOGIN_STATUS_LEN: usize = 3;

/// Request kinds understood by the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Login,
    Poll,
    GetConfig,
    SetConfig,
    DefaultConfig,
    SetCommand,
    EventFetch,
    PasswordReset,
}

impl RequestKind {
    pub const ALL: [RequestKind; 8] = [
        RequestKind::Login,
        RequestKind::Poll,
        RequestKind::GetConfig,
        RequestKind::SetConfig,
        RequestKind::DefaultConfig,
        RequestKind::SetCommand,
        RequestKind::EventFetch,
        RequestKind::PasswordReset,
    ];

    pub fn as_wire(self) -> &'static str {
        match self {
            RequestKind::Login => "REQ_LOG",
            RequestKind::Poll => "REQ_POL",
            RequestKind::GetConfig => "GET_CFG",
            RequestKind::SetConfig => "SET_CFG",
            RequestKind::DefaultConfig => "DEF_CFG",
            RequestKind::SetCommand => "SET_CMD",
            RequestKind::EventFetch => "REQ_EVT",
            RequestKind::PasswordReset => "PWD_RST",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_wire() == s)
    }

    /// Reply kind the device answers this request with.
    pub fn reply_kind(self) -> ResponseKind {
        match self {
            RequestKind::Login => ResponseKind::Login,
            RequestKind::Poll => ResponseKind::Poll,
            RequestKind::GetConfig | RequestKind::SetConfig | RequestKind::DefaultConfig => ResponseKind::Config,
            RequestKind::SetCommand => ResponseKind::Command,
            RequestKind::EventFetch => ResponseKind::Event,
            RequestKind::PasswordReset => ResponseKind::PasswordReset,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Reply kinds sent by the recorder.
///
/// `Unknown` absorbs kinds added by newer firmware so parsing never aborts on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    Login,
    Poll,
    Config,
    Command,
    Event,
    PasswordReset,
    Unknown,
}

impl ResponseKind {
    pub fn as_wire(self) -> &'static str {
        match self {
            ResponseKind::Login => "RPL_LOG",
            ResponseKind::Poll => "RPL_POL",
            ResponseKind::Config => "RPL_CFG",
            ResponseKind::Command => "RPL_CMD",
            ResponseKind::Event => "RPL_EVT",
            ResponseKind::PasswordReset => "RPL_PWD",
            ResponseKind::Unknown => "RPL_UNK",
        }
    }

    pub fn from_wire(s: &str) -> Self {
        match s {
            "RPL_LOG" => ResponseKind::Login,
            "RPL_POL" => ResponseKind::Poll,
            "RPL_CFG" => ResponseKind::Config,
            "RPL_CMD" => ResponseKind::Command,
            "RPL_EVT" => ResponseKind::Event,
            "RPL_PWD" => ResponseKind::PasswordReset,
            _ => ResponseKind::Unknown,
        }
    }
}

/// Status codes carried in replies, plus the client-side codes reported
/// when the device could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    InvalidSession,
    InvalidMessage,
    InvalidRequest,
    InvalidTableId,
    InvalidIndexId,
    InvalidFieldId,
    InvalidIndexRange,
    InvalidFieldRange,
    InvalidFieldValue,
    MaxBufferLimit,
    ProcessError,
    NoPrivilege,
    InvalidCredential,
    MaxUserSessions,
    UserBlocked,
    ResourceLimit,
    RequestInProgress,
    ParallelRequest,
    DiskFull,
    NoDiskFound,
    CameraDisabled,
    StreamAlreadyOn,
    NoRecordFound,
    PtzNotSupported,
    InvalidOtp,
    EventAvailable,
    ServerNotResponding,
    DeviceDisconnected,
    Other(u16),
}

const STATUS_TABLE: [(StatusCode, u16); 29] = [
    (StatusCode::Success, 0),
    (StatusCode::InvalidSession, 1),
    (StatusCode::InvalidMessage, 2),
    (StatusCode::InvalidRequest, 3),
    (StatusCode::InvalidTableId, 4),
    (StatusCode::InvalidIndexId, 5),
    (StatusCode::InvalidFieldId, 6),
    (StatusCode::InvalidIndexRange, 7),
    (StatusCode::InvalidFieldRange, 8),
    (StatusCode::InvalidFieldValue, 9),
    (StatusCode::MaxBufferLimit, 10),
    (StatusCode::ProcessError, 11),
    (StatusCode::NoPrivilege, 12),
    (StatusCode::InvalidCredential, 13),
    (StatusCode::MaxUserSessions, 14),
    (StatusCode::UserBlocked, 15),
    (StatusCode::ResourceLimit, 16),
    (StatusCode::RequestInProgress, 17),
    (StatusCode::ParallelRequest, 18),
    (StatusCode::DiskFull, 19),
    (StatusCode::NoDiskFound, 20),
    (StatusCode::CameraDisabled, 21),
    (StatusCode::StreamAlreadyOn, 22),
    (StatusCode::NoRecordFound, 23),
    (StatusCode::PtzNotSupported, 24),
    (StatusCode::InvalidOtp, 25),
    (StatusCode::EventAvailable, 26),
    (StatusCode::ServerNotResponding, 900),
    (StatusCode::DeviceDisconnected, 901),
];

impl StatusCode {
    pub fn code(self) -> u16 {
        if let StatusCode::Other(n) = self {
            return n;
        }
        STATUS_TABLE
            .iter()
            .find(|(s, _)| *s == self)
            .map(|(_, n)| *n)
            .unwrap_or_default()
    }

    pub fn from_code(code: u16) -> Self {
        STATUS_TABLE
            .iter()
            .find(|(_, n)| *n == code)
            .map(|(s, _)| *s)
            .unwrap_or(StatusCode::Other(code))
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }

    /// Whether the code was produced locally because the device never answered.
    pub fn is_transport_failure(self) -> bool {
        matches!(self, StatusCode::ServerNotResponding | StatusCode::DeviceDisconnected)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Other(n) => write!(f, "status {n}"),
            other => write!(f, "{other:?} ({})", other.code()),
        }
    }
}
