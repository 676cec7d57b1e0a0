//! Credential recovery requests.
//!
//! Uses its own small session pool so recovery never waits on command traffic.

use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::generic::GenericRequest;
use super::pool::SessionLease;
use super::task::NetworkTask;
use super::{RequestProfile, ServerInfo};
use crate::wire::{FSP, Reply, RequestKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PasswordResetCommand {
    GetResetInfo,
    GenerateOtp,
    VerifyOtp,
    VerifySecurityAnswers,
    SetNewPassword,
}

impl PasswordResetCommand {
    pub const ALL: [PasswordResetCommand; 5] = [
        PasswordResetCommand::GetResetInfo,
        PasswordResetCommand::GenerateOtp,
        PasswordResetCommand::VerifyOtp,
        PasswordResetCommand::VerifySecurityAnswers,
        PasswordResetCommand::SetNewPassword,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            PasswordResetCommand::GetResetInfo => "GET_PWD_RST_INFO",
            PasswordResetCommand::GenerateOtp => "GEN_PWD_RST_OTP",
            PasswordResetCommand::VerifyOtp => "VERIFY_PWD_RST_OTP",
            PasswordResetCommand::VerifySecurityAnswers => "VERIFY_PWD_RST_QA",
            PasswordResetCommand::SetNewPassword => "SET_NEW_PWD",
        }
    }

    pub fn timeout_secs(self) -> u64 {
        match self {
            PasswordResetCommand::GenerateOtp => 30,
            _ => 10,
        }
    }
}

impl fmt::Display for PasswordResetCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PasswordResetProfile(pub PasswordResetCommand);

impl RequestProfile for PasswordResetProfile {
    fn kind(&self) -> RequestKind {
        RequestKind::PasswordReset
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.0.timeout_secs())
    }

    fn frame_payload(&self, args: &[u8]) -> Vec<u8> {
        let mut payload = self.0.wire_name().as_bytes().to_vec();
        payload.push(FSP);
        payload.extend_from_slice(args);
        payload
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordResetResponse {
    pub command: PasswordResetCommand,
    pub session_index: usize,
    pub reply: Reply,
}

/// A password-reset request on a reserved slot. Runs without a login session.
#[derive(Debug)]
pub struct PasswordResetRequest {
    command: PasswordResetCommand,
    lease: SessionLease,
    request: GenericRequest,
}

impl PasswordResetRequest {
    pub fn new(lease: SessionLease, server: ServerInfo, command: PasswordResetCommand, args: &[u8]) -> Self {
        Self {
            command,
            lease,
            request: GenericRequest::from_profile(server, &PasswordResetProfile(command), "", args),
        }
    }

    pub fn session_index(&self) -> usize {
        self.lease.index()
    }
}

impl NetworkTask for PasswordResetRequest {
    type Output = PasswordResetResponse;

    async fn run(self, cancel: CancellationToken) -> PasswordResetResponse {
        let reply = self.request.execute(&cancel).await;
        let session_index = self.lease.index();
        drop(self.lease);
        PasswordResetResponse {
            command: self.command,
            session_index,
            reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_vocabulary_is_total() {
        for command in PasswordResetCommand::ALL {
            assert!(command.timeout_secs() >= 1);
            let info = PasswordResetProfile(command).request_info("", b"admin");
            assert_eq!(info.kind, RequestKind::PasswordReset);
            assert!(info.payload.starts_with(command.wire_name().as_bytes()));
            assert!(info.payload.ends_with(b"\x1Eadmin"));
        }
    }
}
