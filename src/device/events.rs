//! Typed notifications built from poll and event replies.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tracing::warn;

use crate::request::{CommandResponse, PasswordResetResponse};
use crate::session::{LinkState, SessionExit};
use crate::wire::{FSP, FVS, Reply, RequestKind, StatusCode, fields};

const EVENT_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Per-category, per-camera flags reported with every poll.
///
/// Poll payload: `<event flag> FSP <category FVS bits> FSP ...`, one `0`/`1` per camera.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthStatus {
    pub event_pending: bool,
    pub categories: BTreeMap<String, Vec<bool>>,
}

impl HealthStatus {
    pub fn parse(payload: &[u8]) -> Self {
        let parts = fields(payload, FSP);
        let mut status = HealthStatus {
            event_pending: parts.first().is_some_and(|flag| *flag == b"1"),
            ..Default::default()
        };

        for part in parts.iter().skip(1).filter(|p| !p.is_empty()) {
            let values = fields(part, FVS);
            let (Some(name), Some(bits)) = (values.first(), values.get(1)) else {
                warn!("Skipping health field without flags: {}", String::from_utf8_lossy(part));
                continue;
            };
            let name = String::from_utf8_lossy(name).trim().to_string();
            if name.is_empty() || !bits.iter().all(|b| *b == b'0' || *b == b'1') {
                warn!("Skipping malformed health field: {}", String::from_utf8_lossy(part));
                continue;
            }
            status.categories.insert(name, bits.iter().map(|b| *b == b'1').collect());
        }
        status
    }

    pub fn flags(&self, category: &str) -> Option<&[bool]> {
        self.categories.get(category).map(Vec::as_slice)
    }

    /// Flag for one camera (1-based); false when not reported.
    pub fn camera_flag(&self, category: &str, camera: usize) -> bool {
        camera
            .checked_sub(1)
            .and_then(|i| self.flags(category)?.get(i).copied())
            .unwrap_or(false)
    }
}

/// One line of the device's live event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEvent {
    pub timestamp: NaiveDateTime,
    pub kind: String,
    pub source: String,
    pub state: String,
    pub detail: String,
}

impl LiveEvent {
    /// Parse `timestamp FVS type FVS source FVS state FVS detail`.
    pub fn parse(record: &[u8]) -> Option<Self> {
        let values = fields(record, FVS);
        let text = |i: usize| {
            values
                .get(i)
                .map(|v| String::from_utf8_lossy(v).trim().to_string())
        };

        let timestamp = NaiveDateTime::parse_from_str(&text(0)?, EVENT_TIME_FORMAT).ok()?;
        let kind = text(1).filter(|k| !k.is_empty())?;
        Some(Self {
            timestamp,
            kind,
            source: text(2).unwrap_or_default(),
            state: text(3).unwrap_or_default(),
            detail: text(4).unwrap_or_default(),
        })
    }

    /// Every well-formed record in an event reply; bad records are logged and skipped.
    pub fn parse_all(payload: &[u8]) -> Vec<Self> {
        fields(payload, FSP)
            .into_iter()
            .filter(|record| !record.is_empty())
            .filter_map(|record| {
                let event = Self::parse(record);
                if event.is_none() {
                    warn!("Skipping malformed event record: {}", String::from_utf8_lossy(record));
                }
                event
            })
            .collect()
    }
}

/// Notifications a device publishes to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    LoggedIn { model: String, camera_count: u16 },
    /// Login was rejected by the device or by vetting.
    LoginFailed(StatusCode),
    Link(LinkState),
    Health(HealthStatus),
    Live(LiveEvent),
    /// The event fetch after a poll flag did not succeed.
    EventFetchFailed(StatusCode),
    /// Completion of a config get/set/default request.
    Config { kind: RequestKind, reply: Reply },
    Command(CommandResponse),
    PasswordReset(PasswordResetResponse),
    SessionEnded(SessionExit),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_health_status_parse() {
        let status = HealthStatus::parse(b"0\x1EHDD\x1F10\x1ECAMERA_ONLINE\x1F1101");
        assert!(!status.event_pending);
        assert_eq!(status.flags("HDD"), Some(&[true, false][..]));
        assert!(status.camera_flag("CAMERA_ONLINE", 1));
        assert!(!status.camera_flag("CAMERA_ONLINE", 3));
        assert!(status.camera_flag("CAMERA_ONLINE", 4));
        assert!(!status.camera_flag("CAMERA_ONLINE", 0));
        assert!(!status.camera_flag("MOTION", 1));
    }

    #[test]
    fn test_health_status_skips_bad_fields() {
        let status = HealthStatus::parse(b"1\x1EHDD\x1E\x1FSOLO\x1ERECORDING\x1F1x1\x1EALARM\x1F01");
        assert!(status.event_pending);
        assert_eq!(status.categories.len(), 1);
        assert_eq!(status.flags("ALARM"), Some(&[false, true][..]));
    }

    #[test]
    fn test_live_event_parse() {
        let event = LiveEvent::parse(b"20261017093005\x1FMOTION\x1F3\x1FSTART\x1Fzone 2").unwrap();
        assert_eq!(
            event.timestamp,
            NaiveDate::from_ymd_opt(2026, 10, 17)
                .unwrap()
                .and_hms_opt(9, 30, 5)
                .unwrap()
        );
        assert_eq!(event.kind, "MOTION");
        assert_eq!(event.source, "3");
        assert_eq!(event.state, "START");
        assert_eq!(event.detail, "zone 2");
    }

    #[test]
    fn test_parse_all_skips_malformed_records() {
        let payload = b"20261017093005\x1FMOTION\x1F3\x1FSTART\x1F\x1Enot-a-time\x1FMOTION\x1E20261017093010\x1FVIDEO_LOSS\x1F1";
        let events = LiveEvent::parse_all(payload);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, "VIDEO_LOSS");
        assert!(events[1].state.is_empty());
        assert!(LiveEvent::parse_all(b"").is_empty());
    }
}
