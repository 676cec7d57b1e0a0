//! Request exchanges against an in-process fake recorder.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::*;
use crate::testing::{FakeRecorder, Reaction, closed_port};
use crate::wire::{EOM, MAX_SEND_BUFFER_SIZE, ResponseKind, StatusCode, encode_reply};

fn config_info(timeout: Duration) -> RequestInfo {
    RequestInfo {
        session: "55".to_string(),
        kind: crate::wire::RequestKind::GetConfig,
        payload: b"TABLE_GENERAL".to_vec(),
        timeout,
    }
}

#[tokio::test]
async fn test_get_config_success() {
    let fake = FakeRecorder::start(|req| {
        assert_eq!(req.session, "55");
        Reaction::Reply(encode_reply(ResponseKind::Config, StatusCode::Success, b"NVR-1\x1E16"))
    })
    .await;

    let request = GenericRequest::new(fake.server(), config_info(Duration::from_secs(2)));
    let reply = request.execute(&CancellationToken::new()).await;

    assert_eq!(reply.kind, ResponseKind::Config);
    assert_eq!(reply.status, StatusCode::Success);
    assert_eq!(reply.payload, b"NVR-1\x1E16");
    assert_eq!(fake.requests()[0].payload, b"TABLE_GENERAL");
}

#[tokio::test]
async fn test_device_status_passed_through() {
    let fake = FakeRecorder::start(|_| {
        Reaction::Reply(encode_reply(ResponseKind::Config, StatusCode::NoPrivilege, b""))
    })
    .await;

    let reply = GenericRequest::new(fake.server(), config_info(Duration::from_secs(2)))
        .execute(&CancellationToken::new())
        .await;
    assert_eq!(reply.status, StatusCode::NoPrivilege);
}

#[tokio::test]
async fn test_unreachable_device_reports_server_not_responding() {
    let server = ServerInfo::new("127.0.0.1", closed_port().await);
    let reply = GenericRequest::new(server, config_info(Duration::from_secs(1)))
        .execute(&CancellationToken::new())
        .await;
    assert_eq!(reply.status, StatusCode::ServerNotResponding);
}

#[tokio::test]
async fn test_oversized_request_never_connects() {
    let fake = FakeRecorder::start(|_| Reaction::Silent).await;
    let mut info = config_info(Duration::from_secs(1));
    info.payload = vec![b'x'; MAX_SEND_BUFFER_SIZE];

    let reply = GenericRequest::new(fake.server(), info).execute(&CancellationToken::new()).await;

    assert_eq!(reply.status, StatusCode::MaxBufferLimit);
    assert_eq!(fake.connections(), 0);
}

#[tokio::test]
async fn test_silent_device_times_out() {
    let fake = FakeRecorder::start(|_| Reaction::Silent).await;
    let started = Instant::now();
    let reply = GenericRequest::new(fake.server(), config_info(Duration::from_millis(300)))
        .execute(&CancellationToken::new())
        .await;

    assert_eq!(reply.status, StatusCode::ServerNotResponding);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_malformed_reply_is_unknown() {
    let fake = FakeRecorder::start(|_| Reaction::Reply(b"\x01RPL_CFG\x1Enot-a-status\x1E\x04".to_vec())).await;
    let reply = GenericRequest::new(fake.server(), config_info(Duration::from_secs(2)))
        .execute(&CancellationToken::new())
        .await;

    assert_eq!(reply.kind, ResponseKind::Unknown);
    assert_eq!(reply.status, StatusCode::InvalidMessage);
}

#[tokio::test]
async fn test_split_reply_reassembled() {
    let fake = FakeRecorder::start(|_| {
        Reaction::Split(
            encode_reply(ResponseKind::Config, StatusCode::Success, b"0123456789abcdef"),
            Duration::from_millis(100),
        )
    })
    .await;

    let reply = GenericRequest::new(fake.server(), config_info(Duration::from_secs(2)))
        .execute(&CancellationToken::new())
        .await;
    assert_eq!(reply.payload, b"0123456789abcdef");
}

#[tokio::test]
async fn test_idle_receive_keeps_embedded_end_markers() {
    let bitmap = vec![0x10, EOM, 0x00, EOM, EOM, 0x7F];
    let reply_bytes = encode_reply(ResponseKind::Command, StatusCode::Success, &bitmap);
    let fake = FakeRecorder::start(move |_| Reaction::ReplyAndHold(reply_bytes.clone())).await;

    let reply = GenericRequest::new(fake.server(), config_info(Duration::from_secs(3)))
        .with_receive_mode(ReceiveMode::UntilIdle)
        .execute(&CancellationToken::new())
        .await;

    assert_eq!(reply.status, StatusCode::Success);
    assert_eq!(reply.payload, bitmap);
}

#[tokio::test]
async fn test_bounded_receive_stops_at_limit() {
    let image = vec![0xAB; 20_000];
    let reply_bytes = encode_reply(ResponseKind::Command, StatusCode::Success, &image);
    let fake = FakeRecorder::start(move |_| Reaction::ReplyAndHold(reply_bytes.clone())).await;

    let started = Instant::now();
    let reply = GenericRequest::new(fake.server(), config_info(Duration::from_secs(5)))
        .with_receive_mode(ReceiveMode::Bounded { max: 4096 })
        .execute(&CancellationToken::new())
        .await;

    assert_eq!(reply.status, StatusCode::MaxBufferLimit);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_bounded_receive_never_truncates_at_embedded_end_marker() {
    // Every 256 bytes the image holds an end-marker byte.
    let image: Vec<u8> = (0..=255u8).cycle().take(20_000).collect();
    let reply_bytes = encode_reply(ResponseKind::Command, StatusCode::Success, &image);
    let fake = FakeRecorder::start(move |_| Reaction::ReplyAndHold(reply_bytes.clone())).await;

    let reply = GenericRequest::new(fake.server(), config_info(Duration::from_secs(5)))
        .with_receive_mode(ReceiveMode::Bounded { max: 4096 })
        .execute(&CancellationToken::new())
        .await;

    assert_eq!(reply.status, StatusCode::MaxBufferLimit);
    assert!(reply.payload.is_empty());
}

#[tokio::test]
async fn test_bounded_receive_accepts_reply_of_exact_limit() {
    let image: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
    let reply_bytes = encode_reply(ResponseKind::Command, StatusCode::Success, &image);
    let max = reply_bytes.len();
    let fake = FakeRecorder::start(move |_| Reaction::ReplyAndHold(reply_bytes.clone())).await;

    let reply = GenericRequest::new(fake.server(), config_info(Duration::from_secs(5)))
        .with_receive_mode(ReceiveMode::Bounded { max })
        .execute(&CancellationToken::new())
        .await;

    assert_eq!(reply.status, StatusCode::Success);
    assert_eq!(reply.payload, image);
}

#[tokio::test]
async fn test_blocking_bounded_receive_rejects_oversized_reply() {
    let image: Vec<u8> = (0..=255u8).cycle().take(20_000).collect();
    let reply_bytes = encode_reply(ResponseKind::Command, StatusCode::Success, &image);
    let fake = FakeRecorder::start(move |_| Reaction::ReplyAndHold(reply_bytes.clone())).await;

    let request = GenericRequest::new(fake.server(), config_info(Duration::from_secs(5)))
        .with_receive_mode(ReceiveMode::Bounded { max: 4096 });
    let reply = tokio::task::spawn_blocking(move || request.execute_blocking()).await.unwrap();

    assert_eq!(reply.status, StatusCode::MaxBufferLimit);
}

#[tokio::test]
async fn test_request_timeout_spans_connect_and_receive() {
    let port = closed_port().await;
    let request = GenericRequest::new(ServerInfo::new("127.0.0.1", port), config_info(Duration::from_millis(1500)));

    // The first attempt is refused; the retry one slice later finds a silent device.
    let started = Instant::now();
    let handle = request.spawn();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let fake = FakeRecorder::start_on(port, |_| Reaction::Silent).await;
    let reply = handle.wait().await.unwrap();

    assert_eq!(reply.status, StatusCode::ServerNotResponding);
    assert_eq!(fake.requests().len(), 1);
    assert!(started.elapsed() < Duration::from_millis(2200));
}

#[tokio::test]
async fn test_snapshot_read_until_peer_closes() {
    let image: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let reply_bytes = encode_reply(ResponseKind::Command, StatusCode::Success, &image);
    let fake = FakeRecorder::start(move |_| Reaction::Reply(reply_bytes.clone())).await;

    let pool = Arc::new(SessionPool::new("command", COMMAND_SESSIONS));
    let request = CommandRequest::new(
        pool.lease().unwrap(),
        fake.server(),
        "55",
        Command::Snapshot,
        b"1",
        Duration::from_secs(10),
    );
    assert_eq!(request.request().receive_mode(), ReceiveMode::Bounded { max: SNAPSHOT_MAX_SIZE });

    let response = request.run(CancellationToken::new()).await;
    assert_eq!(response.reply.payload, image);
}

#[tokio::test]
async fn test_command_releases_slot_and_reports_index() {
    let fake = FakeRecorder::start(|req| {
        assert!(req.payload.starts_with(b"PTZ_CTRL\x1E"));
        Reaction::Reply(encode_reply(ResponseKind::Command, StatusCode::Success, b""))
    })
    .await;

    let pool = Arc::new(SessionPool::new("command", COMMAND_SESSIONS));
    let _held = pool.lease().unwrap();
    let lease = pool.lease().unwrap();
    assert_eq!(pool.in_use(), 2);

    let handle = CommandRequest::new(lease, fake.server(), "55", Command::PtzControl, b"1", Duration::ZERO).spawn();
    let response = handle.wait().await.unwrap();

    assert_eq!(response.command, Command::PtzControl);
    assert_eq!(response.session_index, 1);
    assert_eq!(response.reply.status, StatusCode::Success);
    assert_eq!(pool.in_use(), 1);
}

#[tokio::test]
async fn test_password_reset_has_no_session() {
    let fake = FakeRecorder::start(|req| {
        assert_eq!(req.session, "");
        Reaction::Reply(encode_reply(ResponseKind::PasswordReset, StatusCode::InvalidOtp, b""))
    })
    .await;

    let pool = Arc::new(SessionPool::new("password reset", PASSWORD_RESET_SESSIONS));
    let request = PasswordResetRequest::new(
        pool.lease().unwrap(),
        fake.server(),
        PasswordResetCommand::VerifyOtp,
        b"admin\x1E123456",
    );
    let response = request.run(CancellationToken::new()).await;

    assert_eq!(response.reply.status, StatusCode::InvalidOtp);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn test_cancel_stops_waiting() {
    let fake = FakeRecorder::start(|_| Reaction::Silent).await;
    let handle = GenericRequest::new(fake.server(), config_info(Duration::from_secs(20))).spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = Instant::now();
    handle.cancel();
    let reply = handle.wait().await.unwrap();

    assert_eq!(reply.status, StatusCode::ServerNotResponding);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_blocking_variant_returns_reply() {
    let fake = FakeRecorder::start(|_| {
        Reaction::Reply(encode_reply(ResponseKind::Command, StatusCode::Success, b"20261017101500"))
    })
    .await;

    let request = GenericRequest::new(fake.server(), config_info(Duration::from_secs(2)));
    let reply = tokio::task::spawn_blocking(move || request.execute_blocking()).await.unwrap();

    assert_eq!(reply.status, StatusCode::Success);
    assert_eq!(reply.payload, b"20261017101500");
}

#[tokio::test]
async fn test_blocking_variant_unreachable() {
    let server = ServerInfo::new("127.0.0.1", closed_port().await);
    let request = GenericRequest::new(server, config_info(Duration::from_secs(1)));
    let reply = tokio::task::spawn_blocking(move || request.execute_blocking()).await.unwrap();
    assert_eq!(reply.status, StatusCode::ServerNotResponding);
}

#[test]
fn test_socket_addr_brackets_ipv6() {
    assert_eq!(ServerInfo::new("::1", 8000).socket_addr(), "[::1]:8000");
    assert_eq!(ServerInfo::new("10.0.0.2", 8000).to_string(), "10.0.0.2:8000");
}
