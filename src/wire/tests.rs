//! Unit tests for the recorder wire codec.

use super::*;

#[test]
fn test_encode_request_layout() {
    let frame = encode_request(RequestKind::Poll, "42", b"").unwrap();

    assert_eq!(frame[0], SOM);
    assert_eq!(&frame[1..8], b"REQ_POL");
    assert_eq!(frame[8], FSP);
    assert_eq!(&frame[9..11], b"42");
    assert_eq!(frame[11], FSP);
    assert_eq!(*frame.last().unwrap(), EOM);
    assert_eq!(frame.len(), 13);
}

#[test]
fn test_request_round_trip_all_kinds() {
    let payload = [&b"CAM"[..], &[FSP], &b"3"[..], &[FVS], &b"on"[..]].concat();
    for kind in RequestKind::ALL {
        let frame = encode_request(kind, "session-7", &payload).unwrap();
        let decoded = decode_request(&frame).unwrap();
        assert_eq!(decoded.kind, kind);
        assert_eq!(decoded.session, "session-7");
        assert_eq!(decoded.payload, payload);
    }
}

#[test]
fn test_encode_request_size_exceeded() {
    let payload = vec![b'x'; MAX_SEND_BUFFER_SIZE];
    let err = encode_request(RequestKind::SetConfig, "1", &payload).unwrap_err();
    assert!(matches!(err, CodecError::SizeExceeded { max: MAX_SEND_BUFFER_SIZE, .. }));
}

#[test]
fn test_reply_round_trip() {
    let frame = encode_reply(ResponseKind::Config, StatusCode::NoPrivilege, b"a\x1Eb");
    let reply = decode_reply(&frame).unwrap();

    assert_eq!(reply.kind, ResponseKind::Config);
    assert_eq!(reply.status, StatusCode::NoPrivilege);
    assert_eq!(reply.session, None);
    assert_eq!(reply.payload, b"a\x1Eb");
}

#[test]
fn test_login_reply_round_trip() {
    let frame = encode_login_reply("777", StatusCode::Success, b"60\x1E10\x1E16\x1ENVR");
    let reply = decode_reply(&frame).unwrap();

    assert_eq!(reply.kind, ResponseKind::Login);
    assert_eq!(reply.status, StatusCode::Success);
    assert_eq!(reply.session.as_deref(), Some("777"));
    assert_eq!(reply.payload, b"60\x1E10\x1E16\x1ENVR");
}

#[test]
fn test_login_status_taken_from_payload_prefix() {
    // A login reply framed like any other reply: the status field is read
    // as the session token and the first three payload characters become the status.
    let frame = encode_reply(ResponseKind::Login, StatusCode::Success, b"013rest");
    let reply = decode_reply(&frame).unwrap();

    assert_eq!(reply.session.as_deref(), Some("0"));
    assert_eq!(reply.status, StatusCode::InvalidCredential);
    assert_eq!(reply.payload, b"rest");
}

#[test]
fn test_login_reply_too_short_is_malformed() {
    let frame = encode_reply(ResponseKind::Login, StatusCode::Success, b"0");
    assert!(matches!(decode_reply(&frame), Err(CodecError::Malformed(_))));
}

#[test]
fn test_unknown_reply_kind_is_sentinel() {
    let mut frame = vec![SOM];
    frame.extend_from_slice(b"RPL_NEW");
    frame.push(FSP);
    frame.extend_from_slice(b"0");
    frame.push(FSP);
    frame.extend_from_slice(b"data");
    frame.push(EOM);

    let reply = decode_reply(&frame).unwrap();
    assert_eq!(reply.kind, ResponseKind::Unknown);
    assert_eq!(reply.status, StatusCode::Success);
}

#[test]
fn test_decode_needs_more_bytes() {
    let frame = encode_reply(ResponseKind::Poll, StatusCode::Success, b"0");
    assert_eq!(decode_reply(&frame[..frame.len() - 1]), Err(CodecError::Incomplete));
    assert_eq!(decode_reply(&[]), Err(CodecError::Incomplete));
}

#[test]
fn test_decode_rejects_missing_start() {
    assert_eq!(decode_reply(b"RPL_POL\x1E0\x1E\x04"), Err(CodecError::MissingStart));
}

#[test]
fn test_decode_rejects_two_fields() {
    let frame = [&[SOM][..], &b"RPL_POL"[..], &[FSP], &b"0"[..], &[EOM]].concat();
    assert!(matches!(decode_reply(&frame), Err(CodecError::Malformed(_))));
}

#[test]
fn test_decode_rejects_non_numeric_status() {
    let frame = [&[SOM][..], &b"RPL_CMD"[..], &[FSP], &b"ok"[..], &[FSP], &[EOM]].concat();
    assert!(matches!(decode_reply(&frame), Err(CodecError::Malformed(_))));
}

#[test]
fn test_idle_decode_keeps_embedded_eom() {
    let bitmap = [0x00, EOM, 0xFF, EOM, 0x10];
    let frame = encode_reply(ResponseKind::Config, StatusCode::Success, &bitmap);

    // The end-marker decoder stops at the first EOM inside the bitmap.
    let early = decode_reply(&frame).unwrap();
    assert_eq!(early.payload, vec![0x00]);

    let full = decode_reply_idle(&frame).unwrap();
    assert_eq!(full.payload, bitmap);
}

#[test]
fn test_status_code_mapping() {
    assert_eq!(StatusCode::from_code(0), StatusCode::Success);
    assert_eq!(StatusCode::from_code(13), StatusCode::InvalidCredential);
    assert_eq!(StatusCode::from_code(555), StatusCode::Other(555));
    assert_eq!(StatusCode::Other(555).code(), 555);
    assert_eq!(StatusCode::ServerNotResponding.code(), 900);
    assert!(StatusCode::DeviceDisconnected.is_transport_failure());
}

#[test]
fn test_fields_split_and_join() {
    let joined = join_fields(&["1", "", "abc"], FSP);
    let parts = fields(&joined, FSP);
    assert_eq!(parts, vec![&b"1"[..], &b""[..], &b"abc"[..]]);
    assert!(fields(b"", FSP).is_empty());
}
