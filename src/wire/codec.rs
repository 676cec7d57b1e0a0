//! Frame building and parsing.
//!
//! Request:  `SOM kind FSP session FSP payload EOM`
//! Reply:    `SOM kind FSP status FSP payload EOM`
//!
//! Login replies are the odd one out: the second field carries the session
//! token and the status is the first three characters of the payload.

use thiserror::Error;

use super::types::{
    EOM, FSP, LOGIN_STATUS_LEN, MAX_SEND_BUFFER_SIZE, RequestKind, ResponseKind, SOM, StatusCode,
};

/// Framing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame of {size} bytes exceeds send buffer of {max} bytes")]
    SizeExceeded { size: usize, max: usize },

    /// More bytes are needed before the frame can be parsed.
    #[error("Incomplete frame")]
    Incomplete,

    #[error("Frame does not start with SOM")]
    MissingStart,

    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// A decoded request, as seen by the device side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub kind: RequestKind,
    pub session: String,
    pub payload: Vec<u8>,
}

/// A decoded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ResponseKind,
    pub status: StatusCode,
    /// Session token handed out by a login reply.
    pub session: Option<String>,
    pub payload: Vec<u8>,
}

impl Reply {
    /// Reply reported for a request that never got an answer.
    pub fn failed(status: StatusCode) -> Self {
        Self {
            kind: ResponseKind::Unknown,
            status,
            session: None,
            payload: Vec::new(),
        }
    }

    /// Sentinel for replies that could not be parsed.
    pub fn unknown() -> Self {
        Self::failed(StatusCode::InvalidMessage)
    }

    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Build a request frame.
pub fn encode_request(kind: RequestKind, session: &str, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let wire = kind.as_wire().as_bytes();
    let size = 1 + wire.len() + 1 + session.len() + 1 + payload.len() + 1;
    if size > MAX_SEND_BUFFER_SIZE {
        return Err(CodecError::SizeExceeded {
            size,
            max: MAX_SEND_BUFFER_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(size);
    frame.push(SOM);
    frame.extend_from_slice(wire);
    frame.push(FSP);
    frame.extend_from_slice(session.as_bytes());
    frame.push(FSP);
    frame.extend_from_slice(payload);
    frame.push(EOM);
    Ok(frame)
}

/// Build a reply frame the way the device does.
pub fn encode_reply(kind: ResponseKind, status: StatusCode, payload: &[u8]) -> Vec<u8> {
    let status = status.code().to_string();
    let mut frame = Vec::with_capacity(kind.as_wire().len() + status.len() + payload.len() + 4);
    frame.push(SOM);
    frame.extend_from_slice(kind.as_wire().as_bytes());
    frame.push(FSP);
    frame.extend_from_slice(status.as_bytes());
    frame.push(FSP);
    frame.extend_from_slice(payload);
    frame.push(EOM);
    frame
}

/// Build a login reply: session in the second field, zero-padded status leading the payload.
pub fn encode_login_reply(session: &str, status: StatusCode, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(session.len() + payload.len() + 16);
    frame.push(SOM);
    frame.extend_from_slice(ResponseKind::Login.as_wire().as_bytes());
    frame.push(FSP);
    frame.extend_from_slice(session.as_bytes());
    frame.push(FSP);
    frame.extend_from_slice(format!("{:03}", status.code()).as_bytes());
    if !payload.is_empty() {
        frame.push(FSP);
        frame.extend_from_slice(payload);
    }
    frame.push(EOM);
    frame
}

/// Parse a reply terminated by the first EOM.
pub fn decode_reply(buf: &[u8]) -> Result<Reply, CodecError> {
    let body = frame_body(buf, buf.iter().position(|&b| b == EOM))?;
    parse_reply(body)
}

/// Parse a reply whose payload may itself contain EOM bytes.
///
/// Only valid once the peer has gone quiet; the last EOM ends the frame.
pub fn decode_reply_idle(buf: &[u8]) -> Result<Reply, CodecError> {
    let body = frame_body(buf, buf.iter().rposition(|&b| b == EOM))?;
    parse_reply(body)
}

/// Parse a request frame (device side).
pub fn decode_request(buf: &[u8]) -> Result<RequestFrame, CodecError> {
    let body = frame_body(buf, buf.iter().position(|&b| b == EOM))?;
    let (kind, session, payload) = split_three(body)?;
    let kind = std::str::from_utf8(kind)
        .ok()
        .and_then(RequestKind::from_wire)
        .ok_or_else(|| CodecError::Malformed(format!("unknown request kind {:02X?}", kind)))?;

    Ok(RequestFrame {
        kind,
        session: String::from_utf8_lossy(session).into_owned(),
        payload: payload.to_vec(),
    })
}

/// Split a payload into fields on `sep`. An empty payload has no fields.
pub fn fields(payload: &[u8], sep: u8) -> Vec<&[u8]> {
    if payload.is_empty() {
        return Vec::new();
    }
    payload.split(|&b| b == sep).collect()
}

/// Join fields with `sep`.
pub fn join_fields<T: AsRef<[u8]>>(parts: &[T], sep: u8) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(sep);
        }
        out.extend_from_slice(part.as_ref());
    }
    out
}

fn frame_body(buf: &[u8], end: Option<usize>) -> Result<&[u8], CodecError> {
    match buf.first() {
        None => return Err(CodecError::Incomplete),
        Some(&SOM) => {}
        Some(_) => return Err(CodecError::MissingStart),
    }
    match end {
        Some(end) => Ok(&buf[1..end]),
        None => Err(CodecError::Incomplete),
    }
}

fn split_three(body: &[u8]) -> Result<(&[u8], &[u8], &[u8]), CodecError> {
    let mut parts = body.splitn(3, |&b| b == FSP);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), Some(c)) => Ok((a, b, c)),
        _ => Err(CodecError::Malformed("expected three fields".to_string())),
    }
}

fn parse_status(raw: &[u8]) -> Result<StatusCode, CodecError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<u16>().ok())
        .map(StatusCode::from_code)
        .ok_or_else(|| CodecError::Malformed(format!("bad status {:02X?}", raw)))
}

fn parse_reply(body: &[u8]) -> Result<Reply, CodecError> {
    let (kind, second, payload) = split_three(body)?;
    let kind = ResponseKind::from_wire(&String::from_utf8_lossy(kind));

    if kind == ResponseKind::Login {
        if payload.len() < LOGIN_STATUS_LEN {
            return Err(CodecError::Malformed("login reply without status".to_string()));
        }
        let status = parse_status(&payload[..LOGIN_STATUS_LEN])?;
        let rest = &payload[LOGIN_STATUS_LEN..];
        let rest = rest.strip_prefix(&[FSP]).unwrap_or(rest);
        return Ok(Reply {
            kind,
            status,
            session: Some(String::from_utf8_lossy(second).into_owned()),
            payload: rest.to_vec(),
        });
    }

    Ok(Reply {
        kind,
        status: parse_status(second)?,
        session: None,
        payload: payload.to_vec(),
    })
}
