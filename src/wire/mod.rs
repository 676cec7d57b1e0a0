//! Recorder wire protocol: control bytes, message kinds and framing.

mod codec;
mod types;

#[cfg(test)]
mod tests;

pub use codec::{
    CodecError, Reply, RequestFrame, decode_reply, decode_reply_idle, decode_request, encode_login_reply,
    encode_reply, encode_request, fields, join_fields,
};
pub use types::{
    EOM, FSP, FVS, MAX_RECEIVE_SIZE, MAX_SEND_BUFFER_SIZE, RequestKind, ResponseKind, SOM, StatusCode,
};
