//! Framing for command updates on the cloud link
//!
//! Each frame is a big-endian `u32` body length followed by a JSON body:
//! ```text
//! [ len: u32 BE ][ len bytes of JSON ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::CommandPatch;

/// Largest accepted body (10 MB)
pub const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame body of {0} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit")]
    MessageTooLarge(usize),

    #[error("Frame announces {0} bytes, more than the limit")]
    InvalidLength(u32),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Command update sent from the device to the cloud
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub command_id: String,
    pub patch: CommandPatch,
}

/// Cloud answer to an [`UpdateRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateReply {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Append one frame holding `message` to `buf`
pub fn encode_into<T: Serialize>(message: &T, buf: &mut BytesMut) -> Result<(), CodecError> {
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_SIZE)
        .ok_or(CodecError::MessageTooLarge(body.len()))?;

    buf.reserve(LEN_PREFIX + body.len());
    buf.put_u32(len);
    buf.put_slice(&body);
    Ok(())
}

/// Take one complete frame off the front of `buf`.
///
/// `Ok(None)` means the frame is still incomplete and nothing was consumed.
pub fn decode<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, CodecError> {
    let Some(mut prefix) = buf.get(..LEN_PREFIX) else {
        return Ok(None);
    };
    let len = prefix.get_u32();
    if len > MAX_MESSAGE_SIZE {
        return Err(CodecError::InvalidLength(len));
    }
    if buf.len() < LEN_PREFIX + len as usize {
        return Ok(None);
    }

    buf.advance(LEN_PREFIX);
    let body = buf.split_to(len as usize);
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Accumulates bytes read from a stream and yields whole frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Next complete frame, if one has fully arrived
    pub fn decode_next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        decode(&mut self.pending)
    }

    pub fn buffer_len(&self) -> usize {
        self.pending.len()
    }
}
