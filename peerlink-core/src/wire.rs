//! Wire codec: JSON control datagrams and the 4-byte BE length header of stream frames.

use crate::error::Error;
use crate::protocol::Message;

pub const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Serialize a control or presence message into one datagram.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(msg).map_err(|e| Error::MalformedMessage(e.to_string()))
}

/// Parse one datagram. Unknown extra fields are ignored; truncated input, unknown tags and
/// non-UTF-8 bytes are `MalformedMessage`.
pub fn decode_message(bytes: &[u8]) -> Result<Message, Error> {
    serde_json::from_slice(bytes).map_err(|e| Error::MalformedMessage(e.to_string()))
}

/// Length prefix for a payload of `len` bytes.
pub fn frame_header(len: usize) -> Result<[u8; LEN_SIZE], FrameEncodeError> {
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameEncodeError::TooLarge(len));
    }
    Ok((len as u32).to_be_bytes())
}

/// Error encoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
}

/// Payload length announced by a frame header.
pub fn parse_header(header: [u8; LEN_SIZE]) -> Result<usize, FrameDecodeError> {
    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge(len));
    }
    Ok(len as usize)
}

/// Frame header announcing more than `MAX_FRAME_LEN` bytes.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame too large: {0} bytes")]
    TooLarge(u32),
}

impl From<FrameDecodeError> for Error {
    fn from(e: FrameDecodeError) -> Self {
        Error::MalformedMessage(e.to_string())
    }
}

impl From<FrameEncodeError> for Error {
    fn from(e: FrameEncodeError) -> Self {
        Error::MalformedMessage(e.to_string())
    }
}
