//! Length-prefixed framing for command and response streams
//!
//! Every transport message is framed as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf message ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::Envelope;

/// Maximum frame payload (10 MB)
pub const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

const PREFIX_LEN: usize = 4;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Invalid message length prefix: {0}")]
    InvalidLength(u32),

    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    EncodeError(#[from] prost::EncodeError),
}

/// Encode any protobuf message into a single frame
pub fn encode<M: Message>(message: &M) -> Result<Bytes, CodecError> {
    let msg_len = message.encoded_len();
    if msg_len > MAX_MESSAGE_SIZE as usize {
        return Err(CodecError::MessageTooLarge(msg_len));
    }

    let mut buf = BytesMut::with_capacity(PREFIX_LEN + msg_len);
    buf.put_u32(msg_len as u32);
    message.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Try to take one frame off the front of `buf`
///
/// `Ok(None)` means the frame is incomplete and nothing was consumed.
pub fn decode<M: Message + Default>(buf: &mut BytesMut) -> Result<Option<M>, CodecError> {
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }

    let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if msg_len > MAX_MESSAGE_SIZE {
        return Err(CodecError::InvalidLength(msg_len));
    }

    if buf.len() < PREFIX_LEN + msg_len as usize {
        return Ok(None);
    }

    buf.advance(PREFIX_LEN);
    let body = buf.split_to(msg_len as usize);
    Ok(Some(M::decode(body)?))
}

/// Accumulates stream bytes and yields complete envelopes
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Call repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Envelope>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Bytes buffered but not yet decoded
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Envelope, TaskRequest};

    fn command_envelope() -> Envelope {
        let mut request = TaskRequest {
            correlation_id: "c-1".into(),
            device_id: "dev-1".into(),
            service_id: "svc-1".into(),
            ..Default::default()
        };
        request.input.insert("data".into(), "21".into());
        Envelope::command("test", request)
    }

    #[test]
    fn test_encode_writes_length_prefix() {
        let encoded = encode(&command_envelope()).expect("encode failed");
        let prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(prefix as usize, encoded.len() - 4);

        let mut buf = BytesMut::from(&encoded[..]);
        let decoded: Envelope = decode(&mut buf).expect("decode failed").expect("no message");
        assert_eq!(decoded.correlation_id(), Some("c-1"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_is_not_consumed() {
        let encoded = encode(&command_envelope()).expect("encode failed");

        let mut buf = BytesMut::from(&encoded[..5]);
        let result: Option<Envelope> = decode(&mut buf).expect("partial data is not an error");
        assert!(result.is_none());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_frame_decoder_chunks_and_multiple_frames() {
        let first = encode(&command_envelope()).expect("encode failed");
        let second = encode(&Envelope::error("test", "c-2", "device offline")).expect("encode failed");

        let mut decoder = FrameDecoder::new();
        decoder.extend(&first[..3]);
        assert!(decoder.decode_next().expect("decode error").is_none());

        decoder.extend(&first[3..]);
        decoder.extend(&second);

        let a = decoder.decode_next().expect("decode error").expect("first frame");
        let b = decoder.decode_next().expect("decode error").expect("second frame");
        assert_eq!(a.correlation_id(), Some("c-1"));
        assert_eq!(b.correlation_id(), Some("c-2"));
        assert!(decoder.decode_next().expect("decode error").is_none());
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_oversized_prefix_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_MESSAGE_SIZE + 1);
        buf.put_bytes(0, 16);

        let result: Result<Option<Envelope>, _> = decode(&mut buf);
        assert!(matches!(result, Err(CodecError::InvalidLength(_))));
    }
}
