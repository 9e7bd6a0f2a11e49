//! Frame encoding and decoding for the session wire protocol.
//!
//! Every frame is a 5-byte header followed by the payload. All multi-byte
//! fields are big-endian (network byte order):
//!
//! ```text
//! type(u8) ‖ stream id(u16) ‖ payload length(u16) ‖ payload
//! ```
//!
//! The codec is pure: reading a frame consumes exactly `5 + pay_len` bytes
//! from the transport, and a short read is a fatal read error.

use core::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{FrameError, ProtocolError};
use crate::{FRAME_HEADER_LEN, MAX_FRAME_PAYLOAD};

/// The only defined CLOSE reason so far; future reasons get distinct codes.
pub const CLOSE_REASON_PLACEHOLDER: u8 = 0;

/// Frame types of the session wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Reserved; ignored by dispatch.
    Ok = 0x0,
    /// Stream handshake request.
    Request = 0x1,
    /// Stream handshake acceptance.
    Accept = 0x2,
    /// Stream termination, payload is a 1-byte reason.
    Close = 0x3,
    /// Stream data, payload is sealed ciphertext.
    Fwd = 0xA,
    /// Flow-control credit, payload is a 2-byte cumulative offset.
    Ack = 0xB,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Ok),
            0x1 => Ok(Self::Request),
            0x2 => Ok(Self::Accept),
            0x3 => Ok(Self::Close),
            0xA => Ok(Self::Fwd),
            0xB => Ok(Self::Ack),
            _ => Err(FrameError::InvalidFrameType(value)),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::Ok => "OK",
            FrameType::Request => "REQUEST",
            FrameType::Accept => "ACCEPT",
            FrameType::Close => "CLOSE",
            FrameType::Fwd => "FWD",
            FrameType::Ack => "ACK",
        };
        f.write_str(name)
    }
}

/// A parsed frame: header fields plus owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    frame_type: FrameType,
    stream_id: u16,
    payload: Vec<u8>,
}

impl Frame {
    /// Build a frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] if the payload exceeds
    /// 65535 bytes.
    pub fn new(frame_type: FrameType, stream_id: u16, payload: Vec<u8>) -> Result<Self, FrameError> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(FrameError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            frame_type,
            stream_id,
            payload,
        })
    }

    /// Encode to wire bytes: exactly `5 + payload.len()` bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.push(self.frame_type as u8);
        buf.extend_from_slice(&self.stream_id.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a frame from a byte buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooShort`] if the buffer cannot hold a header,
    /// [`FrameError::InvalidFrameType`] on an unrecognized type byte, and
    /// [`FrameError::PayloadOverflow`] if the declared payload length
    /// exceeds the buffer.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(FrameError::TooShort {
                expected: FRAME_HEADER_LEN,
                actual: data.len(),
            });
        }
        let frame_type = FrameType::try_from(data[0])?;
        let stream_id = u16::from_be_bytes([data[1], data[2]]);
        let pay_len = u16::from_be_bytes([data[3], data[4]]) as usize;
        if FRAME_HEADER_LEN + pay_len > data.len() {
            return Err(FrameError::PayloadOverflow);
        }
        Ok(Self {
            frame_type,
            stream_id,
            payload: data[FRAME_HEADER_LEN..FRAME_HEADER_LEN + pay_len].to_vec(),
        })
    }

    /// Frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Stream ID the frame addresses.
    #[must_use]
    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<type:{}><id:{}><size:{}>",
            self.frame_type,
            self.stream_id,
            self.payload.len()
        )?;
        if self.frame_type == FrameType::Ack {
            match decode_ack_payload(&self.payload) {
                Ok(offset) => write!(f, "<offset:{offset}>")?,
                Err(e) => write!(f, "<offset:{e}>")?,
            }
        }
        Ok(())
    }
}

/// Read exactly one frame from `r`.
///
/// # Errors
///
/// Returns [`FrameError::Io`] on transport failure (including short reads)
/// and [`FrameError::InvalidFrameType`] on an unrecognized type byte.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Frame, FrameError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    r.read_exact(&mut header).await?;
    let frame_type = FrameType::try_from(header[0])?;
    let stream_id = u16::from_be_bytes([header[1], header[2]]);
    let pay_len = u16::from_be_bytes([header[3], header[4]]) as usize;
    let mut payload = vec![0u8; pay_len];
    r.read_exact(&mut payload).await?;
    Ok(Frame {
        frame_type,
        stream_id,
        payload,
    })
}

/// Write one frame to `w`.
///
/// # Errors
///
/// Returns the underlying I/O error; callers wrap it to mark write-side
/// failure.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Frame) -> std::io::Result<()> {
    w.write_all(&frame.encode()).await
}

/// Build an ACK frame payload: the cumulative received offset, big-endian.
#[must_use]
pub fn encode_ack_payload(offset: u16) -> Vec<u8> {
    offset.to_be_bytes().to_vec()
}

/// Decode an ACK frame payload.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidAckPayload`] unless the payload is
/// exactly 2 bytes.
pub fn decode_ack_payload(payload: &[u8]) -> Result<u16, ProtocolError> {
    let bytes: [u8; 2] = payload
        .try_into()
        .map_err(|_| ProtocolError::InvalidAckPayload)?;
    Ok(u16::from_be_bytes(bytes))
}

/// Build a CLOSE frame with the given reason byte.
#[must_use]
pub fn close_frame(stream_id: u16, reason: u8) -> Frame {
    Frame {
        frame_type: FrameType::Close,
        stream_id,
        payload: vec![reason],
    }
}

/// Build an ACK frame carrying the cumulative received offset.
#[must_use]
pub fn ack_frame(stream_id: u16, offset: u16) -> Frame {
    Frame {
        frame_type: FrameType::Ack,
        stream_id,
        payload: encode_ack_payload(offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fwd_frame_wire_bytes() {
        let frame = Frame::new(FrameType::Fwd, 0x0102, vec![0x41, 0x42, 0x43]).unwrap();
        assert_eq!(
            frame.encode(),
            vec![0x0A, 0x01, 0x02, 0x00, 0x03, 0x41, 0x42, 0x43]
        );
    }

    #[test]
    fn ack_payload_roundtrip() {
        let frame = ack_frame(7, 0xBEEF);
        assert_eq!(frame.payload(), &[0xBE, 0xEF]);
        assert_eq!(decode_ack_payload(&[0xBE, 0xEF]).unwrap(), 0xBEEF);
    }

    #[test]
    fn ack_payload_wrong_size() {
        let err = decode_ack_payload(&[0xBE]).unwrap_err();
        assert_eq!(err.to_string(), "invalid ACK payload size");
        assert!(decode_ack_payload(&[]).is_err());
        assert!(decode_ack_payload(&[1, 2, 3]).is_err());
    }

    #[test]
    fn parse_rejects_unknown_type() {
        let bytes = [0xFFu8, 0, 1, 0, 0];
        assert!(matches!(
            Frame::parse(&bytes),
            Err(FrameError::InvalidFrameType(0xFF))
        ));
    }

    #[test]
    fn parse_rejects_short_buffer() {
        assert!(matches!(
            Frame::parse(&[0x0A, 0x00]),
            Err(FrameError::TooShort { .. })
        ));
    }

    #[test]
    fn parse_rejects_overflowing_length() {
        // header claims 4 payload bytes, buffer has 1
        let bytes = [0x0A, 0x00, 0x01, 0x00, 0x04, 0xAA];
        assert!(matches!(
            Frame::parse(&bytes),
            Err(FrameError::PayloadOverflow)
        ));
    }

    #[test]
    fn oversized_payload_rejected() {
        let payload = vec![0u8; MAX_FRAME_PAYLOAD + 1];
        assert!(matches!(
            Frame::new(FrameType::Fwd, 1, payload),
            Err(FrameError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn display_renders_ack_offset() {
        let frame = ack_frame(7, 0xBEEF);
        assert_eq!(frame.to_string(), "<type:ACK><id:7><size:2><offset:48879>");
    }

    #[test]
    fn close_frame_payload() {
        let frame = close_frame(9, CLOSE_REASON_PLACEHOLDER);
        assert_eq!(frame.payload(), &[0]);
        assert_eq!(frame.frame_type(), FrameType::Close);
    }

    #[tokio::test]
    async fn read_frame_from_wire() {
        let bytes = vec![0x0A, 0x01, 0x02, 0x00, 0x03, 0x41, 0x42, 0x43];
        let mut cursor = std::io::Cursor::new(bytes);
        let frame = read_frame(&mut cursor).await.unwrap();
        assert_eq!(frame.frame_type(), FrameType::Fwd);
        assert_eq!(frame.stream_id(), 0x0102);
        assert_eq!(frame.payload(), b"ABC");
    }

    #[tokio::test]
    async fn short_read_is_fatal() {
        // header promises 3 payload bytes, wire carries 1
        let bytes = vec![0x0A, 0x01, 0x02, 0x00, 0x03, 0x41];
        let mut cursor = std::io::Cursor::new(bytes);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(FrameError::Io(_))
        ));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn frame_type_strategy() -> impl Strategy<Value = FrameType> {
            prop::sample::select(vec![
                FrameType::Ok,
                FrameType::Request,
                FrameType::Accept,
                FrameType::Close,
                FrameType::Fwd,
                FrameType::Ack,
            ])
        }

        proptest! {
            #[test]
            fn prop_roundtrip_preserves_fields(
                frame_type in frame_type_strategy(),
                stream_id in any::<u16>(),
                payload in prop::collection::vec(any::<u8>(), 0..2048)
            ) {
                let frame = Frame::new(frame_type, stream_id, payload.clone()).unwrap();
                let parsed = Frame::parse(&frame.encode()).unwrap();
                prop_assert_eq!(parsed.frame_type(), frame_type);
                prop_assert_eq!(parsed.stream_id(), stream_id);
                prop_assert_eq!(parsed.payload(), payload.as_slice());
            }

            #[test]
            fn prop_parse_doesnt_panic(data in prop::collection::vec(any::<u8>(), 0..2048)) {
                let _ = Frame::parse(&data);
            }

            #[test]
            fn prop_encoded_length(
                payload in prop::collection::vec(any::<u8>(), 0..1024)
            ) {
                let frame = Frame::new(FrameType::Fwd, 1, payload.clone()).unwrap();
                prop_assert_eq!(frame.encode().len(), FRAME_HEADER_LEN + payload.len());
            }

            #[test]
            fn prop_ack_offset_roundtrip(offset in any::<u16>()) {
                prop_assert_eq!(
                    decode_ack_payload(&encode_ack_payload(offset)).unwrap(),
                    offset
                );
            }
        }
    }
}
