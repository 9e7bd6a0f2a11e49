//! Error taxonomy for the skein core protocol.
//!
//! Errors are layered the way failures propagate: frame codec errors feed
//! session errors, dial-message errors surface from the handshakes, and the
//! top-level [`Error`] collects everything a caller of the public API can
//! see.

use thiserror::Error;

use skein_crypto::CryptoError;

/// Frame-level errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Buffer too short to hold a frame header.
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size.
        expected: usize,
        /// Actual size available.
        actual: usize,
    },

    /// Unrecognized frame type byte.
    #[error("invalid frame type: 0x{0:02X}")]
    InvalidFrameType(u8),

    /// Declared payload length exceeds the buffer.
    #[error("payload length exceeds buffer")]
    PayloadOverflow,

    /// Payload larger than the u16 length field can carry.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Read-side I/O failure; short reads land here as unexpected EOF.
    #[error("frame read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a dial request fails verification. Each maps to a wire error
/// code carried in a rejecting [`crate::DialResponse`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DialRequestError {
    /// Source public key is null.
    #[error("dial request has invalid source public key")]
    InvalidSrcPk,

    /// Source port is zero.
    #[error("dial request has invalid source port")]
    InvalidSrcPort,

    /// Destination public key is null.
    #[error("dial request has invalid destination public key")]
    InvalidDstPk,

    /// Destination port is zero.
    #[error("dial request has invalid destination port")]
    InvalidDstPort,

    /// Timestamp does not advance past the last recorded one for the
    /// source key.
    #[error("dial request has invalid timestamp")]
    InvalidTimestamp,

    /// Signature does not verify under the source public key.
    #[error("dial request has invalid signature")]
    InvalidSig,

    /// Message bytes could not be decoded.
    #[error("dial request is malformed")]
    Malformed,
}

impl DialRequestError {
    /// Wire error code for this failure, carried in a rejecting response.
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            DialRequestError::InvalidSrcPk => 1,
            DialRequestError::InvalidSrcPort => 2,
            DialRequestError::InvalidDstPk => 3,
            DialRequestError::InvalidDstPort => 4,
            DialRequestError::InvalidTimestamp => 5,
            DialRequestError::InvalidSig => 6,
            DialRequestError::Malformed => 0,
        }
    }

    /// Map a wire error code back to the failure it names.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DialRequestError::InvalidSrcPk),
            2 => Some(DialRequestError::InvalidSrcPort),
            3 => Some(DialRequestError::InvalidDstPk),
            4 => Some(DialRequestError::InvalidDstPort),
            5 => Some(DialRequestError::InvalidTimestamp),
            6 => Some(DialRequestError::InvalidSig),
            _ => None,
        }
    }
}

/// Reasons a dial response fails verification.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DialResponseError {
    /// Response hash does not match the request it answers.
    #[error("dial response has invalid hash")]
    InvalidHash,

    /// Signature does not verify under the responder's public key.
    #[error("dial response has invalid signature")]
    InvalidSig,

    /// Request was rejected with a recognized error code.
    #[error("dial request rejected: {0}")]
    Rejected(DialRequestError),

    /// Request was rejected without a recognized error code.
    #[error("dial request not accepted")]
    NotAccepted,

    /// Message bytes could not be decoded.
    #[error("dial response is malformed")]
    Malformed,
}

/// Per-frame protocol violations observed by the dispatch loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame payload could not be decoded for its type.
    #[error("malformed frame payload")]
    MalformedPayload,

    /// FWD or ACK addressed to a stream this session does not know.
    #[error("unknown stream: {0}")]
    UnknownStream(u16),

    /// REQUEST addressed to a port with no listener.
    #[error("unknown port: {0}")]
    UnknownPort(u16),

    /// ACK payload was not exactly 2 bytes.
    #[error("invalid ACK payload size")]
    InvalidAckPayload,
}

/// Session lifecycle and transport errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session is closed; no further frames may be written.
    #[error("session closed")]
    Closed,

    /// Session handshake did not complete within its timeout.
    #[error("session handshake timed out")]
    HandshakeTimeout,

    /// Write-side transport failure.
    #[error("write error: {0}")]
    Write(std::io::Error),

    /// Read-side transport failure.
    #[error("read error: {0}")]
    Read(#[from] FrameError),

    /// Handshake request failed verification.
    #[error(transparent)]
    DialRequest(#[from] DialRequestError),

    /// Handshake response failed verification.
    #[error(transparent)]
    DialResponse(#[from] DialResponseError),
}

/// Stream lifecycle errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Stream is closed; reads drain the buffer, writes fail.
    #[error("stream closed")]
    Closed,

    /// Stream handshake did not complete within its timeout.
    #[error("stream handshake timed out")]
    HandshakeTimeout,

    /// Underlying session failed or closed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Sealing or opening a payload failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Peer violated the stream protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Top-level error for the skein-core public API.
#[derive(Debug, Error)]
pub enum Error {
    /// Frame codec failure.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Dial request verification failure.
    #[error(transparent)]
    DialRequest(#[from] DialRequestError),

    /// Dial response verification failure.
    #[error(transparent)]
    DialResponse(#[from] DialResponseError),

    /// Protocol violation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Session failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Stream failure.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A listener is already bound to the port.
    #[error("port {0} already bound")]
    PortInUse(u16),

    /// Listener was closed while accepting.
    #[error("listener closed")]
    ListenerClosed,
}

/// Result alias for skein-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_roundtrip() {
        let all = [
            DialRequestError::InvalidSrcPk,
            DialRequestError::InvalidSrcPort,
            DialRequestError::InvalidDstPk,
            DialRequestError::InvalidDstPort,
            DialRequestError::InvalidTimestamp,
            DialRequestError::InvalidSig,
        ];
        for err in all {
            assert_eq!(DialRequestError::from_code(err.code()), Some(err));
        }
        assert_eq!(DialRequestError::from_code(0), None);
        assert_eq!(DialRequestError::from_code(42), None);
    }

    #[test]
    fn ack_error_message() {
        assert_eq!(
            ProtocolError::InvalidAckPayload.to_string(),
            "invalid ACK payload size"
        );
    }
}
