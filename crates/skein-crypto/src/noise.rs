//! Per-stream key exchange, wrapped as an opaque two-message handshake.
//!
//! Implements the `NN` pattern via the snow library:
//! - Pattern: `NN` (ephemeral-only, two messages)
//! - DH: `25519` (Curve25519)
//! - Cipher: `ChaChaPoly` (ChaCha20-Poly1305)
//! - Hash: `BLAKE2s`
//!
//! ## Message Flow
//!
//! ```text
//! Message 1: Initiator → Responder: e
//! Message 2: Responder → Initiator: e, ee
//! ```
//!
//! The pattern carries no static keys: both messages travel inside signed
//! dial messages, so endpoint authentication comes from the overlay's
//! ed25519 identities rather than from the exchange itself. After message 2
//! both parties hold a [`StreamCipher`] with independent per-direction
//! nonce chains.

use snow::Builder;

use crate::CryptoError;

/// Noise protocol name for the stream key exchange.
const KEX_PATTERN: &str = "Noise_NN_25519_ChaChaPoly_BLAKE2s";

/// Scratch size for handshake messages; NN messages are well under this.
const MAX_KEX_MSG: usize = 1024;

/// AEAD tag bytes appended to every sealed payload.
pub const SEAL_OVERHEAD: usize = 16;

/// In-flight initiator state between producing message 1 and consuming
/// message 2.
pub struct HandshakeState {
    state: snow::HandshakeState,
}

impl HandshakeState {
    /// Start an exchange as initiator, producing the opaque first message.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Kex`] on library failure.
    pub fn initiate() -> Result<(Self, Vec<u8>), CryptoError> {
        let mut state = Builder::new(
            KEX_PATTERN
                .parse()
                .map_err(|_| CryptoError::Kex("bad pattern".into()))?,
        )
        .build_initiator()?;
        let mut buf = vec![0u8; MAX_KEX_MSG];
        let n = state.write_message(&[], &mut buf)?;
        buf.truncate(n);
        Ok((Self { state }, buf))
    }

    /// Complete the exchange as responder: consume the initiator's message
    /// and produce the reply plus the finished cipher.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Kex`] if the initiator message is malformed.
    pub fn respond(msg1: &[u8]) -> Result<(StreamCipher, Vec<u8>), CryptoError> {
        let mut state = Builder::new(
            KEX_PATTERN
                .parse()
                .map_err(|_| CryptoError::Kex("bad pattern".into()))?,
        )
        .build_responder()?;
        let mut scratch = vec![0u8; MAX_KEX_MSG];
        state.read_message(msg1, &mut scratch)?;
        let mut buf = vec![0u8; MAX_KEX_MSG];
        let n = state.write_message(&[], &mut buf)?;
        buf.truncate(n);
        let transport = state.into_transport_mode()?;
        Ok((StreamCipher { transport }, buf))
    }

    /// Complete the exchange as initiator: consume the responder's reply.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Kex`] if the reply is malformed.
    pub fn finalize(mut self, msg2: &[u8]) -> Result<StreamCipher, CryptoError> {
        let mut scratch = vec![0u8; MAX_KEX_MSG];
        self.state.read_message(msg2, &mut scratch)?;
        let transport = self.state.into_transport_mode()?;
        Ok(StreamCipher { transport })
    }
}

/// Finished per-stream cipher: seals outbound payloads and opens inbound
/// ones, each direction with its own nonce chain.
///
/// Sealing and opening must each happen in transmission order; skein
/// guarantees this by running streams over an ordered byte transport.
pub struct StreamCipher {
    transport: snow::TransportState,
}

impl StreamCipher {
    /// Seal a plaintext payload. Output is `plain.len() + SEAL_OVERHEAD`
    /// bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Kex`] if the payload exceeds the cipher's
    /// message bound (65535 bytes including the tag).
    pub fn seal(&mut self, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut buf = vec![0u8; plain.len() + SEAL_OVERHEAD];
        let n = self.transport.write_message(plain, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Open a sealed payload.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Kex`] on authentication failure or an
    /// out-of-order payload.
    pub fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut buf = vec![0u8; sealed.len()];
        let n = self.transport.read_message(sealed, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}
