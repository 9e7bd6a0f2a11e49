//! Signed dial messages and their canonical wire encoding.
//!
//! Three message kinds authenticate the overlay's handshakes:
//!
//! - [`SessionDialRequest`] / [`DialResponse`] authenticate a freshly
//!   connected byte transport (the session handshake, exchanged before any
//!   frames flow).
//! - [`StreamDialRequest`] / [`DialResponse`] authenticate each stream's
//!   REQUEST/ACCEPT exchange, and carry the opaque key-exchange bytes.
//!
//! ## Canonical encoding (wire contract)
//!
//! Signatures and hashes are computed over one deterministic encoding:
//! big-endian fields concatenated in declaration order, fixed-width where
//! the type is fixed-width, u16-length-prefixed for variable bytes, with
//! the signature field zeroed. Changing this encoding breaks interop.
//!
//! ```text
//! SessionDialRequest: ts(8) ‖ src_pk(32) ‖ dst_pk(32) ‖ sig(64)
//! StreamDialRequest:  ts(8) ‖ src_pk(32) ‖ src_port(2) ‖ dst_pk(32)
//!                     ‖ dst_port(2) ‖ kex_len(2) ‖ kex ‖ sig(64)
//! DialResponse:       req_hash(32) ‖ accepted(1) ‖ err_code(1)
//!                     ‖ kex_len(2) ‖ kex ‖ sig(64)
//! ```
//!
//! The same bytes (with the real signature in place) are the pre-session
//! wire form, framed by a u16 length prefix.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use skein_crypto::{sha256, Hash, PublicKey, SecretKey, Signature};

use crate::addr::Addr;
use crate::error::{DialRequestError, DialResponseError};
use crate::HANDSHAKE_PAYLOAD_VERSION;

/// Current wall-clock time in nanoseconds since the epoch.
#[must_use]
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as i64)
}

fn split_at_checked(data: &[u8], mid: usize) -> Option<(&[u8], &[u8])> {
    if data.len() < mid {
        return None;
    }
    Some(data.split_at(mid))
}

/// Request to authenticate a session between two just-connected endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionDialRequest {
    /// Nanosecond wall-clock timestamp; must strictly increase per source.
    pub timestamp: i64,
    /// Dialing endpoint's key.
    pub src_pk: PublicKey,
    /// Dialed endpoint's key.
    pub dst_pk: PublicKey,
    /// Signature by `src_pk` over the canonical bytes with this field
    /// zeroed.
    pub sig: Signature,
}

impl SessionDialRequest {
    /// Build and sign a request stamped with the current time.
    #[must_use]
    pub fn new_signed(src_pk: PublicKey, dst_pk: PublicKey, sk: &SecretKey) -> Self {
        let mut req = Self {
            timestamp: now_ns(),
            src_pk,
            dst_pk,
            sig: Signature::null(),
        };
        req.sign(sk);
        req
    }

    fn encode_with_sig(&self, sig: &Signature) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 32 + 32 + 64);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(self.src_pk.as_bytes());
        buf.extend_from_slice(self.dst_pk.as_bytes());
        buf.extend_from_slice(sig.as_bytes());
        buf
    }

    /// Canonical wire bytes, signature included.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.encode_with_sig(&self.sig)
    }

    /// Decode canonical wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DialRequestError::Malformed`] on a length mismatch.
    pub fn decode(data: &[u8]) -> Result<Self, DialRequestError> {
        if data.len() != 8 + 32 + 32 + 64 {
            return Err(DialRequestError::Malformed);
        }
        let (ts, rest) = data.split_at(8);
        let (src, rest) = rest.split_at(32);
        let (dst, sig) = rest.split_at(32);
        Ok(Self {
            timestamp: i64::from_be_bytes(ts.try_into().expect("fixed width")),
            src_pk: PublicKey::from_slice(src).map_err(|_| DialRequestError::Malformed)?,
            dst_pk: PublicKey::from_slice(dst).map_err(|_| DialRequestError::Malformed)?,
            sig: Signature::from_slice(sig).map_err(|_| DialRequestError::Malformed)?,
        })
    }

    /// Sign the request, filling `sig`.
    pub fn sign(&mut self, sk: &SecretKey) {
        self.sig = sk.sign(&self.encode_with_sig(&Signature::null()));
    }

    /// Hash of the request with the signature zeroed. Two requests
    /// differing only in `sig` hash identically.
    #[must_use]
    pub fn hash(&self) -> Hash {
        sha256(&self.encode_with_sig(&Signature::null()))
    }

    /// Verify the request against the most recently recorded timestamp for
    /// its source.
    ///
    /// Checks that both keys are non-null, that the timestamp strictly
    /// advances, and that the signature verifies under `src_pk`. Does not
    /// check whether either key is expected.
    ///
    /// # Errors
    ///
    /// Returns the matching [`DialRequestError`] on the first failed check.
    pub fn verify(&self, last_timestamp: i64) -> Result<(), DialRequestError> {
        if self.src_pk.is_null() {
            return Err(DialRequestError::InvalidSrcPk);
        }
        if self.dst_pk.is_null() {
            return Err(DialRequestError::InvalidDstPk);
        }
        if self.timestamp <= last_timestamp {
            return Err(DialRequestError::InvalidTimestamp);
        }
        self.src_pk
            .verify(&self.encode_with_sig(&Signature::null()), &self.sig)
            .map_err(|_| DialRequestError::InvalidSig)
    }
}

/// Request to open a stream between two overlay addresses, carrying the
/// initiator's opaque key-exchange message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamDialRequest {
    /// Nanosecond wall-clock timestamp; must strictly increase per source.
    pub timestamp: i64,
    /// Initiating endpoint.
    pub src_addr: Addr,
    /// Target endpoint.
    pub dst_addr: Addr,
    /// Opaque key-exchange bytes (initiator step).
    #[serde(with = "hex::serde")]
    pub noise_msg: Vec<u8>,
    /// Signature by `src_addr.pk` over the canonical bytes with this field
    /// zeroed.
    pub sig: Signature,
}

impl StreamDialRequest {
    /// Build and sign a request stamped with the current time.
    #[must_use]
    pub fn new_signed(src_addr: Addr, dst_addr: Addr, noise_msg: Vec<u8>, sk: &SecretKey) -> Self {
        let mut req = Self {
            timestamp: now_ns(),
            src_addr,
            dst_addr,
            noise_msg,
            sig: Signature::null(),
        };
        req.sign(sk);
        req
    }

    fn encode_with_sig(&self, sig: &Signature) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 34 + 34 + 2 + self.noise_msg.len() + 64);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(self.src_addr.pk.as_bytes());
        buf.extend_from_slice(&self.src_addr.port.to_be_bytes());
        buf.extend_from_slice(self.dst_addr.pk.as_bytes());
        buf.extend_from_slice(&self.dst_addr.port.to_be_bytes());
        buf.extend_from_slice(&(self.noise_msg.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.noise_msg);
        buf.extend_from_slice(sig.as_bytes());
        buf
    }

    /// Canonical wire bytes, signature included.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.encode_with_sig(&self.sig)
    }

    /// Decode canonical wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DialRequestError::Malformed`] on a length mismatch.
    pub fn decode(data: &[u8]) -> Result<Self, DialRequestError> {
        let (ts, rest) = split_at_checked(data, 8).ok_or(DialRequestError::Malformed)?;
        let (src_pk, rest) = split_at_checked(rest, 32).ok_or(DialRequestError::Malformed)?;
        let (src_port, rest) = split_at_checked(rest, 2).ok_or(DialRequestError::Malformed)?;
        let (dst_pk, rest) = split_at_checked(rest, 32).ok_or(DialRequestError::Malformed)?;
        let (dst_port, rest) = split_at_checked(rest, 2).ok_or(DialRequestError::Malformed)?;
        let (kex_len, rest) = split_at_checked(rest, 2).ok_or(DialRequestError::Malformed)?;
        let kex_len = u16::from_be_bytes(kex_len.try_into().expect("fixed width")) as usize;
        let (kex, sig) = split_at_checked(rest, kex_len).ok_or(DialRequestError::Malformed)?;
        if sig.len() != 64 {
            return Err(DialRequestError::Malformed);
        }
        Ok(Self {
            timestamp: i64::from_be_bytes(ts.try_into().expect("fixed width")),
            src_addr: Addr::new(
                PublicKey::from_slice(src_pk).map_err(|_| DialRequestError::Malformed)?,
                u16::from_be_bytes(src_port.try_into().expect("fixed width")),
            ),
            dst_addr: Addr::new(
                PublicKey::from_slice(dst_pk).map_err(|_| DialRequestError::Malformed)?,
                u16::from_be_bytes(dst_port.try_into().expect("fixed width")),
            ),
            noise_msg: kex.to_vec(),
            sig: Signature::from_slice(sig).map_err(|_| DialRequestError::Malformed)?,
        })
    }

    /// Sign the request, filling `sig`.
    pub fn sign(&mut self, sk: &SecretKey) {
        self.sig = sk.sign(&self.encode_with_sig(&Signature::null()));
    }

    /// Hash of the request with the signature zeroed.
    #[must_use]
    pub fn hash(&self) -> Hash {
        sha256(&self.encode_with_sig(&Signature::null()))
    }

    /// Verify the request against the most recently recorded timestamp for
    /// its source. Both addresses must carry non-null keys and non-zero
    /// ports.
    ///
    /// # Errors
    ///
    /// Returns the matching [`DialRequestError`] on the first failed check.
    pub fn verify(&self, last_timestamp: i64) -> Result<(), DialRequestError> {
        if self.src_addr.pk.is_null() {
            return Err(DialRequestError::InvalidSrcPk);
        }
        if self.src_addr.port == 0 {
            return Err(DialRequestError::InvalidSrcPort);
        }
        if self.dst_addr.pk.is_null() {
            return Err(DialRequestError::InvalidDstPk);
        }
        if self.dst_addr.port == 0 {
            return Err(DialRequestError::InvalidDstPort);
        }
        if self.timestamp <= last_timestamp {
            return Err(DialRequestError::InvalidTimestamp);
        }
        self.src_addr
            .pk
            .verify(&self.encode_with_sig(&Signature::null()), &self.sig)
            .map_err(|_| DialRequestError::InvalidSig)
    }
}

/// Answer to either dial request kind, signed by the dialed endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DialResponse {
    /// Hash of the request this answers.
    pub req_hash: Hash,
    /// Whether the request was accepted.
    pub accepted: bool,
    /// Error code when not accepted; see [`DialRequestError::code`].
    pub err_code: u8,
    /// Opaque key-exchange bytes (responder step); empty at session level.
    #[serde(with = "hex::serde")]
    pub noise_msg: Vec<u8>,
    /// Signature by the dialed endpoint's key over the canonical bytes
    /// with this field zeroed.
    pub sig: Signature,
}

impl DialResponse {
    /// Build and sign an accepting response.
    #[must_use]
    pub fn accepting(req_hash: Hash, noise_msg: Vec<u8>, sk: &SecretKey) -> Self {
        let mut resp = Self {
            req_hash,
            accepted: true,
            err_code: 0,
            noise_msg,
            sig: Signature::null(),
        };
        resp.sign(sk);
        resp
    }

    /// Build and sign a rejecting response carrying the failure code.
    #[must_use]
    pub fn rejecting(req_hash: Hash, err: DialRequestError, sk: &SecretKey) -> Self {
        let mut resp = Self {
            req_hash,
            accepted: false,
            err_code: err.code(),
            noise_msg: Vec::new(),
            sig: Signature::null(),
        };
        resp.sign(sk);
        resp
    }

    fn encode_with_sig(&self, sig: &Signature) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 1 + 1 + 2 + self.noise_msg.len() + 64);
        buf.extend_from_slice(self.req_hash.as_bytes());
        buf.push(u8::from(self.accepted));
        buf.push(self.err_code);
        buf.extend_from_slice(&(self.noise_msg.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.noise_msg);
        buf.extend_from_slice(sig.as_bytes());
        buf
    }

    /// Canonical wire bytes, signature included.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.encode_with_sig(&self.sig)
    }

    /// Decode canonical wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DialResponseError::Malformed`] on a length mismatch.
    pub fn decode(data: &[u8]) -> Result<Self, DialResponseError> {
        let (hash, rest) = split_at_checked(data, 32).ok_or(DialResponseError::Malformed)?;
        let (flags, rest) = split_at_checked(rest, 2).ok_or(DialResponseError::Malformed)?;
        let (kex_len, rest) = split_at_checked(rest, 2).ok_or(DialResponseError::Malformed)?;
        let kex_len = u16::from_be_bytes(kex_len.try_into().expect("fixed width")) as usize;
        let (kex, sig) = split_at_checked(rest, kex_len).ok_or(DialResponseError::Malformed)?;
        if sig.len() != 64 || flags[0] > 1 {
            return Err(DialResponseError::Malformed);
        }
        Ok(Self {
            req_hash: Hash::from_slice(hash).map_err(|_| DialResponseError::Malformed)?,
            accepted: flags[0] == 1,
            err_code: flags[1],
            noise_msg: kex.to_vec(),
            sig: Signature::from_slice(sig).map_err(|_| DialResponseError::Malformed)?,
        })
    }

    /// Sign the response, filling `sig`.
    pub fn sign(&mut self, sk: &SecretKey) {
        self.sig = sk.sign(&self.encode_with_sig(&Signature::null()));
    }

    /// Verify the response against the request it answers.
    ///
    /// # Errors
    ///
    /// [`DialResponseError::InvalidHash`] if `req_hash` does not match,
    /// [`DialResponseError::InvalidSig`] if the signature fails under
    /// `req_dst_pk`, and [`DialResponseError::Rejected`] /
    /// [`DialResponseError::NotAccepted`] when the peer declined.
    pub fn verify(&self, req_dst_pk: &PublicKey, req_hash: &Hash) -> Result<(), DialResponseError> {
        if self.req_hash != *req_hash {
            return Err(DialResponseError::InvalidHash);
        }
        req_dst_pk
            .verify(&self.encode_with_sig(&Signature::null()), &self.sig)
            .map_err(|_| DialResponseError::InvalidSig)?;
        if !self.accepted {
            return Err(match DialRequestError::from_code(self.err_code) {
                Some(err) => DialResponseError::Rejected(err),
                None => DialResponseError::NotAccepted,
            });
        }
        Ok(())
    }
}

/// REQUEST/ACCEPT frame payload, JSON-serialized.
///
/// One grammar struct serves both frame types: a REQUEST carries the
/// signed [`StreamDialRequest`], an ACCEPT the signed [`DialResponse`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeData {
    /// Payload format version.
    pub version: String,
    /// Stream initiator's address.
    #[serde(rename = "init_address")]
    pub init_addr: Addr,
    /// Stream responder's address.
    #[serde(rename = "resp_address")]
    pub resp_addr: Addr,
    /// Sender's advertised read window, in bytes.
    pub window: i32,
    /// Signed dial request; present on REQUEST frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dial: Option<StreamDialRequest>,
    /// Signed dial response; present on ACCEPT frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp: Option<DialResponse>,
}

impl HandshakeData {
    /// Payload for a REQUEST frame.
    #[must_use]
    pub fn request(dial: StreamDialRequest, window: i32) -> Self {
        Self {
            version: HANDSHAKE_PAYLOAD_VERSION.to_string(),
            init_addr: dial.src_addr,
            resp_addr: dial.dst_addr,
            window,
            dial: Some(dial),
            resp: None,
        }
    }

    /// Payload for an ACCEPT frame answering a request between the given
    /// addresses.
    #[must_use]
    pub fn accept(resp: DialResponse, init_addr: Addr, resp_addr: Addr, window: i32) -> Self {
        Self {
            version: HANDSHAKE_PAYLOAD_VERSION.to_string(),
            init_addr,
            resp_addr,
            window,
            dial: None,
            resp: Some(resp),
        }
    }

    /// JSON bytes for the frame payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("handshake data serializes")
    }
}

/// Tracks the last accepted dial timestamp per source key, shared by all
/// handshake verifiers of a node. Check-and-record happens under one lock
/// so concurrent dials from the same source cannot both pass.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    last: Mutex<HashMap<PublicKey, i64>>,
}

impl ReplayGuard {
    /// Fresh guard with no recorded timestamps.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last recorded timestamp for `pk`, or 0.
    #[must_use]
    pub fn last_timestamp(&self, pk: &PublicKey) -> i64 {
        self.last
            .lock()
            .expect("replay guard lock")
            .get(pk)
            .copied()
            .unwrap_or(0)
    }

    /// Verify a session dial request and record its timestamp on success.
    ///
    /// # Errors
    ///
    /// Propagates the request's verification failure.
    pub fn verify_session(&self, req: &SessionDialRequest) -> Result<(), DialRequestError> {
        let mut last = self.last.lock().expect("replay guard lock");
        let prev = last.get(&req.src_pk).copied().unwrap_or(0);
        req.verify(prev)?;
        last.insert(req.src_pk, req.timestamp);
        Ok(())
    }

    /// Verify a stream dial request and record its timestamp on success.
    ///
    /// # Errors
    ///
    /// Propagates the request's verification failure.
    pub fn verify_stream(&self, req: &StreamDialRequest) -> Result<(), DialRequestError> {
        let mut last = self.last.lock().expect("replay guard lock");
        let prev = last.get(&req.src_addr.pk).copied().unwrap_or(0);
        req.verify(prev)?;
        last.insert(req.src_addr.pk, req.timestamp);
        Ok(())
    }
}

/// Write a length-prefixed dial message to the raw connection.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub async fn write_dial_msg<W: AsyncWrite + Unpin>(w: &mut W, msg: &[u8]) -> std::io::Result<()> {
    debug_assert!(msg.len() <= u16::MAX as usize);
    w.write_all(&(msg.len() as u16).to_be_bytes()).await?;
    w.write_all(msg).await
}

/// Read a length-prefixed dial message from the raw connection.
///
/// # Errors
///
/// Returns the underlying I/O error; short reads surface as unexpected EOF.
pub async fn read_dial_msg<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len = [0u8; 2];
    r.read_exact(&mut len).await?;
    let mut msg = vec![0u8; u16::from_be_bytes(len) as usize];
    r.read_exact(&mut msg).await?;
    Ok(msg)
}
