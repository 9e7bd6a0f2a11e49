//! # Skein Crypto
//!
//! Identity and key-exchange primitives for the skein messaging overlay.
//!
//! This crate provides:
//! - Ed25519 identity keys and detached signatures ([`PublicKey`],
//!   [`SecretKey`], [`Signature`])
//! - SHA-256 digests for signed-message hashing ([`Hash`], [`sha256`])
//! - The per-stream key exchange, wrapped as an opaque two-message
//!   handshake ([`HandshakeState`], [`StreamCipher`])
//!
//! Everything above this crate treats the key exchange as a black box that
//! produces and consumes opaque byte strings; authentication of those bytes
//! is the caller's job (skein signs them into its dial messages).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod keys;
pub mod noise;

pub use error::CryptoError;
pub use keys::{sha256, Hash, Keypair, PublicKey, SecretKey, Signature};
pub use noise::{HandshakeState, StreamCipher, SEAL_OVERHEAD};
