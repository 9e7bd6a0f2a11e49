//! Ed25519 identity keys, detached signatures, and SHA-256 digests.
//!
//! Overlay nodes are identified by their public key. Keys are kept as raw
//! bytes so they can be used as map keys and compared without point
//! validation; validation happens at verify time. The all-zero value is the
//! null key, used by the dial-message verifiers to reject unset fields.

use core::fmt;

use ed25519_dalek::{Signer, Verifier};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::CryptoError;

/// Byte width of a public key.
pub const PUBLIC_KEY_LEN: usize = 32;
/// Byte width of a secret key seed.
pub const SECRET_KEY_LEN: usize = 32;
/// Byte width of a detached signature.
pub const SIGNATURE_LEN: usize = 64;
/// Byte width of a digest.
pub const HASH_LEN: usize = 32;

/// An overlay identity: raw ed25519 verifying-key bytes.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// The null (all-zero) key.
    #[must_use]
    pub const fn null() -> Self {
        Self([0; PUBLIC_KEY_LEN])
    }

    /// Wrap raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] if the slice is not exactly
    /// 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; PUBLIC_KEY_LEN] =
            slice.try_into().map_err(|_| CryptoError::InvalidLength {
                expected: PUBLIC_KEY_LEN,
                actual: slice.len(),
            })?;
        Ok(Self(bytes))
    }

    /// Parse a key from its 64-char hex form.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidHex`] on malformed input.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| CryptoError::InvalidHex)?;
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Whether this is the null (all-zero) key.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == [0; PUBLIC_KEY_LEN]
    }

    /// Verify a detached signature over `msg`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the bytes are not a
    /// valid curve point, or [`CryptoError::InvalidSignature`] if the
    /// signature does not verify.
    pub fn verify(&self, msg: &[u8], sig: &Signature) -> Result<(), CryptoError> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(&self.0)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = ed25519_dalek::Signature::from_bytes(&sig.0);
        key.verify(msg, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..4]))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// An ed25519 signing key. Zeroized on drop by the underlying library.
#[derive(Clone)]
pub struct SecretKey(ed25519_dalek::SigningKey);

impl SecretKey {
    /// Generate a fresh key from a cryptographic RNG.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self(ed25519_dalek::SigningKey::generate(rng))
    }

    /// Rebuild a key from its 32-byte seed.
    #[must_use]
    pub fn from_bytes(bytes: [u8; SECRET_KEY_LEN]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// The corresponding public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }

    /// Sign `msg`, producing a detached signature.
    #[must_use]
    pub fn sign(&self, msg: &[u8]) -> Signature {
        Signature(self.0.sign(msg).to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print key material
        write!(f, "SecretKey(..)")
    }
}

/// A public/secret key pair.
#[derive(Clone, Debug)]
pub struct Keypair {
    /// Public half.
    pub public: PublicKey,
    /// Secret half.
    pub secret: SecretKey,
}

impl Keypair {
    /// Generate a fresh pair from a cryptographic RNG.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        let secret = SecretKey::generate(rng);
        Self {
            public: secret.public_key(),
            secret,
        }
    }
}

/// A detached ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    /// The null (all-zero) signature, used when hashing or signing a
    /// message whose signature field must be zeroed.
    #[must_use]
    pub const fn null() -> Self {
        Self([0; SIGNATURE_LEN])
    }

    /// Wrap raw signature bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a signature from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] if the slice is not exactly
    /// 64 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SIGNATURE_LEN] =
            slice.try_into().map_err(|_| CryptoError::InvalidLength {
                expected: SIGNATURE_LEN,
                actual: slice.len(),
            })?;
        Ok(Self(bytes))
    }

    /// Raw signature bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..4]))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; SIGNATURE_LEN];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// A SHA-256 digest.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a digest from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] if the slice is not exactly
    /// 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; HASH_LEN] = slice.try_into().map_err(|_| CryptoError::InvalidLength {
            expected: HASH_LEN,
            actual: slice.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}..)", hex::encode(&self.0[..4]))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; HASH_LEN];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// SHA-256 of `data`.
#[must_use]
pub fn sha256(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    Hash(digest.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn sign_verify_roundtrip() {
        let kp = Keypair::generate(&mut OsRng);
        let msg = b"authenticate this message";
        let sig = kp.secret.sign(msg);
        assert!(kp.public.verify(msg, &sig).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let kp = Keypair::generate(&mut OsRng);
        let sig = kp.secret.sign(b"original");
        assert!(matches!(
            kp.public.verify(b"tampered", &sig),
            Err(CryptoError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let kp = Keypair::generate(&mut OsRng);
        let other = Keypair::generate(&mut OsRng);
        let sig = kp.secret.sign(b"message");
        assert!(other.public.verify(b"message", &sig).is_err());
    }

    #[test]
    fn null_key_detection() {
        assert!(PublicKey::null().is_null());
        let kp = Keypair::generate(&mut OsRng);
        assert!(!kp.public.is_null());
    }

    #[test]
    fn public_key_hex_roundtrip() {
        let kp = Keypair::generate(&mut OsRng);
        let parsed = PublicKey::from_hex(&kp.public.to_string()).unwrap();
        assert_eq!(parsed, kp.public);
    }

    #[test]
    fn public_key_json_is_hex_string() {
        let pk = PublicKey::null();
        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json, format!("\"{}\"", "0".repeat(64)));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pk);
    }

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of the empty string
        let h = sha256(b"");
        assert_eq!(
            h.to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
