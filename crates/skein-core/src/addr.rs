//! Overlay addresses: `(public key, port)` pairs.

use core::fmt;

use serde::{Deserialize, Serialize};

use skein_crypto::PublicKey;

/// An overlay endpoint. Port 0 means "unbound".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Addr {
    /// Identity of the node.
    #[serde(rename = "public_key")]
    pub pk: PublicKey,
    /// Port on that node; 0 when unbound.
    pub port: u16,
}

impl Addr {
    /// Build an address.
    #[must_use]
    pub const fn new(pk: PublicKey, port: u16) -> Self {
        Self { pk, port }
    }

    /// Whether the address names a concrete port.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.port != 0
    }

    /// Shortened form: first 8 hex chars of the key, then the port.
    #[must_use]
    pub fn short_string(&self) -> String {
        let pk = self.pk.to_string();
        if self.port == 0 {
            format!("{}:~", &pk[..8])
        } else {
            format!("{}:{}", &pk[..8], self.port)
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == 0 {
            write!(f, "{}:~", self.pk)
        } else {
            write!(f, "{}:{}", self.pk, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unbound() {
        let addr = Addr::new(PublicKey::null(), 0);
        assert_eq!(addr.to_string(), format!("{}:~", "0".repeat(64)));
    }

    #[test]
    fn display_bound() {
        let addr = Addr::new(PublicKey::null(), 80);
        assert_eq!(addr.to_string(), format!("{}:80", "0".repeat(64)));
    }

    #[test]
    fn short_string_truncates_key() {
        let addr = Addr::new(PublicKey::null(), 42);
        assert_eq!(addr.short_string(), "00000000:42");
        let unbound = Addr::new(PublicKey::null(), 0);
        assert_eq!(unbound.short_string(), "00000000:~");
    }

    #[test]
    fn json_shape() {
        let addr = Addr::new(PublicKey::null(), 7);
        let json = serde_json::to_value(&addr).unwrap();
        assert_eq!(json["public_key"], "0".repeat(64));
        assert_eq!(json["port"], 7);
        let back: Addr = serde_json::from_value(json).unwrap();
        assert_eq!(back, addr);
    }
}
