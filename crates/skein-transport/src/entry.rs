//! Transport entries, statuses, traffic logs, and the discovery / log
//! store collaborator interfaces.

use core::fmt;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::RwLock;

use skein_crypto::{sha256, Hash, PublicKey, Signature};

use crate::error::{DiscoveryError, LogStoreError};

/// Byte width of a transport ID.
pub const TRANSPORT_ID_LEN: usize = 16;

/// Identifier of a transport, derived deterministically from its type and
/// edges so both ends and every re-dial agree on it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId([u8; TRANSPORT_ID_LEN]);

impl TransportId {
    /// Derive the ID for a transport of `tp_type` between two keys. The
    /// keys are sorted first, so the derivation is symmetric.
    #[must_use]
    pub fn derive(tp_type: &str, a: &PublicKey, b: &PublicKey) -> Self {
        let (lo, hi) = if a.as_bytes() <= b.as_bytes() {
            (a, b)
        } else {
            (b, a)
        };
        let mut buf = Vec::with_capacity(tp_type.len() + 1 + 64);
        buf.extend_from_slice(tp_type.as_bytes());
        buf.push(0);
        buf.extend_from_slice(lo.as_bytes());
        buf.extend_from_slice(hi.as_bytes());
        let digest = sha256(&buf);
        let mut id = [0u8; TRANSPORT_ID_LEN];
        id.copy_from_slice(&digest.as_bytes()[..TRANSPORT_ID_LEN]);
        Self(id)
    }

    /// Wrap raw ID bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; TRANSPORT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw ID bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; TRANSPORT_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransportId({})", hex::encode(&self.0[..4]))
    }
}

impl Serialize for TransportId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for TransportId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; TRANSPORT_ID_LEN];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// The edge of `edges` that is not `local`, if `local` is present.
#[must_use]
pub fn remote_edge(edges: &[PublicKey; 2], local: &PublicKey) -> Option<PublicKey> {
    if edges[0] == *local {
        Some(edges[1])
    } else if edges[1] == *local {
        Some(edges[0])
    } else {
        None
    }
}

/// Canonical record of a transport as stored in discovery.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    /// Derived transport ID.
    pub id: TransportId,
    /// The two participating keys, sorted.
    pub edges: [PublicKey; 2],
    /// Factory type that produced the transport.
    #[serde(rename = "type")]
    pub tp_type: String,
    /// Whether the transport is advertised to discovery.
    pub public: bool,
}

impl Entry {
    /// Build the canonical entry for a transport between two keys.
    #[must_use]
    pub fn new(tp_type: &str, a: PublicKey, b: PublicKey, public: bool) -> Self {
        let edges = if a.as_bytes() <= b.as_bytes() {
            [a, b]
        } else {
            [b, a]
        };
        Self {
            id: TransportId::derive(tp_type, &a, &b),
            edges,
            tp_type: tp_type.to_string(),
            public,
        }
    }

    /// The edge that is not `local`, if `local` participates.
    #[must_use]
    pub fn remote(&self, local: &PublicKey) -> Option<PublicKey> {
        remote_edge(&self.edges, local)
    }

    /// Whether the entry's ID and edge order match its own derivation.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.edges[0].as_bytes() <= self.edges[1].as_bytes()
            && self.id == TransportId::derive(&self.tp_type, &self.edges[0], &self.edges[1])
    }

    /// Digest signed by both edges during settlement: the canonical
    /// concatenation of id, edges, type, and the public flag.
    #[must_use]
    pub fn hash(&self) -> Hash {
        let mut buf =
            Vec::with_capacity(TRANSPORT_ID_LEN + 64 + 2 + self.tp_type.len() + 1);
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(self.edges[0].as_bytes());
        buf.extend_from_slice(self.edges[1].as_bytes());
        buf.extend_from_slice(&(self.tp_type.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.tp_type.as_bytes());
        buf.push(u8::from(self.public));
        sha256(&buf)
    }
}

/// An entry plus the settlement signatures: the dialer's, then the
/// acceptor's once it has countersigned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedEntry {
    /// The entry being settled.
    pub entry: Entry,
    /// Dialer's signature over [`Entry::hash`].
    pub init_sig: Signature,
    /// Acceptor's signature, absent until it countersigns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp_sig: Option<Signature>,
}

/// Up/down status of a transport as reported to discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Transport the status concerns.
    pub id: TransportId,
    /// Whether the transport is live.
    pub is_up: bool,
}

/// An entry with its last known status, as discovery returns it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// The stored entry.
    pub entry: Entry,
    /// Last reported status.
    pub is_up: bool,
}

/// Cumulative traffic counters of one transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Bytes sent over the transport.
    pub sent_bytes: u128,
    /// Bytes received over the transport.
    pub recv_bytes: u128,
}

/// Discovery service interface. Implementations must be safe for
/// concurrent calls.
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Entries whose edges include `pk`.
    async fn transports_by_edge(&self, pk: &PublicKey)
        -> Result<Vec<EntryRecord>, DiscoveryError>;

    /// Report status transitions.
    async fn update_statuses(&self, statuses: &[Status]) -> Result<(), DiscoveryError>;
}

/// Persistent traffic log interface. Implementations must be safe for
/// concurrent calls.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Record the cumulative counters for a transport.
    async fn record(&self, id: TransportId, entry: &LogEntry) -> Result<(), LogStoreError>;
}

/// In-memory discovery store, the test-mode stand-in for the real
/// service. Keeps a history of every reported status.
#[derive(Default)]
pub struct MemoryDiscovery {
    records: RwLock<HashMap<TransportId, EntryRecord>>,
    status_log: Mutex<Vec<Status>>,
}

impl MemoryDiscovery {
    /// Fresh empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry with an initial status.
    pub async fn seed(&self, entry: Entry, is_up: bool) {
        self.records
            .write()
            .await
            .insert(entry.id, EntryRecord { entry, is_up });
    }

    /// Every status reported so far, in order.
    #[must_use]
    pub fn status_history(&self) -> Vec<Status> {
        self.status_log.lock().expect("status log lock").clone()
    }
}

#[async_trait]
impl DiscoveryClient for MemoryDiscovery {
    async fn transports_by_edge(
        &self,
        pk: &PublicKey,
    ) -> Result<Vec<EntryRecord>, DiscoveryError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.entry.edges.contains(pk))
            .cloned()
            .collect())
    }

    async fn update_statuses(&self, statuses: &[Status]) -> Result<(), DiscoveryError> {
        let mut records = self.records.write().await;
        for status in statuses {
            if let Some(record) = records.get_mut(&status.id) {
                record.is_up = status.is_up;
            }
        }
        self.status_log
            .lock()
            .expect("status log lock")
            .extend_from_slice(statuses);
        Ok(())
    }
}

/// In-memory log store for tests.
#[derive(Default)]
pub struct MemoryLogStore {
    entries: RwLock<HashMap<TransportId, LogEntry>>,
}

impl MemoryLogStore {
    /// Fresh empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last recorded counters for a transport.
    pub async fn entry(&self, id: &TransportId) -> Option<LogEntry> {
        self.entries.read().await.get(id).copied()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn record(&self, id: TransportId, entry: &LogEntry) -> Result<(), LogStoreError> {
        self.entries.write().await.insert(id, *entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use skein_crypto::Keypair;

    #[test]
    fn id_derivation_is_symmetric() {
        let a = Keypair::generate(&mut OsRng).public;
        let b = Keypair::generate(&mut OsRng).public;
        assert_eq!(
            TransportId::derive("messaging", &a, &b),
            TransportId::derive("messaging", &b, &a)
        );
        assert_ne!(
            TransportId::derive("messaging", &a, &b),
            TransportId::derive("tcp-transport", &a, &b)
        );
    }

    #[test]
    fn entry_is_consistent_and_symmetric() {
        let a = Keypair::generate(&mut OsRng).public;
        let b = Keypair::generate(&mut OsRng).public;
        let ab = Entry::new("messaging", a, b, true);
        let ba = Entry::new("messaging", b, a, true);
        assert_eq!(ab, ba);
        assert!(ab.is_consistent());
        assert_eq!(ab.remote(&a), Some(b));
        assert_eq!(ab.remote(&b), Some(a));
        let c = Keypair::generate(&mut OsRng).public;
        assert_eq!(ab.remote(&c), None);
    }

    #[test]
    fn tampered_entry_is_inconsistent() {
        let a = Keypair::generate(&mut OsRng).public;
        let b = Keypair::generate(&mut OsRng).public;
        let mut entry = Entry::new("messaging", a, b, true);
        entry.tp_type = "other".to_string();
        assert!(!entry.is_consistent());
    }

    #[test]
    fn entry_hash_covers_public_flag() {
        let a = Keypair::generate(&mut OsRng).public;
        let b = Keypair::generate(&mut OsRng).public;
        let public = Entry::new("messaging", a, b, true);
        let private = Entry::new("messaging", a, b, false);
        assert_ne!(public.hash(), private.hash());
    }

    #[tokio::test]
    async fn memory_discovery_filters_by_edge() {
        let a = Keypair::generate(&mut OsRng).public;
        let b = Keypair::generate(&mut OsRng).public;
        let c = Keypair::generate(&mut OsRng).public;
        let disco = MemoryDiscovery::new();
        disco.seed(Entry::new("messaging", a, b, true), true).await;
        disco.seed(Entry::new("messaging", b, c, true), true).await;
        assert_eq!(disco.transports_by_edge(&a).await.unwrap().len(), 1);
        assert_eq!(disco.transports_by_edge(&b).await.unwrap().len(), 2);
        assert_eq!(disco.transports_by_edge(&c).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn memory_discovery_records_status_history() {
        let a = Keypair::generate(&mut OsRng).public;
        let b = Keypair::generate(&mut OsRng).public;
        let disco = MemoryDiscovery::new();
        let entry = Entry::new("messaging", a, b, true);
        disco.seed(entry.clone(), true).await;
        disco
            .update_statuses(&[Status {
                id: entry.id,
                is_up: false,
            }])
            .await
            .unwrap();
        let records = disco.transports_by_edge(&a).await.unwrap();
        assert!(!records[0].is_up);
        assert_eq!(disco.status_history().len(), 1);
    }

    #[test]
    fn signed_entry_json_roundtrip() {
        let a = Keypair::generate(&mut OsRng);
        let b = Keypair::generate(&mut OsRng).public;
        let entry = Entry::new("tcp-transport", a.public, b, false);
        let signed = SignedEntry {
            init_sig: a.secret.sign(entry.hash().as_bytes()),
            entry,
            resp_sig: None,
        };
        let json = serde_json::to_vec(&signed).unwrap();
        let back: SignedEntry = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, signed);
    }
}
