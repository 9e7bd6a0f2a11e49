//! # Skein Transport
//!
//! The transport manager of the skein overlay: long-lived node-to-node
//! links ("transports") built by pluggable factories, settled into
//! canonical entries, supervised by per-transport workers, and reconciled
//! with a discovery service.
//!
//! A [`TransportManager`] owns a set of [`ManagedTransport`]s keyed by
//! [`TransportId`]. Each managed transport has a worker that reacts to
//! transport failures — re-dialing when this side initiated the link,
//! deleting it when the link was accepted — and records traffic counters
//! to a [`LogStore`]. Discovery learns of status transitions through the
//! [`DiscoveryClient`] interface.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod error;
pub mod managed;
pub mod manager;
pub mod settlement;
pub mod transport;

pub use entry::{
    remote_edge, DiscoveryClient, Entry, EntryRecord, LogEntry, LogStore, MemoryDiscovery,
    MemoryLogStore, SignedEntry, Status, TransportId,
};
pub use error::{DiscoveryError, LogStoreError, ManagerError, SettlementError, TransportError};
pub use managed::ManagedTransport;
pub use manager::{ManagerConfig, TransportManager, DEFAULT_TRANSPORT_TYPE};
pub use settlement::{SETTLEMENT_ACCEPT_TIMEOUT, SETTLEMENT_DIAL_TIMEOUT};
pub use transport::{DynTransport, Factory, PkTable, TcpFactory, Transport, TCP_TRANSPORT_TYPE};
