//! Error types for the transport manager layer.

use thiserror::Error;

use skein_crypto::PublicKey;

/// Discovery collaborator failures.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery service could not be reached or answered badly.
    #[error("discovery unavailable: {0}")]
    Unavailable(String),
}

/// Log store collaborator failures.
#[derive(Debug, Error)]
pub enum LogStoreError {
    /// The log store could not record the entry.
    #[error("log store unavailable: {0}")]
    Unavailable(String),
}

/// Connection-level transport and factory failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has been closed.
    #[error("transport closed")]
    Closed,

    /// The factory has been closed; its accept loop should end.
    #[error("factory closed")]
    FactoryClosed,

    /// No known address for the peer.
    #[error("no known address for peer {0}")]
    UnknownPeer(PublicKey),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The authentication handshake on the raw connection failed.
    #[error("transport handshake failed: {0}")]
    Handshake(#[from] skein_core::Error),
}

/// Settlement handshake failures.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// The handshake did not finish within its bound.
    #[error("settlement timed out")]
    Timeout,

    /// The proposed or echoed entry is inconsistent.
    #[error("settlement entry invalid")]
    InvalidEntry,

    /// An entry signature failed verification.
    #[error("settlement signature invalid")]
    InvalidSignature,

    /// A settlement message could not be decoded.
    #[error("settlement message malformed")]
    Malformed,

    /// The local key is not one of the transport's edges.
    #[error("remote key not found in edges")]
    UnknownRemote,

    /// Transport I/O failed mid-handshake.
    #[error("settlement i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport manager failures.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No factory registered for the requested type.
    #[error("unknown transport type: {0}")]
    UnknownTransportType(String),

    /// The manager is closing; no new transports are made.
    #[error("transport manager is closing")]
    Closing,

    /// The local key is not one of the transport's edges.
    #[error("remote key not found in edges")]
    UnknownRemote,

    /// Factory or transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Settlement handshake failure.
    #[error(transparent)]
    Settlement(#[from] SettlementError),

    /// Discovery collaborator failure.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}
