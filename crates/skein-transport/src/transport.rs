//! The transport and factory interfaces, plus the TCP factory.
//!
//! A factory knows how to dial a peer by public key and how to accept
//! inbound connections; both yield authenticated byte transports whose
//! edges name the two participating keys. The manager supervises whatever
//! the factories produce.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::debug;

use skein_core::dial::{read_dial_msg, write_dial_msg, ReplayGuard, SessionDialRequest};
use skein_core::DialResponse;
use skein_crypto::{Keypair, PublicKey, SecretKey};

use crate::error::TransportError;

/// Factory type string of [`TcpFactory`].
pub const TCP_TRANSPORT_TYPE: &str = "tcp-transport";

/// An authenticated byte transport between two keys. Implementations must
/// be safe for concurrent sends and receives.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Receive up to `buf.len()` bytes.
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Send bytes, returning how many were written.
    async fn send(&self, buf: &[u8]) -> std::io::Result<usize>;

    /// The two participating keys, sorted.
    fn edges(&self) -> [PublicKey; 2];

    /// Shut the transport down.
    async fn close(&self);
}

/// Shared handle to a transport object.
pub type DynTransport = Arc<dyn Transport>;

/// Produces transports of one type. Factories are registered with the
/// manager keyed by [`Factory::transport_type`].
#[async_trait]
pub trait Factory: Send + Sync {
    /// Type string identifying the transports this factory makes.
    fn transport_type(&self) -> &'static str;

    /// The local key this factory authenticates as.
    fn local(&self) -> PublicKey;

    /// Dial `remote` and authenticate the connection.
    async fn dial(&self, remote: PublicKey) -> Result<DynTransport, TransportError>;

    /// Accept and authenticate one inbound connection.
    async fn accept(&self) -> Result<DynTransport, TransportError>;

    /// Stop the factory; pending and future accepts fail closed.
    async fn close(&self);
}

/// Static resolution table from overlay keys to socket addresses.
#[derive(Default)]
pub struct PkTable {
    map: RwLock<HashMap<PublicKey, SocketAddr>>,
}

impl PkTable {
    /// Fresh empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer's address.
    pub fn add(&self, pk: PublicKey, addr: SocketAddr) {
        self.map.write().expect("pk table lock").insert(pk, addr);
    }

    /// Look up a peer's address.
    #[must_use]
    pub fn resolve(&self, pk: &PublicKey) -> Option<SocketAddr> {
        self.map.read().expect("pk table lock").get(pk).copied()
    }
}

/// A TCP connection authenticated by the signed dial-message exchange.
pub struct TcpTransport {
    reader: AsyncMutex<OwnedReadHalf>,
    writer: AsyncMutex<OwnedWriteHalf>,
    edges: [PublicKey; 2],
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("edges", &self.edges)
            .finish()
    }
}

impl TcpTransport {
    fn new(conn: TcpStream, a: PublicKey, b: PublicKey) -> Self {
        let (reader, writer) = conn.into_split();
        let edges = if a.as_bytes() <= b.as_bytes() {
            [a, b]
        } else {
            [b, a]
        };
        Self {
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
            edges,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.lock().await.read(buf).await
    }

    async fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.lock().await.write(buf).await
    }

    fn edges(&self) -> [PublicKey; 2] {
        self.edges
    }

    async fn close(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// Factory producing [`TcpTransport`]s, resolving peers through a
/// [`PkTable`] and authenticating every connection with the session
/// dial-message exchange.
pub struct TcpFactory {
    local_pk: PublicKey,
    local_sk: SecretKey,
    table: Arc<PkTable>,
    listener: TcpListener,
    guard: ReplayGuard,
    closed_tx: watch::Sender<bool>,
}

impl TcpFactory {
    /// Bind the factory's listener on `bind_addr`.
    ///
    /// # Errors
    ///
    /// Returns the bind failure.
    pub async fn bind(
        keypair: Keypair,
        bind_addr: SocketAddr,
        table: Arc<PkTable>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let (closed_tx, _) = watch::channel(false);
        Ok(Self {
            local_pk: keypair.public,
            local_sk: keypair.secret,
            table,
            listener,
            guard: ReplayGuard::new(),
            closed_tx,
        })
    }

    /// The listener's bound address.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }
}

#[async_trait]
impl Factory for TcpFactory {
    fn transport_type(&self) -> &'static str {
        TCP_TRANSPORT_TYPE
    }

    fn local(&self) -> PublicKey {
        self.local_pk
    }

    async fn dial(&self, remote: PublicKey) -> Result<DynTransport, TransportError> {
        if self.is_closed() {
            return Err(TransportError::FactoryClosed);
        }
        let addr = self
            .table
            .resolve(&remote)
            .ok_or(TransportError::UnknownPeer(remote))?;
        let mut conn = TcpStream::connect(addr).await?;
        let req = SessionDialRequest::new_signed(self.local_pk, remote, &self.local_sk);
        write_dial_msg(&mut conn, &req.encode()).await?;
        let raw = read_dial_msg(&mut conn).await?;
        let resp = DialResponse::decode(&raw)
            .map_err(|e| TransportError::Handshake(e.into()))?;
        resp.verify(&remote, &req.hash())
            .map_err(|e| TransportError::Handshake(e.into()))?;
        debug!(peer = %remote, %addr, "tcp transport dialed");
        Ok(Arc::new(TcpTransport::new(conn, self.local_pk, remote)))
    }

    async fn accept(&self) -> Result<DynTransport, TransportError> {
        let mut closed_rx = self.closed_tx.subscribe();
        if *closed_rx.borrow() {
            return Err(TransportError::FactoryClosed);
        }
        let (mut conn, peer_addr) = tokio::select! {
            _ = closed_rx.changed() => return Err(TransportError::FactoryClosed),
            res = self.listener.accept() => res?,
        };
        let raw = read_dial_msg(&mut conn).await?;
        let req = SessionDialRequest::decode(&raw)
            .map_err(|e| TransportError::Handshake(skein_core::Error::from(e)))?;
        match self.guard.verify_session(&req) {
            Ok(()) => {
                let resp = DialResponse::accepting(req.hash(), Vec::new(), &self.local_sk);
                write_dial_msg(&mut conn, &resp.encode()).await?;
                debug!(peer = %req.src_pk, %peer_addr, "tcp transport accepted");
                Ok(Arc::new(TcpTransport::new(conn, self.local_pk, req.src_pk)))
            }
            Err(e) => {
                let resp = DialResponse::rejecting(req.hash(), e, &self.local_sk);
                let _ = write_dial_msg(&mut conn, &resp.encode()).await;
                Err(TransportError::Handshake(skein_core::Error::from(e)))
            }
        }
    }

    async fn close(&self) {
        let _ = self.closed_tx.send(true);
    }
}
