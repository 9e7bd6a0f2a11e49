//! A transport under management: the wrapper the manager supervises.
//!
//! Reads and writes pass through the wrapper so traffic counters and
//! failures reach the per-transport worker. On re-dial the manager swaps
//! the underlying transport in place, preserving the wrapper — and with it
//! the transport ID and accumulated log entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch, RwLock};

use skein_crypto::PublicKey;

use crate::entry::{Entry, LogEntry, TransportId};
use crate::transport::DynTransport;

/// Receiving ends of a managed transport's signal channels, handed to its
/// worker at spawn.
pub(crate) struct WorkerChannels {
    pub(crate) done_rx: watch::Receiver<bool>,
    pub(crate) err_rx: mpsc::Receiver<String>,
    pub(crate) read_rx: mpsc::UnboundedReceiver<usize>,
    pub(crate) write_rx: mpsc::UnboundedReceiver<usize>,
}

/// A long-lived node-to-node link supervised by the manager.
pub struct ManagedTransport {
    entry: Entry,
    accepted: bool,
    inner: RwLock<DynTransport>,
    log_entry: Mutex<LogEntry>,
    closing: AtomicBool,
    done_tx: watch::Sender<bool>,
    err_tx: mpsc::Sender<String>,
    read_tx: mpsc::UnboundedSender<usize>,
    write_tx: mpsc::UnboundedSender<usize>,
}

impl std::fmt::Debug for ManagedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedTransport")
            .field("entry", &self.entry)
            .field("accepted", &self.accepted)
            .finish()
    }
}

impl ManagedTransport {
    pub(crate) fn new(
        entry: Entry,
        transport: DynTransport,
        accepted: bool,
    ) -> (Arc<Self>, WorkerChannels) {
        let (done_tx, done_rx) = watch::channel(false);
        let (err_tx, err_rx) = mpsc::channel(1);
        let (read_tx, read_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let mtr = Arc::new(Self {
            entry,
            accepted,
            inner: RwLock::new(transport),
            log_entry: Mutex::new(LogEntry::default()),
            closing: AtomicBool::new(false),
            done_tx,
            err_tx,
            read_tx,
            write_tx,
        });
        let channels = WorkerChannels {
            done_rx,
            err_rx,
            read_rx,
            write_rx,
        };
        (mtr, channels)
    }

    /// Transport ID, stable across re-dials.
    #[must_use]
    pub fn id(&self) -> TransportId {
        self.entry.id
    }

    /// The settled entry.
    #[must_use]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Whether this transport is advertised to discovery.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.entry.public
    }

    /// Whether this side accepted (rather than dialed) the transport.
    #[must_use]
    pub fn accepted(&self) -> bool {
        self.accepted
    }

    /// The two participating keys.
    #[must_use]
    pub fn edges(&self) -> [PublicKey; 2] {
        self.entry.edges
    }

    /// The peer key, given the local one.
    #[must_use]
    pub fn remote(&self, local: &PublicKey) -> Option<PublicKey> {
        self.entry.remote(local)
    }

    /// Snapshot of the traffic counters.
    #[must_use]
    pub fn log_entry(&self) -> LogEntry {
        *self.log_entry.lock().expect("log entry lock")
    }

    /// Receive through the underlying transport, reporting the byte count
    /// or the failure to the worker.
    ///
    /// # Errors
    ///
    /// Propagates the transport failure after reporting it.
    pub async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let tr = self.inner.read().await.clone();
        match tr.recv(buf).await {
            Ok(n) => {
                let _ = self.read_tx.send(n);
                Ok(n)
            }
            Err(e) => {
                let _ = self.err_tx.send(e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Send through the underlying transport, reporting the byte count or
    /// the failure to the worker.
    ///
    /// # Errors
    ///
    /// Propagates the transport failure after reporting it.
    pub async fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        let tr = self.inner.read().await.clone();
        match tr.send(buf).await {
            Ok(n) => {
                let _ = self.write_tx.send(n);
                Ok(n)
            }
            Err(e) => {
                let _ = self.err_tx.send(e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Whether the transport is shutting down.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Stop the worker without touching the underlying transport; used
    /// when a replacement managed transport takes over the ID.
    pub(crate) fn kill_worker(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let _ = self.done_tx.send(true);
    }

    /// Swap in a re-dialed underlying transport, preserving the wrapper.
    pub(crate) async fn update_transport(&self, transport: DynTransport) {
        *self.inner.write().await = transport;
    }

    /// Shut the transport down: stop the worker and close the underlying
    /// connection. Idempotent.
    pub async fn close(&self) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            let _ = self.done_tx.send(true);
            let tr = self.inner.read().await.clone();
            tr.close().await;
        }
    }

    /// Add received bytes to the log entry, returning the new snapshot.
    pub(crate) fn record_recv(&self, n: usize) -> LogEntry {
        let mut log = self.log_entry.lock().expect("log entry lock");
        log.recv_bytes += n as u128;
        *log
    }

    /// Add sent bytes to the log entry, returning the new snapshot.
    pub(crate) fn record_sent(&self, n: usize) -> LogEntry {
        let mut log = self.log_entry.lock().expect("log entry lock");
        log.sent_bytes += n as u128;
        *log
    }
}
