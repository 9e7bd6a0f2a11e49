//! The transport manager: keeps long-lived transports alive and
//! reconciled with discovery.
//!
//! Startup re-dials known entries and connects the default peers, then one
//! accept loop per factory runs until the manager closes. Every managed
//! transport gets a worker that reacts to failures: the dialing side
//! re-dials in place (the transport ID survives), the accepting side
//! deletes and waits for the initiator to come back.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use skein_crypto::{PublicKey, SecretKey};

use crate::entry::{
    remote_edge, DiscoveryClient, Entry, LogStore, Status, TransportId,
};
use crate::error::ManagerError;
use crate::managed::{ManagedTransport, WorkerChannels};
use crate::settlement::{self, SETTLEMENT_ACCEPT_TIMEOUT, SETTLEMENT_DIAL_TIMEOUT};
use crate::transport::{DynTransport, Factory};

/// Transport type used for links to the default peers.
pub const DEFAULT_TRANSPORT_TYPE: &str = "messaging";

/// Capacity of the new-transport event channel. Subscribers that fall
/// behind observe a lag instead of blocking new dials.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Configuration of a [`TransportManager`].
pub struct ManagerConfig {
    /// Local identity.
    pub pubkey: PublicKey,
    /// Local signing key.
    pub seckey: SecretKey,
    /// Discovery collaborator.
    pub discovery: Arc<dyn DiscoveryClient>,
    /// Traffic log collaborator.
    pub log_store: Arc<dyn LogStore>,
    /// Peers to keep a transport to at all times.
    pub default_peers: Vec<PublicKey>,
}

struct ManagerInner {
    config: ManagerConfig,
    factories: HashMap<String, Arc<dyn Factory>>,
    transports: RwLock<HashMap<TransportId, Arc<ManagedTransport>>>,
    entries: Mutex<HashSet<Entry>>,
    done_tx: watch::Sender<bool>,
    events: broadcast::Sender<Arc<ManagedTransport>>,
    worker_count: AtomicI32,
}

/// Supervises a set of managed transports. Cheap to clone.
#[derive(Clone)]
pub struct TransportManager {
    inner: Arc<ManagerInner>,
}

impl TransportManager {
    /// Build a manager, loading known transport entries for the local key
    /// from discovery. A discovery failure is logged and treated as an
    /// empty set.
    pub async fn new(config: ManagerConfig, factories: Vec<Arc<dyn Factory>>) -> Self {
        let records = match config.discovery.transports_by_edge(&config.pubkey).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to load transport entries from discovery");
                Vec::new()
            }
        };
        let entries: HashSet<Entry> = records.into_iter().map(|r| r.entry).collect();
        let factories: HashMap<String, Arc<dyn Factory>> = factories
            .into_iter()
            .map(|f| (f.transport_type().to_string(), f))
            .collect();
        let (done_tx, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                factories,
                transports: RwLock::new(HashMap::new()),
                entries: Mutex::new(entries),
                done_tx,
                events,
                worker_count: AtomicI32::new(0),
            }),
        }
    }

    /// Registered factory types.
    #[must_use]
    pub fn factories(&self) -> Vec<String> {
        self.inner.factories.keys().cloned().collect()
    }

    /// The local key.
    #[must_use]
    pub fn local(&self) -> PublicKey {
        self.inner.config.pubkey
    }

    /// The edge of `edges` that is not the local key.
    #[must_use]
    pub fn remote(&self, edges: &[PublicKey; 2]) -> Option<PublicKey> {
        remote_edge(edges, &self.inner.config.pubkey)
    }

    /// Managed transport by ID.
    #[must_use]
    pub fn transport(&self, id: &TransportId) -> Option<Arc<ManagedTransport>> {
        self.inner
            .transports
            .read()
            .expect("transports lock")
            .get(id)
            .cloned()
    }

    /// Number of managed transports.
    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.inner.transports.read().expect("transports lock").len()
    }

    /// Visit every managed transport until `walk` returns false. The read
    /// lock is held for the duration of the walk.
    pub fn walk_transports(&self, mut walk: impl FnMut(&Arc<ManagedTransport>) -> bool) {
        let transports = self.inner.transports.read().expect("transports lock");
        for tp in transports.values() {
            if !walk(tp) {
                break;
            }
        }
    }

    /// Subscribe to newly installed managed transports.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ManagedTransport>> {
        self.inner.events.subscribe()
    }

    /// Number of live per-transport workers.
    #[must_use]
    pub fn worker_count(&self) -> i32 {
        self.inner.worker_count.load(Ordering::SeqCst)
    }

    /// Whether the manager is shutting down.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.inner.is_closing()
    }

    /// Run the manager: re-dial known entries, connect default peers, then
    /// accept inbound transports on every factory until closed.
    pub async fn serve(&self) {
        self.reconnect_transports().await;
        self.create_default_transports().await;

        let mut loops = JoinSet::new();
        for factory in self.inner.factories.values() {
            let inner = self.inner.clone();
            let factory = factory.clone();
            loops.spawn(accept_loop(inner, factory));
        }
        info!("starting transport manager");
        while loops.join_next().await.is_some() {}
    }

    /// Establish a transport to `remote` using the factory for `tp_type`.
    ///
    /// # Errors
    ///
    /// [`ManagerError::UnknownTransportType`] for an unregistered type,
    /// [`ManagerError::Closing`] during shutdown, or the dial / settlement
    /// failure.
    pub async fn create_transport(
        &self,
        remote: PublicKey,
        tp_type: &str,
        public: bool,
    ) -> Result<Arc<ManagedTransport>, ManagerError> {
        let factory = self
            .inner
            .factories
            .get(tp_type)
            .cloned()
            .ok_or_else(|| ManagerError::UnknownTransportType(tp_type.to_string()))?;
        let (transport, entry) = self.inner.dial_transport(&factory, remote, public).await?;
        info!(
            peer = %remote,
            tp_type,
            transport = %entry.id,
            "dialed transport"
        );
        Ok(self
            .inner
            .clone()
            .install(transport, entry, factory, remote, false))
    }

    /// Disconnect and unregister a transport. Closing happens exactly
    /// once, and only if the transport is still registered; discovery is
    /// then told the transport is down.
    pub async fn delete_transport(&self, id: TransportId) {
        self.inner.delete_transport(id).await;
    }

    /// Shut the manager down: stop accept loops, close every transport,
    /// report public ones down in one batch, and close the factories.
    pub async fn close(&self) {
        if self.inner.done_tx.send_replace(true) {
            return;
        }
        info!("closing transport manager");
        let transports: Vec<Arc<ManagedTransport>> = {
            let map = self.inner.transports.read().expect("transports lock");
            map.values().cloned().collect()
        };
        let statuses: Vec<Status> = transports
            .iter()
            .filter(|tr| tr.is_public())
            .map(|tr| Status {
                id: tr.id(),
                is_up: false,
            })
            .collect();
        for tr in &transports {
            tr.close().await;
        }
        if !statuses.is_empty() {
            if let Err(e) = self.inner.config.discovery.update_statuses(&statuses).await {
                warn!(error = %e, "failed to change transport statuses");
            }
        }
        for factory in self.inner.factories.values() {
            factory.close().await;
        }
    }

    /// Re-dial every known entry that has no live transport, reporting
    /// recovered ones up.
    async fn reconnect_transports(&self) {
        let entries: Vec<Entry> = {
            let entries = self.inner.entries.lock().expect("entries lock");
            entries.iter().cloned().collect()
        };
        for entry in entries {
            if self.transport(&entry.id).is_some() {
                continue;
            }
            let Some(remote) = self.remote(&entry.edges) else {
                warn!(transport = %entry.id, "cannot re-establish transport: remote key not found in edges");
                continue;
            };
            match self
                .create_transport(remote, &entry.tp_type, entry.public)
                .await
            {
                Ok(_) => {
                    let status = Status {
                        id: entry.id,
                        is_up: true,
                    };
                    if let Err(e) = self
                        .inner
                        .config
                        .discovery
                        .update_statuses(&[status])
                        .await
                    {
                        warn!(transport = %entry.id, error = %e, "failed to change transport status");
                    }
                }
                Err(e) => {
                    warn!(transport = %entry.id, error = %e, "failed to re-establish transport");
                }
            }
        }
    }

    /// Create transports to the default peers that lack one.
    async fn create_default_transports(&self) {
        for pk in self.inner.config.default_peers.clone() {
            let mut exists = false;
            self.walk_transports(|tr| {
                if tr.remote(&self.inner.config.pubkey) == Some(pk) {
                    exists = true;
                    return false;
                }
                true
            });
            if exists {
                continue;
            }
            if let Err(e) = self
                .create_transport(pk, DEFAULT_TRANSPORT_TYPE, true)
                .await
            {
                warn!(peer = %pk, error = %e, "failed to establish transport to default peer");
            }
        }
    }
}

impl ManagerInner {
    fn is_closing(&self) -> bool {
        *self.done_tx.borrow()
    }

    async fn dial_transport(
        &self,
        factory: &Arc<dyn Factory>,
        remote: PublicKey,
        public: bool,
    ) -> Result<(DynTransport, Entry), ManagerError> {
        if self.is_closing() {
            return Err(ManagerError::Closing);
        }
        let transport = factory.dial(remote).await?;
        match settlement::initiate(
            self.config.pubkey,
            &self.config.seckey,
            transport.as_ref(),
            factory.transport_type(),
            public,
            SETTLEMENT_DIAL_TIMEOUT,
        )
        .await
        {
            Ok(entry) => Ok((transport, entry)),
            Err(e) => {
                transport.close().await;
                Err(e.into())
            }
        }
    }

    fn install(
        self: Arc<Self>,
        transport: DynTransport,
        entry: Entry,
        factory: Arc<dyn Factory>,
        remote: PublicKey,
        accepted: bool,
    ) -> Arc<ManagedTransport> {
        if let Some(old) = self
            .transports
            .read()
            .expect("transports lock")
            .get(&entry.id)
            .cloned()
        {
            old.kill_worker();
        }
        let public = entry.public;
        let (mtr, channels) = ManagedTransport::new(entry.clone(), transport, accepted);
        self.transports
            .write()
            .expect("transports lock")
            .insert(entry.id, mtr.clone());
        self.entries.lock().expect("entries lock").insert(entry);
        let _ = self.events.send(mtr.clone());
        tokio::spawn(manage_transport(
            self.clone(),
            mtr.clone(),
            factory,
            remote,
            public,
            accepted,
            channels,
        ));
        mtr
    }

    async fn accept_transport(
        self: Arc<Self>,
        factory: &Arc<dyn Factory>,
    ) -> Result<Arc<ManagedTransport>, ManagerError> {
        let transport = factory.accept().await?;
        if self.is_closing() {
            transport.close().await;
            return Err(ManagerError::Closing);
        }
        let entry = match settlement::respond(
            self.config.pubkey,
            &self.config.seckey,
            transport.as_ref(),
            SETTLEMENT_ACCEPT_TIMEOUT,
        )
        .await
        {
            Ok(entry) => entry,
            Err(e) => {
                transport.close().await;
                return Err(e.into());
            }
        };
        let remote = entry
            .remote(&self.config.pubkey)
            .ok_or(ManagerError::UnknownRemote)?;
        info!(
            peer = %remote,
            tp_type = %factory.transport_type(),
            transport = %entry.id,
            "accepted transport"
        );
        Ok(self.install(transport, entry, factory.clone(), remote, true))
    }

    async fn delete_transport(&self, id: TransportId) {
        let transport = {
            let mut map = self.transports.write().expect("transports lock");
            map.remove(&id)
        };
        let Some(transport) = transport else {
            return;
        };
        transport.close().await;
        let status = Status { id, is_up: false };
        if let Err(e) = self.config.discovery.update_statuses(&[status]).await {
            warn!(transport = %id, error = %e, "failed to change transport status");
        }
        info!(transport = %id, "unregistered transport");
    }
}

async fn accept_loop(inner: Arc<ManagerInner>, factory: Arc<dyn Factory>) {
    let mut done_rx = inner.done_tx.subscribe();
    loop {
        tokio::select! {
            _ = done_rx.changed() => {
                info!(tp_type = %factory.transport_type(), "accept loop stopping");
                return;
            }
            res = inner.clone().accept_transport(&factory) => {
                if let Err(e) = res {
                    if e.to_string().contains("closed") {
                        info!(tp_type = %factory.transport_type(), "accept loop stopping");
                        return;
                    }
                    warn!(tp_type = %factory.transport_type(), error = %e, "failed to accept transport");
                }
            }
        }
    }
}

/// Per-transport worker: reacts to failures and records traffic.
async fn manage_transport(
    inner: Arc<ManagerInner>,
    mtr: Arc<ManagedTransport>,
    factory: Arc<dyn Factory>,
    remote: PublicKey,
    public: bool,
    accepted: bool,
    mut channels: WorkerChannels,
) {
    let workers = inner.worker_count.fetch_add(1, Ordering::SeqCst) + 1;
    debug!(transport = %mtr.id(), workers, "transport worker spawned");
    loop {
        tokio::select! {
            _ = channels.done_rx.changed() => break,
            err = channels.err_rx.recv() => {
                let Some(err) = err else { break };
                if mtr.is_closing() {
                    debug!(transport = %mtr.id(), error = %err, "transport already closing; skipping error");
                    continue;
                }
                if accepted {
                    info!(transport = %mtr.id(), error = %err, "accepted transport failed; deleting");
                    inner.delete_transport(mtr.id()).await;
                } else {
                    info!(transport = %mtr.id(), error = %err, "transport failed; re-dialing");
                    match inner.dial_transport(&factory, remote, public).await {
                        Ok((transport, _)) => {
                            info!(transport = %mtr.id(), "transport re-dialed");
                            mtr.update_transport(transport).await;
                        }
                        Err(e) => {
                            info!(transport = %mtr.id(), error = %e, "re-dial failed; deleting");
                            inner.delete_transport(mtr.id()).await;
                        }
                    }
                }
            }
            n = channels.read_rx.recv() => {
                let Some(n) = n else { break };
                let log = mtr.record_recv(n);
                if let Err(e) = inner.config.log_store.record(mtr.id(), &log).await {
                    warn!(transport = %mtr.id(), error = %e, "failed to record log entry");
                }
            }
            n = channels.write_rx.recv() => {
                let Some(n) = n else { break };
                let log = mtr.record_sent(n);
                if let Err(e) = inner.config.log_store.record(mtr.id(), &log).await {
                    warn!(transport = %mtr.id(), error = %e, "failed to record log entry");
                }
            }
        }
    }
    let workers = inner.worker_count.fetch_sub(1, Ordering::SeqCst) - 1;
    debug!(transport = %mtr.id(), workers, "transport worker exited");
}
