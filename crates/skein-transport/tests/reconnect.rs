// Integration tests for the transport manager's supervision policy: the
// dialing side re-dials a failed transport in place, the accepting side
// deletes it and reports it down.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::OsRng;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::time::{sleep, timeout, Instant};

use skein_crypto::{Keypair, PublicKey};
use skein_transport::{
    settlement, DynTransport, Entry, Factory, ManagerConfig, ManagerError, MemoryDiscovery,
    MemoryLogStore, Status, Transport, TransportError, TransportManager,
};

fn sorted_edges(a: PublicKey, b: PublicKey) -> [PublicKey; 2] {
    if a.as_bytes() <= b.as_bytes() {
        [a, b]
    } else {
        [b, a]
    }
}

/// In-memory transport over one half of a duplex pipe, with an optional
/// scripted failure time.
struct MockTransport {
    io: AsyncMutex<DuplexStream>,
    edges: [PublicKey; 2],
    fail_at: Option<Instant>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("edges", &self.edges)
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Some(at) = self.fail_at {
            if Instant::now() >= at {
                return Err(std::io::ErrorKind::ConnectionReset.into());
            }
            tokio::select! {
                _ = tokio::time::sleep_until(at) => {
                    Err(std::io::ErrorKind::ConnectionReset.into())
                }
                res = async { self.io.lock().await.read(buf).await } => res,
            }
        } else {
            self.io.lock().await.read(buf).await
        }
    }

    async fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(at) = self.fail_at {
            if Instant::now() >= at {
                return Err(std::io::ErrorKind::ConnectionReset.into());
            }
        }
        self.io.lock().await.write(buf).await
    }

    fn edges(&self) -> [PublicKey; 2] {
        self.edges
    }

    async fn close(&self) {}
}

fn mock_pair(
    a: PublicKey,
    b: PublicKey,
    fail_near_after: Option<Duration>,
) -> (Arc<MockTransport>, Arc<MockTransport>) {
    let edges = sorted_edges(a, b);
    let (near, far) = tokio::io::duplex(4096);
    (
        Arc::new(MockTransport {
            io: AsyncMutex::new(near),
            edges,
            fail_at: fail_near_after.map(|d| Instant::now() + d),
        }),
        Arc::new(MockTransport {
            io: AsyncMutex::new(far),
            edges,
            fail_at: None,
        }),
    )
}

/// Factory yielding duplex transports. Dials spawn a settlement responder
/// for the far end; accepts are scripted through a channel.
struct MockFactory {
    local: Keypair,
    remote: Keypair,
    fail_first_dial_after: Option<Duration>,
    dials: AtomicUsize,
    accept_rx: AsyncMutex<mpsc::Receiver<DynTransport>>,
    closed_tx: watch::Sender<bool>,
}

impl MockFactory {
    fn new(
        local: Keypair,
        remote: Keypair,
        fail_first_dial_after: Option<Duration>,
    ) -> (Arc<Self>, mpsc::Sender<DynTransport>) {
        let (accept_tx, accept_rx) = mpsc::channel(4);
        let (closed_tx, _) = watch::channel(false);
        (
            Arc::new(Self {
                local,
                remote,
                fail_first_dial_after,
                dials: AtomicUsize::new(0),
                accept_rx: AsyncMutex::new(accept_rx),
                closed_tx,
            }),
            accept_tx,
        )
    }

    fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Factory for MockFactory {
    fn transport_type(&self) -> &'static str {
        "mock"
    }

    fn local(&self) -> PublicKey {
        self.local.public
    }

    async fn dial(&self, remote: PublicKey) -> Result<DynTransport, TransportError> {
        assert_eq!(remote, self.remote.public, "mock factory knows one peer");
        let n = self.dials.fetch_add(1, Ordering::SeqCst) + 1;
        let fail_after = if n == 1 {
            self.fail_first_dial_after
        } else {
            None
        };
        let (near, far) = mock_pair(self.local.public, self.remote.public, fail_after);
        let responder = self.remote.clone();
        tokio::spawn(async move {
            let _ = settlement::respond(
                responder.public,
                &responder.secret,
                far.as_ref(),
                Duration::from_secs(5),
            )
            .await;
            // hold the far end open so the near side sees silence, not EOF
            let mut buf = [0u8; 64];
            loop {
                match far.recv(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });
        Ok(near)
    }

    async fn accept(&self) -> Result<DynTransport, TransportError> {
        let mut closed_rx = self.closed_tx.subscribe();
        let mut rx = self.accept_rx.lock().await;
        tokio::select! {
            _ = closed_rx.changed() => Err(TransportError::FactoryClosed),
            tr = rx.recv() => tr.ok_or(TransportError::FactoryClosed),
        }
    }

    async fn close(&self) {
        let _ = self.closed_tx.send(true);
    }
}

fn config(
    local: &Keypair,
    discovery: &Arc<MemoryDiscovery>,
    logs: &Arc<MemoryLogStore>,
) -> ManagerConfig {
    ManagerConfig {
        pubkey: local.public,
        seckey: local.secret.clone(),
        discovery: discovery.clone(),
        log_store: logs.clone(),
        default_peers: Vec::new(),
    }
}

#[tokio::test]
async fn initiator_redials_and_keeps_transport_id() {
    let local = Keypair::generate(&mut OsRng);
    let remote = Keypair::generate(&mut OsRng);
    let discovery = Arc::new(MemoryDiscovery::new());
    let logs = Arc::new(MemoryLogStore::new());
    let (factory, _accept_tx) = MockFactory::new(
        local.clone(),
        remote.clone(),
        Some(Duration::from_millis(100)),
    );
    let manager = TransportManager::new(
        config(&local, &discovery, &logs),
        vec![factory.clone() as Arc<dyn Factory>],
    )
    .await;

    let mtr = manager
        .create_transport(remote.public, "mock", true)
        .await
        .unwrap();
    let id = mtr.id();
    assert_eq!(factory.dial_count(), 1);
    assert!(!mtr.accepted());

    // drive the transport until the scripted failure surfaces
    let mut buf = [0u8; 64];
    loop {
        match mtr.recv(&mut buf).await {
            Err(_) => break,
            Ok(_) => tokio::task::yield_now().await,
        }
    }

    // the worker re-dials in place: same wrapper, same id
    timeout(Duration::from_secs(5), async {
        while factory.dial_count() < 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker never re-dialed");
    sleep(Duration::from_millis(50)).await;

    let kept = manager
        .transport(&id)
        .expect("transport removed despite re-dial");
    assert_eq!(kept.id(), id);
    // no down status reached discovery
    assert!(discovery.status_history().iter().all(|s| s.is_up));

    manager.close().await;
}

#[tokio::test]
async fn accepted_transport_is_deleted_on_failure() {
    let local = Keypair::generate(&mut OsRng);
    let remote = Keypair::generate(&mut OsRng);
    let discovery = Arc::new(MemoryDiscovery::new());
    let logs = Arc::new(MemoryLogStore::new());
    let (factory, accept_tx) = MockFactory::new(local.clone(), remote.clone(), None);
    let manager = TransportManager::new(
        config(&local, &discovery, &logs),
        vec![factory.clone() as Arc<dyn Factory>],
    )
    .await;
    let serve = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.serve().await })
    };

    // hand the factory an inbound transport that dies 100 ms in
    let (near, far) = mock_pair(
        local.public,
        remote.public,
        Some(Duration::from_millis(100)),
    );
    let initiator = {
        let remote = remote.clone();
        tokio::spawn(async move {
            settlement::initiate(
                remote.public,
                &remote.secret,
                far.as_ref(),
                "mock",
                true,
                Duration::from_secs(5),
            )
            .await
            .unwrap()
        })
    };
    accept_tx.send(near).await.unwrap();
    let entry = initiator.await.unwrap();
    let id = entry.id;

    timeout(Duration::from_secs(5), async {
        while manager.transport(&id).is_none() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("accepted transport was never installed");
    let mtr = manager.transport(&id).unwrap();
    assert!(mtr.accepted());

    // drive until the failure; the accepting side deletes, never re-dials
    let mut buf = [0u8; 64];
    loop {
        match mtr.recv(&mut buf).await {
            Err(_) => break,
            Ok(_) => tokio::task::yield_now().await,
        }
    }
    timeout(Duration::from_secs(5), async {
        while manager.transport(&id).is_some() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("accepted transport was not deleted");
    assert_eq!(factory.dial_count(), 0);
    assert!(discovery
        .status_history()
        .contains(&Status { id, is_up: false }));

    manager.close().await;
    let _ = serve.await;
}

#[tokio::test]
async fn serve_reconnects_entries_known_to_discovery() {
    let local = Keypair::generate(&mut OsRng);
    let remote = Keypair::generate(&mut OsRng);
    let discovery = Arc::new(MemoryDiscovery::new());
    let logs = Arc::new(MemoryLogStore::new());
    let entry = Entry::new("mock", local.public, remote.public, true);
    discovery.seed(entry.clone(), false).await;

    let (factory, _accept_tx) = MockFactory::new(local.clone(), remote.clone(), None);
    let manager = TransportManager::new(
        config(&local, &discovery, &logs),
        vec![factory.clone() as Arc<dyn Factory>],
    )
    .await;
    let serve = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.serve().await })
    };

    timeout(Duration::from_secs(5), async {
        while manager.transport(&entry.id).is_none() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("known entry was never re-dialed");
    assert_eq!(factory.dial_count(), 1);
    assert!(discovery.status_history().contains(&Status {
        id: entry.id,
        is_up: true
    }));

    manager.close().await;
    let _ = serve.await;
}

#[tokio::test]
async fn unknown_transport_type_is_refused() {
    let local = Keypair::generate(&mut OsRng);
    let remote = Keypair::generate(&mut OsRng);
    let discovery = Arc::new(MemoryDiscovery::new());
    let logs = Arc::new(MemoryLogStore::new());
    let (factory, _accept_tx) = MockFactory::new(local.clone(), remote.clone(), None);
    let manager = TransportManager::new(
        config(&local, &discovery, &logs),
        vec![factory as Arc<dyn Factory>],
    )
    .await;

    let err = manager
        .create_transport(remote.public, "bogus", true)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::UnknownTransportType(_)));
}

#[tokio::test]
async fn traffic_counters_reach_the_log_store() {
    let local = Keypair::generate(&mut OsRng);
    let remote = Keypair::generate(&mut OsRng);
    let discovery = Arc::new(MemoryDiscovery::new());
    let logs = Arc::new(MemoryLogStore::new());
    let (factory, _accept_tx) = MockFactory::new(local.clone(), remote.clone(), None);
    let manager = TransportManager::new(
        config(&local, &discovery, &logs),
        vec![factory as Arc<dyn Factory>],
    )
    .await;

    let mtr = manager
        .create_transport(remote.public, "mock", true)
        .await
        .unwrap();
    mtr.send(b"0123456789").await.unwrap();

    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(log) = logs.entry(&mtr.id()).await {
                if log.sent_bytes >= 10 {
                    break;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sent bytes never recorded");
    assert_eq!(mtr.log_entry().sent_bytes, 10);

    manager.close().await;
}
