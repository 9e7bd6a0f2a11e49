//! Sessions: authenticated framed connections multiplexing streams.
//!
//! A session owns one TCP connection. After the signed dial-message
//! exchange authenticates both ends, the connection is split: the read
//! half feeds a spawned dispatch loop that routes frames to streams, and
//! the write half sits behind a mutex so outbound frames never interleave.
//!
//! Stream IDs are session-scoped, with parity marking the allocator: even
//! IDs belong to the session initiator, odd IDs to the responder.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use skein_crypto::{Hash, HandshakeState, Keypair, PublicKey, SecretKey, StreamCipher};

use crate::addr::Addr;
use crate::config::SessionConfig;
use crate::dial::{
    self, DialResponse, HandshakeData, ReplayGuard, SessionDialRequest, StreamDialRequest,
};
use crate::error::{Error, FrameError, ProtocolError, SessionError, StreamError};
use crate::frame::{self, read_frame, Frame, FrameType};
use crate::listener::Listener;
use crate::porter::{ListenerHandle, PortManager};
use crate::stream::{Stream, StreamInner};
use crate::ACCEPT_BUFFER_SIZE;

/// Process-wide count of sessions currently serving their dispatch loop.
static LIVE_SESSIONS: AtomicI64 = AtomicI64::new(0);

/// Number of live sessions in this process.
#[must_use]
pub fn live_session_count() -> i64 {
    LIVE_SESSIONS.load(Ordering::SeqCst)
}

/// Whether a stream ID was allocated by the session initiator.
pub(crate) fn is_initiator_id(id: u16) -> bool {
    id % 2 == 0
}

/// Random stream ID of the given side's parity.
pub(crate) fn rand_id(initiator: bool) -> u16 {
    loop {
        let id: u16 = rand::random();
        if is_initiator_id(id) == initiator {
            return id;
        }
    }
}

/// A dial awaiting its ACCEPT frame. The key-exchange state lives behind
/// a mutex so the slot can sit in the shared stream table.
struct PendingStream {
    hs: std::sync::Mutex<HandshakeState>,
    req_hash: Hash,
    peer_pk: PublicKey,
    local_addr: Addr,
    remote_addr: Addr,
    tx: oneshot::Sender<Result<Arc<StreamInner>, Error>>,
}

enum StreamSlot {
    Pending(PendingStream),
    Active(Arc<StreamInner>),
}

pub(crate) struct SessionCore {
    local_pk: PublicKey,
    local_sk: SecretKey,
    remote_pk: PublicKey,
    initiator: bool,
    cfg: SessionConfig,
    ports: Arc<PortManager>,
    guard: Arc<ReplayGuard>,
    writer: AsyncMutex<OwnedWriteHalf>,
    streams: DashMap<u16, StreamSlot>,
    closed: AtomicBool,
    done_tx: watch::Sender<bool>,
}

impl SessionCore {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let mut w = self.writer.lock().await;
        frame::write_frame(&mut *w, frame)
            .await
            .map_err(SessionError::Write)
    }

    pub(crate) async fn write_fwd(&self, id: u16, sealed: Vec<u8>) -> Result<(), SessionError> {
        let frame = Frame::new(FrameType::Fwd, id, sealed).map_err(|e| {
            SessionError::Write(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        self.write_frame(&frame).await
    }

    pub(crate) async fn write_ack(&self, id: u16, offset: u16) -> Result<(), SessionError> {
        self.write_frame(&frame::ack_frame(id, offset)).await
    }

    pub(crate) async fn write_close(&self, id: u16) -> Result<(), SessionError> {
        self.write_frame(&frame::close_frame(id, frame::CLOSE_REASON_PLACEHOLDER))
            .await
    }

    /// Remove a closed stream's table entry and release its ephemeral
    /// port. Only removes the entry if it still holds this very stream.
    pub(crate) fn drop_stream(&self, inner: &Arc<StreamInner>) {
        let removed = self
            .streams
            .remove_if(&inner.id(), |_, slot| {
                matches!(slot, StreamSlot::Active(s) if Arc::ptr_eq(s, inner))
            })
            .is_some();
        if removed && inner.is_ephemeral() {
            self.ports.release(inner.local_addr().port);
        }
    }

    async fn close_stream_with_frame(&self, inner: &Arc<StreamInner>) {
        if inner.mark_closed() {
            self.drop_stream(inner);
            if let Err(e) = self.write_close(inner.id()).await {
                debug!(stream = inner.id(), error = %e, "failed to send CLOSE");
            }
        }
    }

    fn active_stream(&self, id: u16) -> Option<Arc<StreamInner>> {
        self.streams.get(&id).and_then(|slot| match slot.value() {
            StreamSlot::Active(s) => Some(s.clone()),
            StreamSlot::Pending(_) => None,
        })
    }

    async fn handle_frame(self: Arc<Self>, frame: Frame) -> Result<(), SessionError> {
        match frame.frame_type() {
            FrameType::Request => self.handle_request(frame).await,
            FrameType::Accept => self.handle_accept(frame).await,
            FrameType::Fwd => self.handle_fwd(frame).await,
            FrameType::Ack => self.handle_ack(frame).await,
            FrameType::Close => {
                self.handle_close(frame);
                Ok(())
            }
            // reserved
            FrameType::Ok => Ok(()),
        }
    }

    async fn handle_request(self: Arc<Self>, frame: Frame) -> Result<(), SessionError> {
        let id = frame.stream_id();
        let hd: HandshakeData = match serde_json::from_slice(frame.payload()) {
            Ok(hd) => hd,
            Err(_) => {
                debug!(stream = id, "malformed REQUEST payload");
                return self.write_close(id).await;
            }
        };
        let Some(dial) = hd.dial else {
            debug!(stream = id, "REQUEST without dial request");
            return self.write_close(id).await;
        };
        // the requester allocated this id, and it is the session initiator
        // exactly when we accepted the session
        if is_initiator_id(id) == self.initiator {
            debug!(stream = id, "REQUEST with wrong stream-id parity");
            return self.write_close(id).await;
        }
        if self.streams.contains_key(&id) {
            debug!(stream = id, "REQUEST for stream id already in use");
            return self.write_close(id).await;
        }
        if dial.dst_addr.pk != self.local_pk {
            debug!(stream = id, "REQUEST with foreign destination");
            return self.write_close(id).await;
        }
        if hd.window < 0 {
            debug!(stream = id, "REQUEST with negative window");
            return self.write_close(id).await;
        }
        let Some(handle) = self.ports.listener(dial.dst_addr.port) else {
            debug!(
                stream = id,
                port = dial.dst_addr.port,
                "REQUEST for port without listener"
            );
            return self.write_close(id).await;
        };
        if let Err(e) = self.guard.verify_stream(&dial) {
            warn!(stream = id, error = %e, "rejecting stream dial");
            return self.write_close(id).await;
        }
        let (cipher, kex_reply) = match HandshakeState::respond(&dial.noise_msg) {
            Ok(v) => v,
            Err(e) => {
                warn!(stream = id, error = %e, "stream key exchange failed");
                return self.write_close(id).await;
            }
        };

        let local_addr = dial.dst_addr;
        let remote_addr = dial.src_addr;
        let resp = DialResponse::accepting(dial.hash(), kex_reply, &self.local_sk);
        let accept = HandshakeData::accept(resp, remote_addr, local_addr, self.cfg.window);
        let accept_frame = match Frame::new(FrameType::Accept, id, accept.encode()) {
            Ok(f) => f,
            Err(e) => {
                warn!(stream = id, error = %e, "oversized ACCEPT payload");
                return self.write_close(id).await;
            }
        };
        let inner = Arc::new(StreamInner::new(
            id, local_addr, remote_addr, cipher, hd.window, false,
        ));
        self.streams.insert(id, StreamSlot::Active(inner.clone()));
        self.write_frame(&accept_frame).await?;
        debug!(
            stream = id,
            remote = %remote_addr.short_string(),
            "accepted stream"
        );

        // deliver to the listener; a full accept buffer blocks dispatch
        // here until a slot frees
        let stream = Stream::from_parts(inner.clone(), self.clone());
        if handle.tx.send(stream).await.is_err() {
            debug!(stream = id, "listener closed; dropping accepted stream");
            inner.mark_closed();
            self.streams.remove(&id);
            return self.write_close(id).await;
        }
        Ok(())
    }

    async fn handle_accept(&self, frame: Frame) -> Result<(), SessionError> {
        let id = frame.stream_id();
        let Some((_, slot)) = self.streams.remove(&id) else {
            debug!(stream = id, "ACCEPT for unknown stream");
            return self.write_close(id).await;
        };
        let p = match slot {
            StreamSlot::Pending(p) => p,
            StreamSlot::Active(s) => {
                self.streams.insert(id, StreamSlot::Active(s));
                debug!(stream = id, "ACCEPT for active stream; ignored");
                return Ok(());
            }
        };
        let PendingStream {
            hs,
            req_hash,
            peer_pk,
            local_addr,
            remote_addr,
            tx,
        } = p;
        let hs = hs
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let outcome: Result<(StreamCipher, i32), Error> = (move || {
            let hd: HandshakeData = serde_json::from_slice(frame.payload())
                .map_err(|_| Error::Protocol(ProtocolError::MalformedPayload))?;
            let resp = hd
                .resp
                .ok_or(Error::Protocol(ProtocolError::MalformedPayload))?;
            resp.verify(&peer_pk, &req_hash).map_err(Error::DialResponse)?;
            if hd.window < 0 {
                return Err(Error::Protocol(ProtocolError::MalformedPayload));
            }
            let cipher = hs.finalize(&resp.noise_msg).map_err(Error::Crypto)?;
            Ok((cipher, hd.window))
        })();
        match outcome {
            Ok((cipher, window)) => {
                let inner = Arc::new(StreamInner::new(
                    id,
                    local_addr,
                    remote_addr,
                    cipher,
                    window,
                    true,
                ));
                self.streams.insert(id, StreamSlot::Active(inner.clone()));
                if tx.send(Ok(inner)).is_err() {
                    // dialer gave up; tear the stream back down
                    if let Some((_, StreamSlot::Active(s))) = self.streams.remove(&id) {
                        s.mark_closed();
                        if s.is_ephemeral() {
                            self.ports.release(s.local_addr().port);
                        }
                    }
                    return self.write_close(id).await;
                }
                Ok(())
            }
            Err(e) => {
                warn!(stream = id, error = %e, "stream handshake failed");
                self.ports.release(local_addr.port);
                let _ = tx.send(Err(e));
                self.write_close(id).await
            }
        }
    }

    async fn handle_fwd(&self, frame: Frame) -> Result<(), SessionError> {
        let id = frame.stream_id();
        let Some(stream) = self.active_stream(id) else {
            debug!(stream = id, "FWD for unknown stream");
            return self.write_close(id).await;
        };
        if let Err(e) = stream.receive_fwd(self, frame.payload()).await {
            match e {
                // the session's own write path failed; that is fatal
                StreamError::Session(err) => return Err(err),
                other => {
                    debug!(stream = id, error = %other, "closing stream on receive failure");
                    self.close_stream_with_frame(&stream).await;
                }
            }
        }
        Ok(())
    }

    async fn handle_ack(&self, frame: Frame) -> Result<(), SessionError> {
        let id = frame.stream_id();
        let Some(stream) = self.active_stream(id) else {
            debug!(stream = id, "ACK for unknown stream");
            return self.write_close(id).await;
        };
        if let Err(e) = stream.apply_ack(frame.payload()) {
            warn!(stream = id, error = %e, "closing stream on bad ACK");
            self.close_stream_with_frame(&stream).await;
        }
        Ok(())
    }

    fn handle_close(&self, frame: Frame) {
        let id = frame.stream_id();
        if frame.payload().len() != 1 {
            debug!(stream = id, "CLOSE with malformed reason");
        }
        let Some((_, slot)) = self.streams.remove(&id) else {
            return;
        };
        match slot {
            StreamSlot::Active(s) => {
                s.mark_closed();
                if s.is_ephemeral() {
                    self.ports.release(s.local_addr().port);
                }
                debug!(stream = id, "stream closed by peer");
            }
            StreamSlot::Pending(p) => {
                self.ports.release(p.local_addr.port);
                let _ = p.tx.send(Err(StreamError::Closed.into()));
                debug!(stream = id, "stream dial refused by peer");
            }
        }
    }

    /// Final cleanup, run once by the dispatch task: close every stream,
    /// fail pending dials, and shut the connection down.
    async fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.done_tx.send(true);
        let ids: Vec<u16> = self.streams.iter().map(|e| *e.key()).collect();
        for id in ids {
            let Some((_, slot)) = self.streams.remove(&id) else {
                continue;
            };
            match slot {
                StreamSlot::Active(s) => {
                    s.mark_closed();
                    if s.is_ephemeral() {
                        self.ports.release(s.local_addr().port);
                    }
                }
                StreamSlot::Pending(p) => {
                    self.ports.release(p.local_addr.port);
                    let _ = p.tx.send(Err(SessionError::Closed.into()));
                }
            }
        }
        let mut w = self.writer.lock().await;
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut *w).await;
    }
}

async fn dispatch(core: Arc<SessionCore>, mut reader: OwnedReadHalf, mut done: watch::Receiver<bool>) {
    let live = LIVE_SESSIONS.fetch_add(1, Ordering::SeqCst) + 1;
    debug!(peer = %core.remote_pk, live, "session dispatch started");
    loop {
        let frame = tokio::select! {
            _ = done.changed() => break,
            res = read_frame(&mut reader) => match res {
                Ok(f) => f,
                Err(e) => {
                    if !core.is_closed() {
                        debug!(peer = %core.remote_pk, error = %e, "session read failed");
                    }
                    break;
                }
            }
        };
        if let Err(e) = core.clone().handle_frame(frame).await {
            if !core.is_closed() {
                warn!(peer = %core.remote_pk, error = %e, "session dispatch error");
            }
            break;
        }
    }
    core.teardown().await;
    let live = LIVE_SESSIONS.fetch_sub(1, Ordering::SeqCst) - 1;
    debug!(peer = %core.remote_pk, live, "session dispatch ended");
}

/// An authenticated, framed, multiplexed connection to a peer (typically a
/// relay). Cheap to clone; all clones share the same underlying session.
#[derive(Clone)]
pub struct Session {
    core: Arc<SessionCore>,
}

impl Session {
    fn spawn(
        conn: TcpStream,
        local_pk: PublicKey,
        local_sk: SecretKey,
        remote_pk: PublicKey,
        initiator: bool,
        ports: Arc<PortManager>,
        guard: Arc<ReplayGuard>,
        cfg: SessionConfig,
    ) -> Self {
        let (read_half, write_half) = conn.into_split();
        let (done_tx, done_rx) = watch::channel(false);
        let core = Arc::new(SessionCore {
            local_pk,
            local_sk,
            remote_pk,
            initiator,
            cfg,
            ports,
            guard,
            writer: AsyncMutex::new(write_half),
            streams: DashMap::new(),
            closed: AtomicBool::new(false),
            done_tx,
        });
        tokio::spawn(dispatch(core.clone(), read_half, done_rx));
        info!(peer = %remote_pk, initiator, "session established");
        Self { core }
    }

    /// Local identity.
    #[must_use]
    pub fn local_pk(&self) -> PublicKey {
        self.core.local_pk
    }

    /// Peer identity at the other end of the connection.
    #[must_use]
    pub fn remote_pk(&self) -> PublicKey {
        self.core.remote_pk
    }

    /// Whether this side dialed the session (and thus allocates even
    /// stream IDs).
    #[must_use]
    pub fn is_initiator(&self) -> bool {
        self.core.initiator
    }

    /// Whether the session has terminated.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Open a stream to `remote`, reachable through this session's peer.
    ///
    /// Allocates an ephemeral local port and a stream ID of this side's
    /// parity, runs the key exchange inside the signed REQUEST/ACCEPT
    /// pair, and returns the active stream.
    ///
    /// # Errors
    ///
    /// [`StreamError::HandshakeTimeout`] if no ACCEPT arrives in time,
    /// [`StreamError::Closed`] if the peer refuses, and session or
    /// verification failures otherwise.
    pub async fn dial_stream(&self, remote: Addr) -> Result<Stream, Error> {
        let core = &self.core;
        if core.is_closed() {
            return Err(SessionError::Closed.into());
        }
        let local_port = core.ports.next_empty_ephemeral_port();
        let local_addr = Addr::new(core.local_pk, local_port);
        let (hs, kex_msg) = match HandshakeState::initiate() {
            Ok(v) => v,
            Err(e) => {
                core.ports.release(local_port);
                return Err(e.into());
            }
        };
        let dial = StreamDialRequest::new_signed(local_addr, remote, kex_msg, &core.local_sk);
        let req_hash = dial.hash();
        let (tx, rx) = oneshot::channel();
        let mut pending = Some(PendingStream {
            hs: std::sync::Mutex::new(hs),
            req_hash,
            peer_pk: remote.pk,
            local_addr,
            remote_addr: remote,
            tx,
        });
        let id = loop {
            let id = rand_id(core.initiator);
            match core.streams.entry(id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(v) => {
                    v.insert(StreamSlot::Pending(
                        pending.take().expect("pending placed once"),
                    ));
                    break id;
                }
            }
        };
        let abort = |id: u16| {
            if core
                .streams
                .remove_if(&id, |_, slot| matches!(slot, StreamSlot::Pending(_)))
                .is_some()
            {
                core.ports.release(local_port);
            }
        };

        let hd = HandshakeData::request(dial, core.cfg.window);
        let req_frame = match Frame::new(FrameType::Request, id, hd.encode()) {
            Ok(f) => f,
            Err(e) => {
                abort(id);
                return Err(e.into());
            }
        };
        if let Err(e) = core.write_frame(&req_frame).await {
            abort(id);
            return Err(e.into());
        }
        debug!(stream = id, remote = %remote.short_string(), "stream dial sent");

        match timeout(core.cfg.stream_handshake_timeout, rx).await {
            Err(_) => {
                abort(id);
                let _ = core.write_close(id).await;
                Err(StreamError::HandshakeTimeout.into())
            }
            // slot dropped without an answer: the session died
            Ok(Err(_)) => Err(SessionError::Closed.into()),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Ok(Ok(inner))) => Ok(Stream::from_parts(inner, core.clone())),
        }
    }

    /// Close the session: stops dispatch, closes every stream (each
    /// observes session death), and shuts the connection down.
    pub async fn close(&self) {
        if !self.core.is_closed() {
            self.core.closed.store(true, Ordering::SeqCst);
            let _ = self.core.done_tx.send(true);
        }
    }
}

/// A local overlay endpoint: identity, port registry, and replay guard,
/// shared by every session the node dials or accepts.
pub struct Node {
    pk: PublicKey,
    sk: SecretKey,
    ports: Arc<PortManager>,
    guard: Arc<ReplayGuard>,
    cfg: SessionConfig,
}

impl Node {
    /// Build a node from its keypair and session configuration.
    #[must_use]
    pub fn new(keypair: Keypair, cfg: SessionConfig) -> Self {
        Self {
            pk: keypair.public,
            sk: keypair.secret,
            ports: Arc::new(PortManager::new()),
            guard: Arc::new(ReplayGuard::new()),
            cfg,
        }
    }

    /// This node's identity.
    #[must_use]
    pub fn local_pk(&self) -> PublicKey {
        self.pk
    }

    /// Bind a listener on `port`; port 0 binds an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortInUse`] when the port is already occupied.
    pub fn listen(&self, port: u16) -> Result<Listener, Error> {
        if port == 0 {
            return Ok(self.listen_ephemeral());
        }
        let (tx, rx) = mpsc::channel(ACCEPT_BUFFER_SIZE);
        let addr = Addr::new(self.pk, port);
        if !self.ports.try_add_listener(port, ListenerHandle { tx, addr }) {
            return Err(Error::PortInUse(port));
        }
        Ok(Listener::new(addr, rx, self.ports.clone()))
    }

    /// Bind a listener on a random vacant ephemeral port.
    #[must_use]
    pub fn listen_ephemeral(&self) -> Listener {
        loop {
            let port = self.ports.random_ephemeral_port();
            let (tx, rx) = mpsc::channel(ACCEPT_BUFFER_SIZE);
            let addr = Addr::new(self.pk, port);
            if self.ports.try_add_listener(port, ListenerHandle { tx, addr }) {
                return Listener::new(addr, rx, self.ports.clone());
            }
        }
    }

    /// Dial a session over a freshly connected byte transport: send the
    /// signed dial request, verify the response, and start dispatch.
    ///
    /// The whole handshake is bounded by the configured timeout; on any
    /// failure the connection is dropped.
    ///
    /// # Errors
    ///
    /// [`SessionError::HandshakeTimeout`] or the verification failure.
    pub async fn dial_session(
        &self,
        mut conn: TcpStream,
        remote_pk: PublicKey,
    ) -> Result<Session, Error> {
        let req = SessionDialRequest::new_signed(self.pk, remote_pk, &self.sk);
        let req_hash = req.hash();
        let handshake = async {
            dial::write_dial_msg(&mut conn, &req.encode())
                .await
                .map_err(SessionError::Write)?;
            let raw = dial::read_dial_msg(&mut conn)
                .await
                .map_err(|e| SessionError::Read(FrameError::Io(e)))?;
            let resp = DialResponse::decode(&raw).map_err(SessionError::DialResponse)?;
            resp.verify(&remote_pk, &req_hash)
                .map_err(SessionError::DialResponse)?;
            Ok::<(), SessionError>(())
        };
        timeout(self.cfg.handshake_timeout, handshake)
            .await
            .map_err(|_| SessionError::HandshakeTimeout)??;
        Ok(Session::spawn(
            conn,
            self.pk,
            self.sk.clone(),
            remote_pk,
            true,
            self.ports.clone(),
            self.guard.clone(),
            self.cfg.clone(),
        ))
    }

    /// Accept a session on a freshly accepted byte transport: verify the
    /// signed dial request (null keys, monotonic timestamp, signature),
    /// answer, and start dispatch. Rejections are answered with the error
    /// code before the connection is dropped.
    ///
    /// # Errors
    ///
    /// [`SessionError::HandshakeTimeout`] or the verification failure.
    pub async fn accept_session(&self, mut conn: TcpStream) -> Result<Session, Error> {
        let guard = self.guard.clone();
        let sk = self.sk.clone();
        let handshake = async {
            let raw = dial::read_dial_msg(&mut conn)
                .await
                .map_err(|e| SessionError::Read(FrameError::Io(e)))?;
            let req = SessionDialRequest::decode(&raw).map_err(SessionError::DialRequest)?;
            match guard.verify_session(&req) {
                Ok(()) => {
                    let resp = DialResponse::accepting(req.hash(), Vec::new(), &sk);
                    dial::write_dial_msg(&mut conn, &resp.encode())
                        .await
                        .map_err(SessionError::Write)?;
                    Ok(req.src_pk)
                }
                Err(e) => {
                    let resp = DialResponse::rejecting(req.hash(), e, &sk);
                    let _ = dial::write_dial_msg(&mut conn, &resp.encode()).await;
                    Err(SessionError::DialRequest(e))
                }
            }
        };
        let remote_pk = timeout(self.cfg.handshake_timeout, handshake)
            .await
            .map_err(|_| SessionError::HandshakeTimeout)??;
        Ok(Session::spawn(
            conn,
            self.pk,
            self.sk.clone(),
            remote_pk,
            false,
            self.ports.clone(),
            self.guard.clone(),
            self.cfg.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiator_ids_are_even() {
        for _ in 0..64 {
            assert_eq!(rand_id(true) % 2, 0);
            assert_eq!(rand_id(false) % 2, 1);
        }
    }

    #[test]
    fn parity_predicate() {
        assert!(is_initiator_id(0));
        assert!(is_initiator_id(2));
        assert!(!is_initiator_id(1));
        assert!(!is_initiator_id(65535));
    }
}
