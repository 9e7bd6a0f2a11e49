//! One multiplexed stream: credit-based writes, sealed payloads, and
//! cumulative-offset ACK accounting.
//!
//! The send window is a signed 64-bit credit counter. It starts at the
//! peer's advertised read window and is replenished by ACK frames, whose
//! 2-byte payload is the peer's cumulative received byte count modulo
//! 2^16; the sender credits the wrapping delta since the last ACK. Writes
//! never drive the credit negative: they block until an ACK arrives or the
//! stream closes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, Notify};

use skein_crypto::{StreamCipher, SEAL_OVERHEAD};

use crate::addr::Addr;
use crate::error::{ProtocolError, StreamError};
use crate::frame::decode_ack_payload;
use crate::session::SessionCore;
use crate::MAX_FRAME_PAYLOAD;

/// Largest plaintext chunk per FWD frame: the frame payload bound minus
/// the seal overhead.
pub(crate) const MAX_CHUNK: usize = MAX_FRAME_PAYLOAD - SEAL_OVERHEAD;

/// Cumulative byte counters of one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Plaintext bytes written to the peer.
    pub sent_bytes: u64,
    /// Plaintext bytes received from the peer.
    pub recv_bytes: u64,
}

struct State {
    send_window: i64,
    last_ack: u16,
    recv_total: u64,
    buf: VecDeque<u8>,
    closed: bool,
}

pub(crate) struct StreamInner {
    id: u16,
    local: Addr,
    remote: Addr,
    ephemeral: bool,
    cipher: AsyncMutex<StreamCipher>,
    state: Mutex<State>,
    readable: Notify,
    writable: Notify,
    sent_bytes: AtomicU64,
    recv_bytes: AtomicU64,
}

/// Wait until `check` yields a value, re-checking on every notification.
/// The notification is registered before the re-check, so a wakeup between
/// check and await is not lost.
async fn wait_until<T>(notify: &Notify, mut check: impl FnMut() -> Option<T>) -> T {
    loop {
        if let Some(v) = check() {
            return v;
        }
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if let Some(v) = check() {
            return v;
        }
        notified.await;
    }
}

impl StreamInner {
    pub(crate) fn new(
        id: u16,
        local: Addr,
        remote: Addr,
        cipher: StreamCipher,
        peer_window: i32,
        ephemeral: bool,
    ) -> Self {
        Self {
            id,
            local,
            remote,
            ephemeral,
            cipher: AsyncMutex::new(cipher),
            state: Mutex::new(State {
                send_window: i64::from(peer_window.max(0)),
                last_ack: 0,
                recv_total: 0,
                buf: VecDeque::new(),
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
            sent_bytes: AtomicU64::new(0),
            recv_bytes: AtomicU64::new(0),
        }
    }

    pub(crate) fn id(&self) -> u16 {
        self.id
    }

    pub(crate) fn local_addr(&self) -> Addr {
        self.local
    }

    pub(crate) fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Flip the stream to closed, waking readers and writers. Returns
    /// whether this call did the closing.
    pub(crate) fn mark_closed(&self) -> bool {
        let newly = {
            let mut st = self.state.lock().expect("stream state lock");
            let newly = !st.closed;
            st.closed = true;
            newly
        };
        if newly {
            self.readable.notify_waiters();
            self.writable.notify_waiters();
        }
        newly
    }

    fn is_closed(&self) -> bool {
        self.state.lock().expect("stream state lock").closed
    }

    /// Deliver an inbound FWD payload: open it, buffer the plaintext, and
    /// answer with the cumulative offset ACK.
    pub(crate) async fn receive_fwd(
        &self,
        core: &SessionCore,
        sealed: &[u8],
    ) -> Result<(), StreamError> {
        let plain = self.cipher.lock().await.open(sealed)?;
        let offset = {
            let mut st = self.state.lock().expect("stream state lock");
            if st.closed {
                // late frame racing a close; nothing to deliver
                return Ok(());
            }
            st.buf.extend(plain.iter().copied());
            st.recv_total = st.recv_total.wrapping_add(plain.len() as u64);
            (st.recv_total & 0xFFFF) as u16
        };
        self.recv_bytes.fetch_add(plain.len() as u64, Ordering::Relaxed);
        self.readable.notify_waiters();
        core.write_ack(self.id, offset).await?;
        Ok(())
    }

    /// Apply an inbound ACK: credit the wrapping delta since the last one.
    pub(crate) fn apply_ack(&self, payload: &[u8]) -> Result<(), ProtocolError> {
        let offset = decode_ack_payload(payload)?;
        {
            let mut st = self.state.lock().expect("stream state lock");
            let delta = offset.wrapping_sub(st.last_ack);
            st.last_ack = offset;
            st.send_window += i64::from(delta);
        }
        self.writable.notify_waiters();
        Ok(())
    }

    #[cfg(test)]
    fn send_window(&self) -> i64 {
        self.state.lock().expect("stream state lock").send_window
    }
}

/// One multiplexed logical connection inside a session.
///
/// Socket-like surface: [`read`](Stream::read), [`write`](Stream::write),
/// [`close`](Stream::close). Reads and writes may run concurrently from
/// one task or several.
pub struct Stream {
    inner: Arc<StreamInner>,
    core: Arc<SessionCore>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("stream_id", &self.inner.id)
            .finish()
    }
}

impl Stream {
    pub(crate) fn from_parts(inner: Arc<StreamInner>, core: Arc<SessionCore>) -> Self {
        Self { inner, core }
    }

    /// Stream ID within its session.
    #[must_use]
    pub fn stream_id(&self) -> u16 {
        self.inner.id
    }

    /// Local end of the stream.
    #[must_use]
    pub fn local_addr(&self) -> Addr {
        self.inner.local
    }

    /// Remote end of the stream.
    #[must_use]
    pub fn remote_addr(&self) -> Addr {
        self.inner.remote
    }

    /// Cumulative byte counters.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            sent_bytes: self.inner.sent_bytes.load(Ordering::Relaxed),
            recv_bytes: self.inner.recv_bytes.load(Ordering::Relaxed),
        }
    }

    /// Whether the stream has been closed by either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Read buffered plaintext into `buf`, blocking while the stream is
    /// open and empty. Returns 0 once the stream is closed and drained.
    ///
    /// # Errors
    ///
    /// Close and session death surface as EOF, not as an error.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let inner = &self.inner;
        let n = wait_until(&inner.readable, || {
            let mut st = inner.state.lock().expect("stream state lock");
            if !st.buf.is_empty() {
                let n = buf.len().min(st.buf.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = st.buf.pop_front().expect("buffer non-empty");
                }
                Some(n)
            } else if st.closed {
                Some(0)
            } else {
                None
            }
        })
        .await;
        Ok(n)
    }

    /// Write all of `data`, chunking into sealed FWD frames and blocking
    /// whenever the send credit is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] if the stream closes mid-write and
    /// [`StreamError::Session`] on session failure.
    pub async fn write(&self, data: &[u8]) -> Result<usize, StreamError> {
        let inner = &self.inner;
        let mut written = 0;
        while written < data.len() {
            let n = wait_until(&inner.writable, || {
                let mut st = inner.state.lock().expect("stream state lock");
                if st.closed {
                    return Some(Err(StreamError::Closed));
                }
                if st.send_window <= 0 {
                    return None;
                }
                let n = (st.send_window as usize)
                    .min(MAX_CHUNK)
                    .min(data.len() - written);
                st.send_window -= n as i64;
                Some(Ok(n))
            })
            .await?;
            let sealed = self
                .inner
                .cipher
                .lock()
                .await
                .seal(&data[written..written + n])?;
            self.core.write_fwd(inner.id, sealed).await?;
            inner.sent_bytes.fetch_add(n as u64, Ordering::Relaxed);
            written += n;
        }
        Ok(written)
    }

    /// Close the stream: send CLOSE to the peer, wake blocked readers and
    /// writers, and release the session-table entry and any ephemeral
    /// port. Idempotent.
    pub async fn close(&self) {
        if self.inner.mark_closed() {
            let _ = self.core.write_close(self.inner.id).await;
            self.core.drop_stream(&self.inner);
        }
    }
}
