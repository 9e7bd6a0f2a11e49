//! Bound endpoints accepting inbound streams.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::addr::Addr;
use crate::error::Error;
use crate::porter::PortManager;
use crate::stream::Stream;

/// A bound local endpoint. Sessions enqueue accepted inbound streams onto
/// its buffer (capacity [`crate::ACCEPT_BUFFER_SIZE`]); a full buffer
/// exerts backpressure on the delivering session's dispatch loop.
pub struct Listener {
    addr: Addr,
    rx: mpsc::Receiver<Stream>,
    ports: Arc<PortManager>,
    closed: bool,
}

impl Listener {
    pub(crate) fn new(addr: Addr, rx: mpsc::Receiver<Stream>, ports: Arc<PortManager>) -> Self {
        Self {
            addr,
            rx,
            ports,
            closed: false,
        }
    }

    /// Address this listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Addr {
        self.addr
    }

    /// Wait for the next inbound stream.
    ///
    /// After [`Listener::close`], already-buffered streams are still
    /// delivered, then the listener reports closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerClosed`] once the buffer is drained after
    /// closing.
    pub async fn accept(&mut self) -> Result<Stream, Error> {
        self.rx.recv().await.ok_or(Error::ListenerClosed)
    }

    /// Unbind the port and stop taking new streams. Sessions trying to
    /// deliver afterwards close those streams instead.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.rx.close();
            self.ports.release(self.addr.port);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}
