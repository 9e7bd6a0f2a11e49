//! Local port registry: listeners and ephemeral allocations.
//!
//! One map guards both kinds of occupancy. Listeners accept inbound
//! streams; ephemeral entries reserve a local port for an outbound stream
//! until it closes. No operation blocks beyond the lock.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::addr::Addr;
use crate::stream::Stream;

/// First port of the ephemeral range.
pub const FIRST_EPHEMERAL_PORT: u16 = 49152;
/// One past the last ephemeral port; draws are in `[first, last)`.
pub const LAST_EPHEMERAL_PORT: u16 = 65535;

/// Sending side of a listener's accept buffer, as stored in the registry.
#[derive(Clone)]
pub(crate) struct ListenerHandle {
    pub(crate) tx: mpsc::Sender<Stream>,
    pub(crate) addr: Addr,
}

enum PortEntry {
    Listener(ListenerHandle),
    Ephemeral,
}

/// Registry of occupied local ports.
pub struct PortManager {
    rng: Mutex<StdRng>,
    ports: RwLock<HashMap<u16, PortEntry>>,
}

impl PortManager {
    /// New empty registry. The RNG is seeded from the wall clock, one seed
    /// per instance.
    #[must_use]
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ports: RwLock::new(HashMap::new()),
        }
    }

    /// Listener bound to `port`, if any.
    pub(crate) fn listener(&self, port: u16) -> Option<ListenerHandle> {
        let ports = self.ports.read().expect("port registry lock");
        match ports.get(&port) {
            Some(PortEntry::Listener(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Insert a listener if the port is vacant. Returns false when the
    /// port is already occupied.
    pub(crate) fn try_add_listener(&self, port: u16, handle: ListenerHandle) -> bool {
        let mut ports = self.ports.write().expect("port registry lock");
        if ports.contains_key(&port) {
            return false;
        }
        ports.insert(port, PortEntry::Listener(handle));
        true
    }

    /// Reserve and return a vacant port drawn uniformly from the ephemeral
    /// range, retrying on collision. The reservation lasts until
    /// [`PortManager::release`].
    #[must_use]
    pub fn next_empty_ephemeral_port(&self) -> u16 {
        loop {
            let port = self.random_ephemeral_port();
            let mut ports = self.ports.write().expect("port registry lock");
            if ports.contains_key(&port) {
                continue;
            }
            ports.insert(port, PortEntry::Ephemeral);
            return port;
        }
    }

    /// Uniform draw from `[49152, 65535)`, without reserving.
    pub(crate) fn random_ephemeral_port(&self) -> u16 {
        self.rng
            .lock()
            .expect("port rng lock")
            .gen_range(FIRST_EPHEMERAL_PORT..LAST_EPHEMERAL_PORT)
    }

    /// Free a port, whether listener or ephemeral reservation.
    pub fn release(&self, port: u16) {
        self.ports
            .write()
            .expect("port registry lock")
            .remove(&port);
    }

    /// Whether `port` is currently occupied.
    #[must_use]
    pub fn is_occupied(&self, port: u16) -> bool {
        self.ports
            .read()
            .expect("port registry lock")
            .contains_key(&port)
    }
}

impl Default for PortManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_crypto::PublicKey;

    fn dummy_handle(port: u16) -> ListenerHandle {
        let (tx, _rx) = mpsc::channel(1);
        ListenerHandle {
            tx,
            addr: Addr::new(PublicKey::null(), port),
        }
    }

    #[test]
    fn ephemeral_ports_in_range() {
        let pm = PortManager::new();
        for _ in 0..256 {
            let port = pm.next_empty_ephemeral_port();
            assert!((FIRST_EPHEMERAL_PORT..LAST_EPHEMERAL_PORT).contains(&port));
            pm.release(port);
        }
    }

    #[test]
    fn ephemeral_never_returns_listener_port() {
        let pm = PortManager::new();
        // occupy a slice of the ephemeral range with listeners
        for port in FIRST_EPHEMERAL_PORT..FIRST_EPHEMERAL_PORT + 64 {
            assert!(pm.try_add_listener(port, dummy_handle(port)));
        }
        for _ in 0..1024 {
            let port = pm.next_empty_ephemeral_port();
            assert!(!(FIRST_EPHEMERAL_PORT..FIRST_EPHEMERAL_PORT + 64).contains(&port));
            pm.release(port);
        }
    }

    #[test]
    fn ephemeral_reservation_blocks_reuse() {
        let pm = PortManager::new();
        let a = pm.next_empty_ephemeral_port();
        let b = pm.next_empty_ephemeral_port();
        assert_ne!(a, b);
        assert!(pm.is_occupied(a));
        pm.release(a);
        assert!(!pm.is_occupied(a));
    }

    #[test]
    fn listener_lookup_and_uniqueness() {
        let pm = PortManager::new();
        assert!(pm.listener(80).is_none());
        assert!(pm.try_add_listener(80, dummy_handle(80)));
        assert!(pm.listener(80).is_some());
        // second bind on the same port is refused
        assert!(!pm.try_add_listener(80, dummy_handle(80)));
        pm.release(80);
        assert!(pm.listener(80).is_none());
    }

    #[test]
    fn ephemeral_entry_is_not_a_listener() {
        let pm = PortManager::new();
        let port = pm.next_empty_ephemeral_port();
        assert!(pm.listener(port).is_none());
        assert!(pm.is_occupied(port));
    }
}
