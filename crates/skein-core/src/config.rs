//! Session configuration parameters.

use std::time::Duration;

/// Default advertised read window per stream, in bytes.
pub const DEFAULT_WINDOW: i32 = 256 * 1024;

/// Tunables for sessions and their streams.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on the session-level authentication handshake.
    pub handshake_timeout: Duration,
    /// Bound on each stream's REQUEST/ACCEPT exchange.
    pub stream_handshake_timeout: Duration,
    /// Read window advertised for every new stream.
    pub window: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            stream_handshake_timeout: Duration::from_secs(10),
            window: DEFAULT_WINDOW,
        }
    }
}
