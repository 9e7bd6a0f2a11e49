//! # Skein Core
//!
//! The framed stream protocol of the skein messaging overlay: authenticated
//! sessions over a reliable byte transport, multiplexing many
//! credit-flow-controlled streams addressed by `(public key, port)` pairs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Session                                 │
//! │  (authenticated framed connection; one dispatch loop, one       │
//! │   serialized writer)                                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Streams                                 │
//! │  (multiplexed logical connections; sealed payloads, credit      │
//! │   windows replenished by ACK frames)                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Frames                                  │
//! │  (5-byte header: type ‖ stream id ‖ payload length)             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A [`Node`] owns the local identity, the [`PortManager`] and the replay
//! guard, and builds [`Session`]s by dialing or accepting TCP connections.
//! Within a session, [`Session::dial_stream`] opens a [`Stream`] to any
//! `(public key, port)` endpoint reachable through the peer, and
//! [`Listener`]s accept inbound streams on local ports.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod addr;
pub mod config;
pub mod dial;
pub mod error;
pub mod frame;
pub mod listener;
pub mod porter;
pub mod session;
pub mod stream;

pub use addr::Addr;
pub use config::SessionConfig;
pub use dial::{
    DialResponse, HandshakeData, ReplayGuard, SessionDialRequest, StreamDialRequest,
};
pub use error::{
    DialRequestError, DialResponseError, Error, FrameError, ProtocolError, SessionError,
    StreamError,
};
pub use frame::{Frame, FrameType};
pub use listener::Listener;
pub use porter::PortManager;
pub use session::{live_session_count, Node, Session};
pub use stream::{Stream, StreamStats};

/// Version string carried in stream handshake payloads.
pub const HANDSHAKE_PAYLOAD_VERSION: &str = "2.0";

/// Fixed frame header size in bytes: type(1) ‖ id(2) ‖ pay_len(2).
pub const FRAME_HEADER_LEN: usize = 5;

/// Maximum frame payload length.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Capacity of each listener's accept buffer.
pub const ACCEPT_BUFFER_SIZE: usize = 20;
