//! Correlated Request Channel
//!
//! A single persistent WebSocket to the design plugin's channel relay,
//! multiplexing many in-flight commands. Every outbound command gets a fresh
//! correlation id and an entry in the pending table; replies are matched back
//! through an ordered cascade of matchers because the plugin side does not
//! guarantee one reply shape.
//!
//! # Modules
//!
//! - [`connection`] - `Transport`: socket lifecycle, reconnect, send path
//! - [`matcher`] - reply classification cascade (pure functions)
//! - [`pending`] - pending request table with exactly-once removal
//! - [`timeout`] - progressive timeout state machine
//! - [`backoff`] - randomised reconnect delay
//! - [`envelope`] - outbound wire envelope and progress payloads
//! - [`error`] - `TransportError`

pub mod backoff;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod matcher;
pub mod pending;
pub mod timeout;

pub use connection::{ConnectParams, ConnectionState, Transport};
pub use envelope::{OutboundEnvelope, JOIN_COMMAND};
pub use error::{Result, TransportError};
pub use matcher::{Classification, MatchStrategy};
pub use timeout::DEFAULT_TIMEOUT_EXTENSIONS;
