//! Notification transport.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: performs the authenticated upgrade and the subscribe handshake
//! - [`Connection`]: exclusively owns one live transport and yields [`RawFrame`]s in order
//! - [`config::Config`]: timeouts, heartbeats and the optional reconnect policy
//!
//! Decoding frames into envelopes happens one layer up, in [`crate::bridge`].

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;

pub use connection::{Connection, ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use frame::RawFrame;
