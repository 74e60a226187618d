//! Wallet session: identity, generation counter and lifecycle.

pub mod connection;
pub mod state;

pub use connection::ConnectionManager;
pub use state::{SessionState, SessionStore};
