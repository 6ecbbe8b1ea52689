//! The `session` module holds the client's protocol state: connection
//! lifecycle, the outbound queue, packet identifier allocation and the
//! correlation of broker responses with the operations waiting for them.
//!
//! Nothing in here performs I/O directly. The [`engine::Session`] talks to the
//! network through the [`crate::transport::Transport`] trait and is fed
//! transport events by the client's event loop.

pub mod correlation;
pub mod engine;
pub mod handshake;
pub mod identifier;
pub mod state;
pub mod waiter;

pub use correlation::{CorrelationTable, Flow, Reply};
pub use engine::{ClientEvent, Session};
pub use handshake::Qos2Step;
pub use identifier::IdAllocator;
pub use state::SessionState;
pub use waiter::{Outcome, Pending, Waiter};

#[cfg(test)]
mod tests;
