//! The `client` module is the public face of the crate.
//!
//! It provides the [`Client`] struct, which composes a session, a transport
//! and the background tasks driving them into a set of future-returning
//! operations (connect, subscribe, publish, acknowledge) and one outward event
//! stream.

pub mod mqtt_client;
pub use mqtt_client::Client;
