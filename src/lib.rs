//! # PopMQTT
//!
//! `popmqtt` is an asynchronous MQTT 3.1.1 client built on tokio. It keeps one
//! session per broker connection, correlates every broker response with the
//! operation waiting for it, and drives the QoS 1 and QoS 2 acknowledgment
//! handshakes on its own.
//!
//! ## Core Modules
//!
//! - `packet`: MQTT control packets and their wire format.
//! - `session`: connection state, outbound queue, packet identifiers and
//!   response correlation.
//! - `transport`: the transport seam and its TCP implementation.
//! - `client`: the public `Client` API and its background tasks.
//! - `config`: connection strings and configuration loading.
//! - `utils`: shared utilities, such as error handling and logging.
//!
//! ```no_run
//! use popmqtt::{Client, QoS};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::from_uri("mqtt://127.0.0.1:1883?clientId=demo")?;
//! client.connect().await?;
//! client.subscribe("sensors/#").await?;
//! client.publish("21.5", "sensors/kitchen", QoS::AtLeastOnce).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod packet;
pub mod session;
pub mod transport;
pub mod utils;

pub use client::Client;
pub use config::ClientSettings;
pub use packet::{Packet, Publish, QoS};
pub use session::{ClientEvent, SessionState};
pub use utils::{ClientError, ConfigError, PacketError};
