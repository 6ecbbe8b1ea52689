//! The `transport` module is responsible for moving packets between the
//! session and the broker.
//!
//! A transport is consumed through two seams:
//! - the [`Transport`] trait, which the session calls to open the connection,
//!   send packets and close it again
//! - a stream of [`TransportEvent`]s pushed into an unbounded channel, which the
//!   client's event loop feeds back into the session one at a time
//!
//! Every event travels in an [`Envelope`] tagged with the epoch returned by the
//! `open` call that produced it. The session drops envelopes from any epoch but
//! the current one, so a slow socket can never act on a newer connection.
//!
//! [`tcp::TcpTransport`] is the production implementation.

pub mod tcp;

use tokio::sync::{mpsc, oneshot};

use crate::packet::{Packet, Publish};
use crate::utils::ClientError;

pub use tcp::TcpTransport;

/// Everything a transport reports back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection is ready to carry CONNECT.
    Open,
    /// CONNACK received.
    Connect(Packet),
    /// Any other non-PUBLISH packet from the broker.
    Response(Packet),
    /// Inbound PUBLISH.
    Message(Publish),
    Close(Option<ClientError>),
    Error(Option<ClientError>),
}

impl TransportEvent {
    /// Routes a decoded packet to the event the session expects for it.
    pub fn from_packet(packet: Packet) -> Self {
        match packet {
            Packet::Connack(_) => TransportEvent::Connect(packet),
            Packet::Publish(publish) => TransportEvent::Message(publish),
            other => TransportEvent::Response(other),
        }
    }
}

/// Identifies one `open` of a transport.
pub type Epoch = u64;

/// A transport event and the connection it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub epoch: Epoch,
    pub event: TransportEvent,
}

impl Envelope {
    pub fn new(epoch: Epoch, event: TransportEvent) -> Self {
        Self { epoch, event }
    }
}

pub type EventSender = mpsc::UnboundedSender<Envelope>;
pub type EventReceiver = mpsc::UnboundedReceiver<Envelope>;

/// Byte sink and connection lifecycle used by the session.
///
/// None of these calls block. `open` only starts connecting; readiness or
/// failure arrives later as [`TransportEvent::Open`] or
/// [`TransportEvent::Error`]. `send` returns once the packet has been accepted
/// for writing.
pub trait Transport: Send + 'static {
    /// Starts a new connection, closing any previous one, and returns the
    /// epoch its events will carry. Epochs never repeat for one transport.
    fn open(&mut self) -> Result<Epoch, ClientError>;

    fn send(&mut self, packet: &Packet) -> Result<(), ClientError>;

    fn close(&mut self);

    /// Completes once everything accepted by the last connection has been
    /// written out, or the connection is gone. `None` when there is nothing
    /// left to wait for.
    fn take_drained(&mut self) -> Option<oneshot::Receiver<()>> {
        None
    }
}
