//! Session engine
//!
//! This module contains the synchronous core of the client, responsible for:
//! - tracking the connection state and performing the CONNECT/CONNACK exchange
//! - queueing outbound packets until the session is connected, then flushing
//!   them strictly in submission order
//! - registering every request that expects an answer in the correlation table
//! - driving the QoS 1 and QoS 2 acknowledgment handshakes in both directions
//! - failing every outstanding waiter exactly once when the transport goes away
//!
//! Concurrency and usage notes:
//! - The public API is synchronous and designed to be held behind a single lock
//!   (`Arc<Mutex<Session>>`) by the client. The same lock guards the
//!   correlation table and the identifier allocator, so allocate-and-register
//!   and release-and-resolve can never interleave.
//! - Transport events are applied one at a time through [`Session::handle`],
//!   which drops anything reported by a connection other than the current one.

use std::collections::VecDeque;

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use super::correlation::{CorrelationTable, Flow, Matched, Reply};
use super::handshake::Qos2Step;
use super::state::SessionState;
use super::waiter::{Pending, Waiter};
use crate::config::ClientSettings;
use crate::packet::{
    Connack, Connect, ConnectReturnCode, Packet, Publish, QoS, Subscribe, Unsubscribe,
};
use crate::transport::{Envelope, Epoch, Transport, TransportEvent};
use crate::utils::ClientError;

/// Capacity of the outward event channel. Slow receivers lag rather than block
/// the session.
pub const EVENT_CAPACITY: usize = 256;

/// Events pushed to everyone watching the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Every inbound PUBLISH, emitted before any automatic acknowledgment.
    Message(Publish),
    Close(Option<ClientError>),
    Error(Option<ClientError>),
}

/// An outbound packet waiting for the session to connect.
///
/// `forget` is only set for fire-and-forget packets: their waiter resolves as
/// soon as the transport accepts the bytes during the flush. Packets expecting
/// an acknowledgment are already registered in the correlation table.
#[derive(Debug)]
struct Queued {
    packet: Packet,
    forget: Option<Waiter<Reply>>,
}

pub struct Session {
    settings: ClientSettings,
    transport: Box<dyn Transport>,
    /// Epoch of the live connection, `None` while disconnected.
    epoch: Option<Epoch>,
    state: SessionState,
    table: CorrelationTable,
    queue: VecDeque<Queued>,
    connect_waiters: Vec<Waiter<()>>,
    auto_ack: bool,
    flushing: bool,
    events: broadcast::Sender<ClientEvent>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.settings.client_id)
            .field("state", &self.state)
            .field("outstanding", &self.table.len())
            .field("queued", &self.queue.len())
            .field("auto_ack", &self.auto_ack)
            .finish()
    }
}

impl Session {
    pub fn new(settings: ClientSettings, transport: Box<dyn Transport>) -> Self {
        Self::with_table(settings, transport, CorrelationTable::default())
    }

    pub fn with_table(
        settings: ClientSettings,
        transport: Box<dyn Transport>,
        table: CorrelationTable,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            settings,
            transport,
            epoch: None,
            state: SessionState::Disconnected,
            table,
            queue: VecDeque::new(),
            connect_waiters: Vec::new(),
            auto_ack: true,
            flushing: false,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn epoch(&self) -> Option<Epoch> {
        self.epoch
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn table(&self) -> &CorrelationTable {
        &self.table
    }

    /// Number of packets waiting for the session to connect.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn auto_ack(&self) -> bool {
        self.auto_ack
    }

    pub fn enable_auto_ack(&mut self) {
        self.auto_ack = true;
    }

    pub fn disable_auto_ack(&mut self) {
        self.auto_ack = false;
    }

    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Starts connecting, or joins the attempt already in flight.
    pub fn connect(&mut self) -> Pending<()> {
        match self.state {
            SessionState::Connected => Pending::ready(Ok(())),
            state if state.is_connecting() => {
                let (waiter, pending) = Waiter::channel();
                self.connect_waiters.push(waiter);
                pending
            }
            _ => {
                let (waiter, pending) = Waiter::channel();
                self.connect_waiters.push(waiter);
                self.open();
                pending
            }
        }
    }

    /// Subscribes to one topic filter.
    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Pending<Reply> {
        let id = match self.table.allocate() {
            Ok(id) => id,
            Err(e) => return Pending::ready(Err(e)),
        };
        let mut subscribe = Subscribe::new(topic, qos);
        subscribe.id = Some(id);
        self.send(Packet::Subscribe(subscribe), Flow::Reply)
    }

    pub fn unsubscribe(&mut self, topic: &str) -> Pending<Reply> {
        let id = match self.table.allocate() {
            Ok(id) => id,
            Err(e) => return Pending::ready(Err(e)),
        };
        let mut unsubscribe = Unsubscribe::new(topic);
        unsubscribe.id = Some(id);
        self.send(Packet::Unsubscribe(unsubscribe), Flow::Reply)
    }

    /// Publishes according to the packet's QoS.
    ///
    /// - QoS 0 resolves with `None` once the transport accepts the bytes
    /// - QoS 1 resolves with the PUBACK
    /// - QoS 2 resolves with the PUBCOMP, after PUBREL was sent automatically
    ///
    /// A preset identifier is kept if it is free, otherwise a fresh one is used.
    pub fn publish(&mut self, mut publish: Publish) -> Pending<Reply> {
        if publish.qos == QoS::AtMostOnce {
            publish.id = None;
            return self.send_and_forget(Packet::Publish(publish));
        }

        let id = match publish.id {
            Some(id) if self.table.reserve(id) => id,
            preset => {
                if let Some(id) = preset {
                    debug!("packet identifier {id} is in use, allocating another");
                }
                match self.table.allocate() {
                    Ok(id) => id,
                    Err(e) => return Pending::ready(Err(e)),
                }
            }
        };
        publish.id = Some(id);

        let flow = match publish.qos {
            QoS::ExactlyOnce => Flow::ExactlyOnce(Qos2Step::PublishSent),
            _ => Flow::Reply,
        };
        self.send(Packet::Publish(publish), flow)
    }

    /// Acknowledges an inbound publish.
    ///
    /// QoS 1 sends PUBACK. QoS 2 sends PUBREC and, once the broker's PUBREL
    /// arrives, PUBCOMP; the returned future resolves after PUBCOMP went out.
    /// Acknowledging a QoS 2 publish whose PUBREC is already out is a no-op.
    pub fn acknowledge(&mut self, publish: &Publish) -> Pending<Reply> {
        if publish.qos == QoS::AtMostOnce {
            return Pending::ready(Ok(None));
        }
        let Some(id) = publish.id else {
            return Pending::ready(Err(ClientError::Protocol(format!(
                "cannot acknowledge qos {} publish on `{}` without packet identifier",
                publish.qos as u8, publish.topic
            ))));
        };

        match publish.qos {
            QoS::AtLeastOnce => self.send_and_forget(Packet::Puback(id)),
            _ => {
                let (waiter, pending) = Waiter::channel();
                if !self.table.register_inbound(id, waiter) {
                    debug!("PUBREC({id}) already sent");
                    return Pending::ready(Ok(None));
                }
                // On failure the teardown has already failed the inbound waiter.
                let _ = self.dispatch(Packet::Pubrec(id));
                pending
            }
        }
    }

    /// Sends PINGREQ; resolves with the next PINGRESP.
    pub fn ping(&mut self) -> Pending<Reply> {
        self.send(Packet::Pingreq, Flow::Reply)
    }

    /// Sends DISCONNECT and closes the transport, failing everything outstanding.
    ///
    /// The bytes may still be on their way out when this returns; see
    /// [`Session::take_drained`].
    pub fn disconnect(&mut self) -> Result<(), ClientError> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }
        let result = if self.state.is_connected() {
            self.transport.send(&Packet::Disconnect)
        } else {
            Ok(())
        };
        info!("disconnecting from {}", self.settings.address());
        self.transport.close();
        self.teardown(ClientError::ConnectionClosed);
        self.emit(ClientEvent::Close(None));
        result
    }

    /// Signal from the transport that the last connection finished writing.
    pub fn take_drained(&mut self) -> Option<oneshot::Receiver<()>> {
        self.transport.take_drained()
    }

    /// Applies an event if it was reported by the current connection.
    pub fn handle(&mut self, envelope: Envelope) {
        let Envelope { epoch, event } = envelope;
        if self.epoch != Some(epoch) {
            debug!("ignoring {event:?} from stale connection {epoch}");
            return;
        }
        self.handle_event(event);
    }

    /// Applies one transport event without checking where it came from.
    pub fn handle_event(&mut self, event: TransportEvent) {
        if self.state == SessionState::Disconnected
            && matches!(event, TransportEvent::Close(_) | TransportEvent::Error(_))
        {
            debug!("ignoring {event:?} from a transport that is already closed");
            return;
        }
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Connect(packet) => self.on_connack(packet),
            TransportEvent::Response(packet) => self.on_response(packet),
            TransportEvent::Message(publish) => self.on_message(publish),
            TransportEvent::Close(reason) => {
                info!("connection closed");
                self.transport.close();
                self.teardown(reason.clone().unwrap_or(ClientError::ConnectionClosed));
                self.emit(ClientEvent::Close(reason));
            }
            TransportEvent::Error(reason) => {
                let cause = reason
                    .clone()
                    .unwrap_or_else(|| ClientError::Transport("unspecified error".to_string()));
                error!("transport error: {cause}");
                self.transport.close();
                self.teardown(cause);
                self.emit(ClientEvent::Error(reason));
            }
        }
    }

    fn open(&mut self) {
        self.state = SessionState::Connecting;
        info!("connecting to {}", self.settings.address());
        match self.transport.open() {
            Ok(epoch) => self.epoch = Some(epoch),
            Err(e) => {
                error!("failed to open transport: {e}");
                self.teardown(e.clone());
                self.emit(ClientEvent::Error(Some(e)));
            }
        }
    }

    fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            warn!("transport opened while {}, ignoring", self.state);
            return;
        }

        if !self.settings.clean_session && self.settings.client_id.is_empty() {
            warn!(
                "establishing a session without a client id is not allowed, enabling clean session"
            );
            self.settings.clean_session = true;
        }

        let connect = Connect {
            clean_session: self.settings.clean_session,
            keep_alive: self.settings.keep_alive,
            username: self.settings.username.clone(),
            password: self.settings.password.clone(),
            ..Connect::new(self.settings.client_id.clone())
        };

        self.state = SessionState::ConnackPending;
        debug!("sending CONNECT for `{}`", connect.client_id);
        if let Err(e) = self.transport.send(&Packet::Connect(connect)) {
            self.transport_failed(e);
        }
    }

    fn on_connack(&mut self, packet: Packet) {
        let code = match &packet {
            Packet::Connack(Connack { code, .. }) => *code,
            other => {
                warn!("dropping {other}: expected CONNACK");
                return;
            }
        };
        if self.state != SessionState::ConnackPending {
            warn!("CONNACK received while {}, ignoring", self.state);
            return;
        }

        if code != ConnectReturnCode::Accepted {
            let refused = ClientError::ConnectionRefused(code);
            error!("{refused}");
            self.transport.close();
            self.teardown(refused.clone());
            self.emit(ClientEvent::Close(Some(refused)));
            return;
        }

        info!("connected as `{}`", self.settings.client_id);
        self.state = SessionState::Connected;
        for mut waiter in self.connect_waiters.drain(..) {
            waiter.resolve(());
        }
        self.flush();

        let topics = self.settings.topics.clone();
        for topic in topics {
            debug!("auto-subscribing to {topic}");
            let _ = self.subscribe(&topic, QoS::AtMostOnce);
        }
    }

    fn on_response(&mut self, packet: Packet) {
        debug!("received {packet}");
        match self.table.resolve_incoming(packet) {
            Matched::Settled => {}
            Matched::Pubrec { id, tracked } => {
                self.table.resume(id, tracked, Qos2Step::PubrelSent);
                let _ = self.dispatch(Packet::Pubrel(id));
            }
            Matched::Pubrel { id, tracked } => match self.dispatch(Packet::Pubcomp(id)) {
                Ok(()) => tracked.resolve(Some(Packet::Pubrel(id))),
                Err(e) => tracked.fail(e),
            },
            Matched::Unmatched(packet) => {
                warn!("dropping {packet}: no outstanding request matches it");
            }
        }
    }

    fn on_message(&mut self, publish: Publish) {
        debug!(
            "message on `{}` (qos {}, id {:?})",
            publish.topic, publish.qos as u8, publish.id
        );
        self.emit(ClientEvent::Message(publish.clone()));
        if self.auto_ack {
            let _ = self.acknowledge(&publish);
        }
    }

    /// Registers a waiter for `packet`, then sends or queues it.
    fn send(&mut self, packet: Packet, flow: Flow) -> Pending<Reply> {
        let (waiter, pending) = Waiter::channel();
        match packet.id() {
            Some(id) => debug!("message ({id}) sending: {}", packet.name()),
            None => debug!("adding untracked waiter for {}", packet.name()),
        }
        self.table.register(packet.id(), waiter, flow);
        // A failed send tears the session down, which fails the waiter registered above.
        let _ = self.dispatch(packet);
        pending
    }

    /// Sends a packet nobody answers. Resolves as soon as the bytes are accepted.
    fn send_and_forget(&mut self, packet: Packet) -> Pending<Reply> {
        if self.state.is_connected() {
            return match self.transport.send(&packet) {
                Ok(()) => Pending::ready(Ok(None)),
                Err(e) => {
                    self.transport_failed(e.clone());
                    Pending::ready(Err(e))
                }
            };
        }

        let (waiter, pending) = Waiter::channel();
        self.enqueue(packet, Some(waiter));
        pending
    }

    /// Sends now when connected, otherwise queues without a waiter.
    fn dispatch(&mut self, packet: Packet) -> Result<(), ClientError> {
        if !self.state.is_connected() {
            self.enqueue(packet, None);
            return Ok(());
        }
        match self.transport.send(&packet) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.transport_failed(e.clone());
                Err(e)
            }
        }
    }

    fn enqueue(&mut self, packet: Packet, forget: Option<Waiter<Reply>>) {
        debug!("queueing {packet} until connected");
        self.queue.push_back(Queued { packet, forget });
        if self.state == SessionState::Disconnected {
            self.open();
        }
    }

    /// Drains the queue in order. Guarded against re-entrant calls.
    fn flush(&mut self) {
        if self.flushing {
            return;
        }
        self.flushing = true;
        while self.state.is_connected() {
            let Some(queued) = self.queue.pop_front() else {
                break;
            };
            match self.transport.send(&queued.packet) {
                Ok(()) => {
                    if let Some(mut waiter) = queued.forget {
                        waiter.resolve(None);
                    }
                }
                Err(e) => {
                    if let Some(mut waiter) = queued.forget {
                        waiter.fail(e.clone());
                    }
                    self.flushing = false;
                    self.transport_failed(e);
                    return;
                }
            }
        }
        self.flushing = false;
    }

    fn transport_failed(&mut self, error: ClientError) {
        error!("transport failed: {error}");
        self.transport.close();
        self.teardown(error.clone());
        self.emit(ClientEvent::Error(Some(error)));
    }

    /// Returns to `Disconnected` and fails every outstanding future exactly once.
    fn teardown(&mut self, error: ClientError) {
        self.state = SessionState::Disconnected;
        self.epoch = None;
        for mut waiter in self.connect_waiters.drain(..) {
            waiter.fail(error.clone());
        }
        let failed = self.table.fail_all(&error);
        let dropped = self.queue.len();
        for queued in self.queue.drain(..) {
            if let Some(mut waiter) = queued.forget {
                waiter.fail(error.clone());
            }
        }
        if failed > 0 || dropped > 0 {
            debug!("failed {failed} outstanding and {dropped} queued requests: {error}");
        }
    }

    fn emit(&self, event: ClientEvent) {
        // No receivers is fine, events are best effort.
        let _ = self.events.send(event);
    }
}
