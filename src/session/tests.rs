use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::correlation::{CorrelationTable, Flow, Matched};
use super::engine::{ClientEvent, Session};
use super::handshake::Qos2Step;
use super::identifier::IdAllocator;
use super::state::SessionState;
use super::waiter::{Pending, Waiter};
use crate::config::ClientSettings;
use crate::packet::{Connack, ConnectReturnCode, Packet, Publish, QoS, Suback};
use crate::transport::{Envelope, Epoch, Transport, TransportEvent};
use crate::utils::ClientError;

/// Shared view of everything a [`MockTransport`] was asked to do.
#[derive(Clone, Default)]
struct Recorder {
    sent: Arc<Mutex<Vec<Packet>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    broken: Arc<AtomicBool>,
}

impl Recorder {
    fn sent(&self) -> Vec<Packet> {
        self.sent.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockTransport(Recorder);

impl Transport for MockTransport {
    fn open(&mut self) -> Result<Epoch, ClientError> {
        let opened = self.0.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(opened as Epoch)
    }

    fn send(&mut self, packet: &Packet) -> Result<(), ClientError> {
        if self.0.broken.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("broken pipe".to_string()));
        }
        self.0.sent.lock().unwrap().push(packet.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.0.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn settings() -> ClientSettings {
    ClientSettings {
        client_id: "tester".to_string(),
        ..ClientSettings::default()
    }
}

fn session_with(settings: ClientSettings) -> (Session, Recorder) {
    let recorder = Recorder::default();
    let session = Session::new(settings, Box::new(MockTransport(recorder.clone())));
    (session, recorder)
}

fn accepted() -> TransportEvent {
    TransportEvent::Connect(Packet::Connack(Connack {
        session_present: false,
        code: ConnectReturnCode::Accepted,
    }))
}

/// A session that went through CONNECT/CONNACK, with the recorder cleared.
fn connected() -> (Session, Recorder) {
    let (mut session, recorder) = session_with(settings());
    let _ = session.connect();
    session.handle_event(TransportEvent::Open);
    session.handle_event(accepted());
    assert_eq!(session.state(), SessionState::Connected);
    recorder.clear();
    (session, recorder)
}

fn publish(topic: &str, qos: QoS, id: Option<u16>) -> Publish {
    let mut publish = Publish::new(topic, Bytes::from_static(b"payload"), qos);
    publish.id = id;
    publish
}

fn outcome<T>(pending: &mut Pending<T>) -> Option<Result<T, ClientError>> {
    pending.try_take()
}

// --- waiter ---

#[test]
fn test_waiter_settles_once() {
    let (mut waiter, mut pending) = Waiter::channel();
    assert!(outcome(&mut pending).is_none());
    assert!(waiter.resolve(5));
    assert!(!waiter.fail(ClientError::ConnectionClosed));
    assert!(waiter.is_settled());
    assert_eq!(outcome(&mut pending), Some(Ok(5)));
}

#[test]
fn test_dropped_waiter_fails_pending() {
    let (waiter, mut pending) = Waiter::<()>::channel();
    drop(waiter);
    assert_eq!(outcome(&mut pending), Some(Err(ClientError::ConnectionClosed)));
}

#[tokio::test]
async fn test_pending_is_awaitable() {
    let (mut waiter, pending) = Waiter::channel();
    tokio::spawn(async move {
        waiter.resolve("done");
    });
    assert_eq!(pending.await, Ok("done"));
    assert_eq!(Pending::ready(Ok(1)).await, Ok(1));
}

// --- identifiers ---

#[test]
fn test_allocator_never_repeats_outstanding_ids() {
    let mut ids = IdAllocator::with_seed(7);
    let mut seen = std::collections::HashSet::new();
    for _ in 0..1000 {
        let id = ids.allocate().unwrap();
        assert_ne!(id, 0);
        assert!(seen.insert(id));
    }
    assert_eq!(ids.in_use(), 1000);
}

#[test]
fn test_allocator_release_and_reserve() {
    let mut ids = IdAllocator::new();
    assert!(ids.reserve(7));
    assert!(!ids.reserve(7));
    assert!(ids.is_in_use(7));
    assert!(ids.release(7));
    assert!(!ids.release(7));
    assert!(!ids.is_in_use(7));
}

#[test]
fn test_allocator_reports_exhaustion() {
    let mut ids = IdAllocator::with_seed(1);
    for id in 1..=u16::MAX {
        ids.reserve(id);
    }
    assert_eq!(ids.allocate(), Err(ClientError::ExhaustedIdentifierSpace));
    assert_eq!(ids.in_use(), usize::from(u16::MAX));
}

// --- handshake ---

#[test]
fn test_qos2_steps() {
    let step = Qos2Step::PublishSent.advance(&Packet::Pubrec(1)).unwrap();
    assert_eq!(step, Qos2Step::PubrecReceived);
    assert!(!step.is_complete());
    let step = Qos2Step::PubrelSent.advance(&Packet::Pubcomp(1)).unwrap();
    assert!(step.is_complete());
    assert!(matches!(
        Qos2Step::PublishSent.advance(&Packet::Pubcomp(1)),
        Err(ClientError::Protocol(_))
    ));
}

// --- correlation table ---

#[test]
fn test_table_matches_by_id_and_fifo() {
    let mut table = CorrelationTable::new(IdAllocator::with_seed(3));
    let id = table.allocate().unwrap();
    let (by_id, mut by_id_pending) = Waiter::channel();
    let (ping, mut ping_pending) = Waiter::channel();
    table.register(Some(id), by_id, Flow::Reply);
    table.register(None, ping, Flow::Reply);
    assert_eq!(table.len(), 2);
    assert_eq!(table.untracked(), 1);

    assert!(matches!(
        table.resolve_incoming(Packet::Pingresp),
        Matched::Settled
    ));
    assert_eq!(outcome(&mut ping_pending), Some(Ok(Some(Packet::Pingresp))));

    assert!(matches!(
        table.resolve_incoming(Packet::Unsuback(id)),
        Matched::Settled
    ));
    assert_eq!(
        outcome(&mut by_id_pending),
        Some(Ok(Some(Packet::Unsuback(id))))
    );
    assert!(table.is_empty());
    assert!(!table.ids().is_in_use(id));

    assert!(matches!(
        table.resolve_incoming(Packet::Puback(id)),
        Matched::Unmatched(Packet::Puback(_))
    ));
}

#[test]
fn test_table_fail_all_empties_every_registry() {
    let mut table = CorrelationTable::default();
    let id = table.allocate().unwrap();
    let (a, mut a_pending) = Waiter::channel();
    let (b, mut b_pending) = Waiter::channel();
    let (c, mut c_pending) = Waiter::channel();
    table.register(Some(id), a, Flow::Reply);
    table.register(None, b, Flow::Reply);
    assert!(table.register_inbound(11, c));

    assert_eq!(table.fail_all(&ClientError::ConnectionClosed), 3);
    assert!(table.is_empty());
    assert_eq!(table.ids().in_use(), 0);
    for pending in [&mut a_pending, &mut b_pending, &mut c_pending] {
        assert_eq!(outcome(pending), Some(Err(ClientError::ConnectionClosed)));
    }
}

#[test]
fn test_table_keeps_inbound_ids_apart() {
    let mut table = CorrelationTable::default();
    assert!(table.reserve(5));
    let (outbound, _outbound_pending) = Waiter::channel();
    table.register(Some(5), outbound, Flow::Reply);
    let (inbound, _inbound_pending) = Waiter::channel();
    assert!(table.register_inbound(5, inbound));
    let (again, _) = Waiter::channel();
    assert!(!table.register_inbound(5, again));

    assert!(matches!(
        table.resolve_incoming(Packet::Pubrel(5)),
        Matched::Pubrel { id: 5, .. }
    ));
    assert!(table.contains(5));
    assert!(!table.has_inbound(5));
}

// --- engine ---

#[test]
fn test_connect_is_idempotent() {
    let (mut session, recorder) = session_with(settings());
    let mut first = session.connect();
    let mut second = session.connect();
    assert_eq!(recorder.opened(), 1);
    assert_eq!(session.state(), SessionState::Connecting);

    session.handle_event(TransportEvent::Open);
    assert_eq!(session.state(), SessionState::ConnackPending);
    let _ = session.connect();
    assert_eq!(recorder.opened(), 1);
    assert!(outcome(&mut first).is_none());

    session.handle_event(accepted());
    assert_eq!(outcome(&mut first), Some(Ok(())));
    assert_eq!(outcome(&mut second), Some(Ok(())));
    assert_eq!(outcome(&mut session.connect()), Some(Ok(())));
    assert_eq!(recorder.opened(), 1);
    assert!(matches!(&recorder.sent()[..], [Packet::Connect(_)]));
}

#[test]
fn test_sends_in_call_order_when_connected() {
    let (mut session, recorder) = connected();
    let _ = session.publish(publish("a", QoS::AtMostOnce, None));
    let _ = session.subscribe("b", QoS::AtLeastOnce);
    let _ = session.publish(publish("c", QoS::AtLeastOnce, None));
    let _ = session.ping();

    let names: Vec<&str> = recorder.sent().iter().map(Packet::name).collect();
    assert_eq!(names, ["PUBLISH", "SUBSCRIBE", "PUBLISH", "PINGREQ"]);
    assert_eq!(session.queued(), 0);
}

#[test]
fn test_queued_packets_flush_in_order_after_connack() {
    let (mut session, recorder) = session_with(settings());
    let mut fire = session.publish(publish("a", QoS::AtMostOnce, None));
    let mut sub = session.subscribe("b", QoS::AtMostOnce);
    let _ = session.publish(publish("c", QoS::AtLeastOnce, None));

    assert_eq!(recorder.opened(), 1);
    assert!(recorder.sent().is_empty());
    assert_eq!(session.queued(), 3);
    assert!(outcome(&mut fire).is_none());

    session.handle_event(TransportEvent::Open);
    assert!(matches!(&recorder.sent()[..], [Packet::Connect(_)]));
    session.handle_event(accepted());

    let sent = recorder.sent();
    let names: Vec<&str> = sent.iter().map(Packet::name).collect();
    assert_eq!(names, ["CONNECT", "PUBLISH", "SUBSCRIBE", "PUBLISH"]);
    match (&sent[1], &sent[3]) {
        (Packet::Publish(a), Packet::Publish(c)) => {
            assert_eq!(a.topic, "a");
            assert_eq!(c.topic, "c");
        }
        other => panic!("unexpected packets {other:?}"),
    }
    assert_eq!(session.queued(), 0);
    assert_eq!(outcome(&mut fire), Some(Ok(None)));
    assert!(outcome(&mut sub).is_none());
}

#[test]
fn test_subscribe_resolves_with_suback() {
    let (mut session, recorder) = connected();
    let mut sub = session.subscribe("sensors/#", QoS::AtLeastOnce);
    let id = recorder.sent()[0].id().unwrap();
    session.handle_event(TransportEvent::Response(Packet::Suback(Suback {
        id,
        return_codes: vec![0x01],
    })));
    assert!(matches!(
        outcome(&mut sub),
        Some(Ok(Some(Packet::Suback(Suback { .. }))))
    ));
    assert_eq!(session.table().ids().in_use(), 0);
}

#[test]
fn test_refused_subscription_fails_future() {
    let (mut session, recorder) = connected();
    let mut sub = session.subscribe("forbidden", QoS::AtMostOnce);
    let id = recorder.sent()[0].id().unwrap();
    session.handle_event(TransportEvent::Response(Packet::Suback(Suback {
        id,
        return_codes: vec![0x80],
    })));
    assert_eq!(outcome(&mut sub), Some(Err(ClientError::Rejected("SUBACK"))));
}

#[test]
fn test_qos1_publish_resolves_with_puback() {
    let (mut session, recorder) = connected();
    let mut pending = session.publish(publish("t", QoS::AtLeastOnce, None));
    let id = recorder.sent()[0].id().unwrap();
    session.handle_event(TransportEvent::Response(Packet::Puback(id)));
    assert_eq!(outcome(&mut pending), Some(Ok(Some(Packet::Puback(id)))));
    assert_eq!(recorder.sent().len(), 1);
}

#[test]
fn test_qos2_publish_round_trip() {
    let (mut session, recorder) = connected();
    let mut pending = session.publish(publish("t", QoS::ExactlyOnce, Some(7)));
    assert_eq!(recorder.sent().len(), 1);
    assert_eq!(recorder.sent()[0].id(), Some(7));

    session.handle_event(TransportEvent::Response(Packet::Pubrec(7)));
    assert_eq!(recorder.sent()[1..], [Packet::Pubrel(7)]);
    assert!(outcome(&mut pending).is_none());
    assert!(session.table().ids().is_in_use(7));

    session.handle_event(TransportEvent::Response(Packet::Pubcomp(7)));
    assert_eq!(recorder.sent().len(), 2);
    assert_eq!(outcome(&mut pending), Some(Ok(Some(Packet::Pubcomp(7)))));
    assert!(session.table().is_empty());
    assert!(!session.table().ids().is_in_use(7));

    // A duplicate PUBCOMP has nothing left to resolve.
    session.handle_event(TransportEvent::Response(Packet::Pubcomp(7)));
    assert_eq!(recorder.sent().len(), 2);
}

#[test]
fn test_preset_id_in_use_is_replaced() {
    let (mut session, recorder) = connected();
    let _ = session.publish(publish("t", QoS::AtLeastOnce, Some(9)));
    let _ = session.publish(publish("t", QoS::AtLeastOnce, Some(9)));
    let sent = recorder.sent();
    assert_eq!(sent[0].id(), Some(9));
    assert_ne!(sent[1].id(), Some(9));
    assert_eq!(session.table().len(), 2);
}

#[test]
fn test_qos0_publish_strips_identifier() {
    let (mut session, recorder) = connected();
    let mut pending = session.publish(publish("t", QoS::AtMostOnce, Some(4)));
    assert_eq!(outcome(&mut pending), Some(Ok(None)));
    assert_eq!(recorder.sent()[0].id(), None);
    assert!(session.table().is_empty());
}

#[test]
fn test_inbound_qos1_is_acknowledged_once() {
    let (mut session, recorder) = connected();
    let mut events = session.events();
    let message = publish("in", QoS::AtLeastOnce, Some(3));
    session.handle_event(TransportEvent::Message(message.clone()));

    assert_eq!(recorder.sent(), [Packet::Puback(3)]);
    assert_eq!(events.try_recv().unwrap(), ClientEvent::Message(message));
    assert!(events.try_recv().is_err());
}

#[test]
fn test_inbound_qos2_runs_receiver_handshake() {
    let (mut session, recorder) = connected();
    let message = publish("in", QoS::ExactlyOnce, Some(9));
    session.handle_event(TransportEvent::Message(message.clone()));
    assert_eq!(recorder.sent(), [Packet::Pubrec(9)]);

    // Redelivery before PUBREL must not send a second PUBREC.
    session.handle_event(TransportEvent::Message(message));
    assert_eq!(recorder.sent(), [Packet::Pubrec(9)]);

    session.handle_event(TransportEvent::Response(Packet::Pubrel(9)));
    assert_eq!(recorder.sent(), [Packet::Pubrec(9), Packet::Pubcomp(9)]);
    assert!(session.table().is_empty());
}

#[test]
fn test_manual_acknowledge_when_auto_ack_disabled() {
    let (mut session, recorder) = connected();
    session.disable_auto_ack();
    assert!(!session.auto_ack());
    let message = publish("in", QoS::ExactlyOnce, Some(2));
    session.handle_event(TransportEvent::Message(message.clone()));
    assert!(recorder.sent().is_empty());

    let mut ack = session.acknowledge(&message);
    assert_eq!(recorder.sent(), [Packet::Pubrec(2)]);
    assert!(outcome(&mut ack).is_none());
    session.handle_event(TransportEvent::Response(Packet::Pubrel(2)));
    assert_eq!(outcome(&mut ack), Some(Ok(Some(Packet::Pubrel(2)))));

    let mut missing = session.acknowledge(&publish("in", QoS::AtLeastOnce, None));
    assert!(matches!(
        outcome(&mut missing),
        Some(Err(ClientError::Protocol(_)))
    ));
    let mut qos0 = session.acknowledge(&publish("in", QoS::AtMostOnce, None));
    assert_eq!(outcome(&mut qos0), Some(Ok(None)));
}

#[test]
fn test_ping_resolves_in_order() {
    let (mut session, _recorder) = connected();
    let mut first = session.ping();
    let mut second = session.ping();
    session.handle_event(TransportEvent::Response(Packet::Pingresp));
    assert_eq!(outcome(&mut first), Some(Ok(Some(Packet::Pingresp))));
    assert!(outcome(&mut second).is_none());
}

#[test]
fn test_close_fails_everything_outstanding() {
    let (mut session, _recorder) = connected();
    let mut events = session.events();
    let mut sub = session.subscribe("a", QoS::AtMostOnce);
    let mut ping = session.ping();
    let mut qos2 = session.publish(publish("b", QoS::ExactlyOnce, None));
    session.handle_event(TransportEvent::Message(publish("in", QoS::ExactlyOnce, Some(1))));
    let _ = events.try_recv();

    session.handle_event(TransportEvent::Close(None));

    for pending in [&mut sub, &mut ping, &mut qos2] {
        assert_eq!(outcome(pending), Some(Err(ClientError::ConnectionClosed)));
    }
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.table().is_empty());
    assert_eq!(session.table().ids().in_use(), 0);
    assert_eq!(events.try_recv().unwrap(), ClientEvent::Close(None));
}

#[test]
fn test_socket_failure_fails_queued_sends() {
    let (mut session, _recorder) = session_with(settings());
    let mut connect = session.connect();
    let mut fire = session.publish(publish("a", QoS::AtMostOnce, None));
    let failure = ClientError::SocketFailed("connection refused".to_string());
    session.handle_event(TransportEvent::Error(Some(failure.clone())));

    assert_eq!(outcome(&mut connect), Some(Err(failure.clone())));
    assert_eq!(outcome(&mut fire), Some(Err(failure)));
    assert_eq!(session.queued(), 0);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn test_send_failure_tears_down_session() {
    let (mut session, recorder) = connected();
    let mut events = session.events();
    recorder.broken.store(true, Ordering::SeqCst);
    let mut sub = session.subscribe("a", QoS::AtMostOnce);

    let broken = ClientError::Transport("broken pipe".to_string());
    assert_eq!(outcome(&mut sub), Some(Err(broken.clone())));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(recorder.closed(), 1);
    assert_eq!(events.try_recv().unwrap(), ClientEvent::Error(Some(broken)));
}

#[test]
fn test_refused_connack_fails_connect() {
    let (mut session, recorder) = session_with(settings());
    let mut connect = session.connect();
    session.handle_event(TransportEvent::Open);
    session.handle_event(TransportEvent::Connect(Packet::Connack(Connack {
        session_present: false,
        code: ConnectReturnCode::NotAuthorized,
    })));

    assert_eq!(
        outcome(&mut connect),
        Some(Err(ClientError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized
        )))
    );
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(recorder.closed(), 1);
}

#[test]
fn test_configured_topics_subscribed_after_connack() {
    let (mut session, recorder) = session_with(ClientSettings {
        topics: vec!["a/b".to_string(), "c/#".to_string()],
        ..settings()
    });
    let _ = session.connect();
    session.handle_event(TransportEvent::Open);
    session.handle_event(accepted());

    let filters: Vec<String> = recorder
        .sent()
        .into_iter()
        .filter_map(|packet| match packet {
            Packet::Subscribe(subscribe) => Some(subscribe.filters[0].0.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(filters, ["a/b", "c/#"]);
}

#[test]
fn test_disconnect_sends_disconnect_and_fails_pending() {
    let (mut session, recorder) = connected();
    let mut ping = session.ping();
    assert!(session.disconnect().is_ok());
    assert_eq!(recorder.sent(), [Packet::Pingreq, Packet::Disconnect]);
    assert_eq!(recorder.closed(), 1);
    assert_eq!(outcome(&mut ping), Some(Err(ClientError::ConnectionClosed)));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.disconnect().is_ok());
}

#[test]
fn test_exhausted_identifiers_fail_immediately() {
    let mut ids = IdAllocator::with_seed(11);
    for id in 1..=u16::MAX {
        ids.reserve(id);
    }
    let recorder = Recorder::default();
    let mut session = Session::with_table(
        settings(),
        Box::new(MockTransport(recorder.clone())),
        CorrelationTable::new(ids),
    );
    let mut sub = session.subscribe("a", QoS::AtMostOnce);
    assert_eq!(
        outcome(&mut sub),
        Some(Err(ClientError::ExhaustedIdentifierSpace))
    );
    assert_eq!(recorder.opened(), 0);
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_clean_session_forced_without_client_id() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();

    let (mut session, recorder) = session_with(ClientSettings {
        client_id: String::new(),
        clean_session: false,
        ..ClientSettings::default()
    });
    tracing::subscriber::with_default(subscriber, || {
        let _ = session.connect();
        session.handle_event(TransportEvent::Open);
    });

    match &recorder.sent()[..] {
        [Packet::Connect(connect)] => assert!(connect.clean_session),
        other => panic!("expected CONNECT, got {other:?}"),
    }
    assert!(session.settings().clean_session);
    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("enabling clean session"), "{output}");
}

#[test]
fn test_stale_close_does_not_tear_down_reconnect() {
    let (mut session, recorder) = session_with(settings());
    let _ = session.connect();
    let first = session.epoch().unwrap();
    session.handle(Envelope::new(first, TransportEvent::Open));
    session.handle(Envelope::new(first, accepted()));
    assert_eq!(session.state(), SessionState::Connected);

    let reset = ClientError::Transport("reset".to_string());
    session.handle(Envelope::new(first, TransportEvent::Error(Some(reset))));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.epoch(), None);

    let mut connect = session.connect();
    let mut sub = session.subscribe("a", QoS::AtMostOnce);
    let second = session.epoch().unwrap();
    assert_ne!(first, second);
    let closed = recorder.closed();

    // The reader of the first socket reports its EOF late.
    session.handle(Envelope::new(first, TransportEvent::Close(None)));
    assert_eq!(session.state(), SessionState::Connecting);
    assert!(outcome(&mut connect).is_none());
    assert!(outcome(&mut sub).is_none());
    assert_eq!(recorder.closed(), closed);

    recorder.clear();
    session.handle(Envelope::new(second, TransportEvent::Open));
    session.handle(Envelope::new(second, accepted()));
    assert_eq!(outcome(&mut connect), Some(Ok(())));
    assert_eq!(recorder.opened(), 2);
    assert!(matches!(
        &recorder.sent()[..],
        [Packet::Connect(_), Packet::Subscribe(_)]
    ));
}

#[test]
fn test_close_stops_the_transport() {
    let (mut session, recorder) = connected();
    let epoch = session.epoch().unwrap();
    session.handle(Envelope::new(epoch, TransportEvent::Close(None)));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(recorder.closed(), 1);

    // A second report from the same socket is dropped.
    session.handle(Envelope::new(epoch, TransportEvent::Close(None)));
    assert_eq!(recorder.closed(), 1);
}

#[test]
fn test_connack_without_connect_attempt_is_ignored() {
    let (mut session, recorder) = session_with(settings());
    session.handle_event(accepted());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(recorder.sent().is_empty());

    let mut connect = session.connect();
    session.handle_event(accepted());
    assert_eq!(session.state(), SessionState::Connecting);
    assert!(outcome(&mut connect).is_none());
    assert!(recorder.sent().is_empty());
}
