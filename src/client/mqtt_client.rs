//! MQTT client
//!
//! `Client` wraps a [`Session`] in `Arc<Mutex<_>>` and runs two background
//! tasks on the current tokio runtime:
//! - the event loop, which feeds every transport event into the session
//! - the keep-alive task, which sends PINGREQ every keep-alive interval while
//!   connected (only when the interval is non-zero)
//!
//! Every operation locks the session, registers its work and returns a
//! [`Pending`] future without holding the lock, so operations never block on
//! the network.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ClientSettings;
use crate::packet::{Publish, QoS};
use crate::session::{ClientEvent, Pending, Reply, Session, SessionState};
use crate::transport::{EventReceiver, TcpTransport, Transport};
use crate::utils::{ClientError, ConfigError};

/// How long `disconnect` waits for DISCONNECT to reach the socket.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Client {
    session: Arc<Mutex<Session>>,
    event_loop: JoinHandle<()>,
    keep_alive: Option<JoinHandle<()>>,
}

impl Client {
    /// Creates a client talking TCP to the broker in `settings`.
    ///
    /// Must be called from within a tokio runtime. Nothing is sent until the
    /// first operation.
    pub fn new(settings: ClientSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = TcpTransport::new(settings.address(), tx);
        Self::with_transport(settings, Box::new(transport), rx)
    }

    /// Parses `uri` with [`ClientSettings::from_uri`] and creates a TCP client.
    pub fn from_uri(uri: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(ClientSettings::from_uri(uri)?))
    }

    /// Creates a client over any transport. `events` must receive everything
    /// the transport reports.
    pub fn with_transport(
        settings: ClientSettings,
        transport: Box<dyn Transport>,
        events: EventReceiver,
    ) -> Self {
        let keep_alive = settings.keep_alive;
        let session = Arc::new(Mutex::new(Session::new(settings, transport)));

        let event_loop = tokio::spawn(run_event_loop(Arc::downgrade(&session), events));
        let keep_alive = (keep_alive > 0).then(|| {
            tokio::spawn(run_keep_alive(
                Arc::downgrade(&session),
                Duration::from_secs(u64::from(keep_alive)),
            ))
        });

        Self {
            session,
            event_loop,
            keep_alive,
        }
    }

    pub fn connect(&self) -> Pending<()> {
        self.lock().connect()
    }

    /// Subscribes at QoS 0.
    pub fn subscribe(&self, topic: &str) -> Pending<Reply> {
        self.subscribe_with_qos(topic, QoS::AtMostOnce)
    }

    pub fn subscribe_with_qos(&self, topic: &str, qos: QoS) -> Pending<Reply> {
        self.lock().subscribe(topic, qos)
    }

    /// One SUBSCRIBE per topic, each with its own identifier and future.
    pub fn subscribe_to_all<I, S>(&self, topics: I) -> Vec<Pending<Reply>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut session = self.lock();
        topics
            .into_iter()
            .map(|topic| session.subscribe(topic.as_ref(), QoS::AtMostOnce))
            .collect()
    }

    pub fn unsubscribe(&self, topic: &str) -> Pending<Reply> {
        self.lock().unsubscribe(topic)
    }

    pub fn publish(&self, payload: impl Into<Bytes>, topic: &str, qos: QoS) -> Pending<Reply> {
        self.publish_packet(Publish::message(payload), topic, qos, false)
    }

    pub fn publish_retain(
        &self,
        payload: impl Into<Bytes>,
        topic: &str,
        qos: QoS,
    ) -> Pending<Reply> {
        self.publish_packet(Publish::message(payload), topic, qos, true)
    }

    /// Publishes a prepared message after stamping topic, QoS and retain on it.
    pub fn publish_packet(
        &self,
        mut message: Publish,
        topic: &str,
        qos: QoS,
        retain: bool,
    ) -> Pending<Reply> {
        message.topic = topic.to_string();
        message.qos = qos;
        message.retain = retain;
        self.lock().publish(message)
    }

    pub fn acknowledge(&self, message: &Publish) -> Pending<Reply> {
        self.lock().acknowledge(message)
    }

    pub fn ping(&self) -> Pending<Reply> {
        self.lock().ping()
    }

    /// Sends DISCONNECT, closes the connection and waits until everything
    /// accepted before it has been written out.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (result, drained) = {
            let mut session = self.lock();
            let result = session.disconnect();
            (result, session.take_drained())
        };
        if let Some(drained) = drained {
            if tokio::time::timeout(DRAIN_TIMEOUT, drained).await.is_err() {
                warn!("connection did not drain within {DRAIN_TIMEOUT:?}");
            }
        }
        result
    }

    pub fn enable_auto_ack(&self) {
        self.lock().enable_auto_ack();
    }

    pub fn disable_auto_ack(&self) {
        self.lock().disable_auto_ack();
    }

    pub fn state(&self) -> SessionState {
        self.lock().state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn settings(&self) -> ClientSettings {
        self.lock().settings().clone()
    }

    /// Every message, close and error event from now on.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.lock().events()
    }

    /// Inbound messages only. Ends when the client is dropped.
    pub fn messages(&self) -> impl Stream<Item = Publish> + Send + 'static {
        futures::stream::unfold(self.events(), |mut events| async move {
            loop {
                match events.recv().await {
                    Ok(ClientEvent::Message(publish)) => return Some((publish, events)),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("message stream lagged, {skipped} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        lock(&self.session)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.event_loop.abort();
        if let Some(task) = self.keep_alive.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session", &*self.lock())
            .finish()
    }
}

// A panic while holding the lock leaves the session consistent enough to keep
// failing futures, so poisoning is ignored.
fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_event_loop(session: Weak<Mutex<Session>>, mut events: EventReceiver) {
    while let Some(envelope) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        lock(&session).handle(envelope);
    }
    debug!("event loop stopped");
}

async fn run_keep_alive(session: Weak<Mutex<Session>>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(session) = session.upgrade() else {
            break;
        };
        let mut session = lock(&session);
        if session.state().is_connected() {
            debug!("keep-alive ping");
            let _ = session.ping();
        }
    }
}
