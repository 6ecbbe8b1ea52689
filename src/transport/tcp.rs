//! TCP transport
//!
//! Each `open` bumps the epoch and spawns one connection task which:
//! - connects the socket and reports [`TransportEvent::Open`] or a
//!   `SocketFailed` error
//! - spawns a send loop draining an unbounded byte queue into the write half
//! - reads the socket, frames packets with [`Packet::decode`] and reports each
//!   one as a transport event
//!
//! `close` drops the byte queue, so the send loop writes what was already
//! accepted (DISCONNECT included) and then shuts the socket down, and stops
//! the reader so no further events are reported for that connection.
//! [`Transport::take_drained`] hands out a signal that fires once the send loop
//! is done.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{Envelope, Epoch, EventSender, Transport, TransportEvent};
use crate::packet::Packet;
use crate::utils::ClientError;

const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug)]
pub struct TcpTransport {
    address: String,
    events: EventSender,
    epoch: Epoch,
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    task: Option<JoinHandle<()>>,
    drained: Option<oneshot::Receiver<()>>,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>, events: EventSender) -> Self {
        Self {
            address: address.into(),
            events,
            epoch: 0,
            outbound: None,
            task: None,
            drained: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Transport for TcpTransport {
    /// Must be called from within a tokio runtime.
    fn open(&mut self) -> Result<Epoch, ClientError> {
        self.close();
        let handle =
            Handle::try_current().map_err(|e| ClientError::SocketFailed(e.to_string()))?;
        self.epoch += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let (drained_tx, drained_rx) = oneshot::channel();
        self.outbound = Some(tx);
        self.drained = Some(drained_rx);
        let sink = EventSink {
            epoch: self.epoch,
            events: self.events.clone(),
        };
        self.task = Some(handle.spawn(run_connection(
            self.address.clone(),
            sink,
            rx,
            drained_tx,
        )));
        debug!("opening connection {} to {}", self.epoch, self.address);
        Ok(self.epoch)
    }

    fn send(&mut self, packet: &Packet) -> Result<(), ClientError> {
        let bytes = packet.to_bytes()?;
        let Some(outbound) = &self.outbound else {
            return Err(ClientError::ConnectionClosed);
        };
        debug!("writing {packet} ({} bytes)", bytes.len());
        outbound
            .send(bytes)
            .map_err(|_| ClientError::ConnectionClosed)
    }

    fn close(&mut self) {
        self.outbound = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn take_drained(&mut self) -> Option<oneshot::Receiver<()>> {
        self.drained.take()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Tags every event with the epoch of the connection reporting it.
#[derive(Debug, Clone)]
struct EventSink {
    epoch: Epoch,
    events: EventSender,
}

impl EventSink {
    /// False once nobody listens any more.
    fn send(&self, event: TransportEvent) -> bool {
        self.events.send(Envelope::new(self.epoch, event)).is_ok()
    }
}

async fn run_connection(
    address: String,
    events: EventSink,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    drained: oneshot::Sender<()>,
) {
    let stream = match TcpStream::connect(&address).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("failed to connect to {address}: {e}");
            events.send(TransportEvent::Error(Some(ClientError::SocketFailed(
                e.to_string(),
            ))));
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    debug!("socket connected to {address}");

    let (mut reader, writer) = stream.into_split();
    tokio::spawn(send_loop(writer, outbound, events.clone(), drained));

    if !events.send(TransportEvent::Open) {
        return;
    }

    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        loop {
            match Packet::decode(&mut buf) {
                Ok(Some(packet)) => {
                    if !events.send(TransportEvent::from_packet(packet)) {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("failed to decode packet from {address}: {e}");
                    events.send(TransportEvent::Error(Some(e.into())));
                    return;
                }
            }
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                debug!("{address} closed the connection");
                events.send(TransportEvent::Close(None));
                return;
            }
            Ok(_) => {}
            Err(e) => {
                events.send(TransportEvent::Error(Some(ClientError::Transport(
                    e.to_string(),
                ))));
                return;
            }
        }
    }
}

/// Dropping `drained` without sending also wakes whoever waits on it.
async fn send_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    events: EventSink,
    drained: oneshot::Sender<()>,
) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            error!("failed to write to socket: {e}");
            events.send(TransportEvent::Error(Some(ClientError::Transport(
                e.to_string(),
            ))));
            return;
        }
    }
    let _ = writer.shutdown().await;
    debug!("connection {} drained", events.epoch);
    let _ = drained.send(());
}
