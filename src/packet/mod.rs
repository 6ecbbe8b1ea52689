//! The `packet` module models the MQTT 3.1.1 control packets exchanged with a
//! broker.
//!
//! Every packet type exposes the same small accessor surface the session layer
//! relies on: [`Packet::id`] / [`Packet::set_id`] for the 16-bit packet
//! identifier, [`Packet::qos`] and [`Packet::is_failure`] for negative
//! acknowledgments. The wire format lives in `wire`, the shared field codecs
//! (including the remaining-length codec) in [`codec`].

pub mod codec;
mod wire;

use std::fmt;

use bytes::Bytes;

use crate::utils::PacketError;

/// Quality of Service levels for MQTT messages.
///
/// ```rust
/// use popmqtt::packet::QoS;
///
/// assert_eq!(QoS::AtMostOnce as u8, 0);
/// assert_eq!(QoS::try_from(2).unwrap(), QoS::ExactlyOnce);
/// ```
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce = 0,
    /// Acknowledged with PUBACK.
    AtLeastOnce = 1,
    /// Four-step PUBLISH/PUBREC/PUBREL/PUBCOMP handshake.
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(PacketError::InvalidQos(other)),
        }
    }
}

/// CONNACK return codes defined by MQTT 3.1.1.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadCredentials = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadCredentials),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            other => Err(PacketError::InvalidReturnCode(other)),
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectReturnCode::Accepted => "accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "identifier rejected",
            ConnectReturnCode::ServerUnavailable => "server unavailable",
            ConnectReturnCode::BadCredentials => "bad username or password",
            ConnectReturnCode::NotAuthorized => "not authorized",
        };
        f.write_str(text)
    }
}

/// CONNECT packet. The protocol level is always 4 (MQTT 3.1.1).
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct Connect {
    pub client_id: String,
    pub clean_session: bool,
    /// Keep-alive interval in seconds, 0 disables it.
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Connect {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Connack {
    pub session_present: bool,
    pub code: ConnectReturnCode,
}

/// PUBLISH packet, used for both directions.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Present only when `qos` is above [`QoS::AtMostOnce`].
    pub id: Option<u16>,
}

impl Publish {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            ..Self::default()
        }
    }

    /// Builds a publish that is not bound to a topic yet, the way callers hand a
    /// prepared message to [`crate::client::Client::publish_packet`].
    pub fn message(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct Subscribe {
    pub id: Option<u16>,
    pub filters: Vec<(String, QoS)>,
}

impl Subscribe {
    pub fn new(topic: impl Into<String>, qos: QoS) -> Self {
        Self {
            id: None,
            filters: vec![(topic.into(), qos)],
        }
    }
}

/// SUBACK packet. A return code of `0x80` marks a refused filter.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Suback {
    pub id: u16,
    pub return_codes: Vec<u8>,
}

pub const SUBACK_FAILURE: u8 = 0x80;

#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct Unsubscribe {
    pub id: Option<u16>,
    pub topics: Vec<String>,
}

impl Unsubscribe {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            id: None,
            topics: vec![topic.into()],
        }
    }
}

/// Every MQTT 3.1.1 control packet.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback(u16),
    Pubrec(u16),
    Pubrel(u16),
    Pubcomp(u16),
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback(u16),
    Pingreq,
    Pingresp,
    Disconnect,
}

impl Packet {
    /// Packet identifier, when the packet carries one.
    pub fn id(&self) -> Option<u16> {
        match self {
            Packet::Publish(p) => p.id,
            Packet::Subscribe(s) => s.id,
            Packet::Unsubscribe(u) => u.id,
            Packet::Suback(s) => Some(s.id),
            Packet::Puback(id)
            | Packet::Pubrec(id)
            | Packet::Pubrel(id)
            | Packet::Pubcomp(id)
            | Packet::Unsuback(id) => Some(*id),
            Packet::Connect(_)
            | Packet::Connack(_)
            | Packet::Pingreq
            | Packet::Pingresp
            | Packet::Disconnect => None,
        }
    }

    /// Sets the packet identifier. Packets without an identifier field are left untouched.
    pub fn set_id(&mut self, new_id: u16) {
        match self {
            Packet::Publish(p) => p.id = Some(new_id),
            Packet::Subscribe(s) => s.id = Some(new_id),
            Packet::Unsubscribe(u) => u.id = Some(new_id),
            Packet::Suback(s) => s.id = new_id,
            Packet::Puback(id)
            | Packet::Pubrec(id)
            | Packet::Pubrel(id)
            | Packet::Pubcomp(id)
            | Packet::Unsuback(id) => *id = new_id,
            _ => {}
        }
    }

    pub fn qos(&self) -> QoS {
        match self {
            Packet::Publish(p) => p.qos,
            _ => QoS::AtMostOnce,
        }
    }

    /// Whether this is a protocol-level negative acknowledgment.
    pub fn is_failure(&self) -> bool {
        match self {
            Packet::Connack(c) => c.code != ConnectReturnCode::Accepted,
            Packet::Suback(s) => s.return_codes.contains(&SUBACK_FAILURE),
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::Connack(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::Puback(_) => "PUBACK",
            Packet::Pubrec(_) => "PUBREC",
            Packet::Pubrel(_) => "PUBREL",
            Packet::Pubcomp(_) => "PUBCOMP",
            Packet::Subscribe(_) => "SUBSCRIBE",
            Packet::Suback(_) => "SUBACK",
            Packet::Unsubscribe(_) => "UNSUBSCRIBE",
            Packet::Unsuback(_) => "UNSUBACK",
            Packet::Pingreq => "PINGREQ",
            Packet::Pingresp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{}({id})", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

impl From<Publish> for Packet {
    fn from(value: Publish) -> Self {
        Packet::Publish(value)
    }
}

impl From<Connect> for Packet {
    fn from(value: Connect) -> Self {
        Packet::Connect(value)
    }
}

impl From<Subscribe> for Packet {
    fn from(value: Subscribe) -> Self {
        Packet::Subscribe(value)
    }
}

impl From<Unsubscribe> for Packet {
    fn from(value: Unsubscribe) -> Self {
        Packet::Unsubscribe(value)
    }
}
