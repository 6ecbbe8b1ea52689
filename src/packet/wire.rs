//! MQTT 3.1.1 wire format: a fixed header (type and flags, remaining length)
//! followed by the variable header and payload of each packet type.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::codec::{
    decode_length, get_binary, get_string, get_u8, get_u16, put_binary, put_string, string_len,
    write_length,
};
use super::{
    Connack, Connect, ConnectReturnCode, Packet, Publish, QoS, Suback, Subscribe, Unsubscribe,
};
use crate::utils::PacketError;

const CONNECT: u8 = 1;
const CONNACK: u8 = 2;
const PUBLISH: u8 = 3;
const PUBACK: u8 = 4;
const PUBREC: u8 = 5;
const PUBREL: u8 = 6;
const PUBCOMP: u8 = 7;
const SUBSCRIBE: u8 = 8;
const SUBACK: u8 = 9;
const UNSUBSCRIBE: u8 = 10;
const UNSUBACK: u8 = 11;
const PINGREQ: u8 = 12;
const PINGRESP: u8 = 13;
const DISCONNECT: u8 = 14;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4; // MQTT 3.1.1

const FLAG_CLEAN_SESSION: u8 = 0x02;
const FLAG_WILL: u8 = 0x04;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

impl Packet {
    /// Serializes the packet, fixed header included, into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), PacketError> {
        match self {
            Packet::Connect(connect) => encode_connect(connect, buf),
            Packet::Connack(connack) => {
                buf.put_u8(CONNACK << 4);
                write_length(buf, 2)?;
                buf.put_u8(u8::from(connack.session_present));
                buf.put_u8(connack.code as u8);
                Ok(())
            }
            Packet::Publish(publish) => encode_publish(publish, buf),
            Packet::Puback(id) => encode_ack(buf, PUBACK << 4, *id),
            Packet::Pubrec(id) => encode_ack(buf, PUBREC << 4, *id),
            Packet::Pubrel(id) => encode_ack(buf, (PUBREL << 4) | 0x02, *id),
            Packet::Pubcomp(id) => encode_ack(buf, PUBCOMP << 4, *id),
            Packet::Unsuback(id) => encode_ack(buf, UNSUBACK << 4, *id),
            Packet::Subscribe(subscribe) => {
                let id = subscribe
                    .id
                    .ok_or(PacketError::Malformed("SUBSCRIBE without packet identifier"))?;
                if subscribe.filters.is_empty() {
                    return Err(PacketError::Malformed("SUBSCRIBE without topic filters"));
                }
                let len = 2 + subscribe
                    .filters
                    .iter()
                    .map(|(topic, _)| string_len(topic) + 1)
                    .sum::<usize>();
                buf.put_u8((SUBSCRIBE << 4) | 0x02);
                write_length(buf, len)?;
                buf.put_u16(id);
                for (topic, qos) in &subscribe.filters {
                    put_string(buf, topic)?;
                    buf.put_u8(*qos as u8);
                }
                Ok(())
            }
            Packet::Suback(suback) => {
                buf.put_u8(SUBACK << 4);
                write_length(buf, 2 + suback.return_codes.len())?;
                buf.put_u16(suback.id);
                buf.put_slice(&suback.return_codes);
                Ok(())
            }
            Packet::Unsubscribe(unsubscribe) => {
                let id = unsubscribe
                    .id
                    .ok_or(PacketError::Malformed("UNSUBSCRIBE without packet identifier"))?;
                let len = 2 + unsubscribe
                    .topics
                    .iter()
                    .map(|topic| string_len(topic))
                    .sum::<usize>();
                buf.put_u8((UNSUBSCRIBE << 4) | 0x02);
                write_length(buf, len)?;
                buf.put_u16(id);
                for topic in &unsubscribe.topics {
                    put_string(buf, topic)?;
                }
                Ok(())
            }
            Packet::Pingreq => encode_empty(buf, PINGREQ << 4),
            Packet::Pingresp => encode_empty(buf, PINGRESP << 4),
            Packet::Disconnect => encode_empty(buf, DISCONNECT << 4),
        }
    }

    /// Convenience wrapper around [`Packet::encode`].
    pub fn to_bytes(&self) -> Result<Bytes, PacketError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Splits one complete packet off the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when more bytes are needed.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Packet>, PacketError> {
        if buf.is_empty() {
            return Ok(None);
        }
        let Some((len, len_bytes)) = decode_length(&buf[1..])? else {
            return Ok(None);
        };
        let header_len = 1 + len_bytes;
        if buf.len() < header_len + len {
            return Ok(None);
        }

        let header = buf[0];
        buf.advance(header_len);
        let body = buf.split_to(len).freeze();
        decode_body(header, body).map(Some)
    }
}

fn encode_empty(buf: &mut BytesMut, header: u8) -> Result<(), PacketError> {
    buf.put_u8(header);
    write_length(buf, 0)
}

fn encode_ack(buf: &mut BytesMut, header: u8, id: u16) -> Result<(), PacketError> {
    buf.put_u8(header);
    write_length(buf, 2)?;
    buf.put_u16(id);
    Ok(())
}

fn encode_connect(connect: &Connect, buf: &mut BytesMut) -> Result<(), PacketError> {
    let mut flags = 0u8;
    if connect.clean_session {
        flags |= FLAG_CLEAN_SESSION;
    }
    if connect.username.is_some() {
        flags |= FLAG_USERNAME;
    }
    if connect.password.is_some() {
        flags |= FLAG_PASSWORD;
    }

    // --- Variable Header ---
    let mut body = BytesMut::new();
    put_string(&mut body, PROTOCOL_NAME)?;
    body.put_u8(PROTOCOL_LEVEL);
    body.put_u8(flags);
    body.put_u16(connect.keep_alive);

    // --- Payload ---
    put_string(&mut body, &connect.client_id)?;
    if let Some(username) = &connect.username {
        put_string(&mut body, username)?;
    }
    if let Some(password) = &connect.password {
        put_binary(&mut body, password.as_bytes())?;
    }

    // --- Fixed Header ---
    buf.put_u8(CONNECT << 4);
    write_length(buf, body.len())?;
    buf.extend_from_slice(&body);
    Ok(())
}

fn encode_publish(publish: &Publish, buf: &mut BytesMut) -> Result<(), PacketError> {
    let mut header = PUBLISH << 4;
    if publish.dup {
        header |= 0x08;
    }
    header |= (publish.qos as u8) << 1;
    if publish.retain {
        header |= 0x01;
    }

    let id = match publish.qos {
        QoS::AtMostOnce => None,
        _ => Some(
            publish
                .id
                .ok_or(PacketError::Malformed("PUBLISH above qos 0 without packet identifier"))?,
        ),
    };

    let len = string_len(&publish.topic) + id.map_or(0, |_| 2) + publish.payload.len();
    buf.put_u8(header);
    write_length(buf, len)?;
    put_string(buf, &publish.topic)?;
    if let Some(id) = id {
        buf.put_u16(id);
    }
    buf.extend_from_slice(&publish.payload);
    Ok(())
}

fn decode_body(header: u8, mut body: Bytes) -> Result<Packet, PacketError> {
    let flags = header & 0x0F;
    let packet = match header >> 4 {
        CONNECT => decode_connect(&mut body)?,
        CONNACK => {
            let ack_flags = get_u8(&mut body)?;
            let code = ConnectReturnCode::try_from(get_u8(&mut body)?)?;
            Packet::Connack(Connack {
                session_present: ack_flags & 0x01 == 0x01,
                code,
            })
        }
        PUBLISH => {
            let qos = QoS::try_from((flags >> 1) & 0x03)?;
            let topic = get_string(&mut body)?;
            let id = match qos {
                QoS::AtMostOnce => None,
                _ => Some(get_u16(&mut body)?),
            };
            Packet::Publish(Publish {
                topic,
                payload: body.split_off(0),
                qos,
                retain: flags & 0x01 == 0x01,
                dup: flags & 0x08 == 0x08,
                id,
            })
        }
        PUBACK => Packet::Puback(get_u16(&mut body)?),
        PUBREC => Packet::Pubrec(get_u16(&mut body)?),
        PUBREL => Packet::Pubrel(get_u16(&mut body)?),
        PUBCOMP => Packet::Pubcomp(get_u16(&mut body)?),
        SUBSCRIBE => {
            let id = get_u16(&mut body)?;
            let mut filters = Vec::new();
            while body.has_remaining() {
                let topic = get_string(&mut body)?;
                let qos = QoS::try_from(get_u8(&mut body)?)?;
                filters.push((topic, qos));
            }
            Packet::Subscribe(Subscribe {
                id: Some(id),
                filters,
            })
        }
        SUBACK => {
            let id = get_u16(&mut body)?;
            Packet::Suback(Suback {
                id,
                return_codes: body.split_off(0).to_vec(),
            })
        }
        UNSUBSCRIBE => {
            let id = get_u16(&mut body)?;
            let mut topics = Vec::new();
            while body.has_remaining() {
                topics.push(get_string(&mut body)?);
            }
            Packet::Unsubscribe(Unsubscribe {
                id: Some(id),
                topics,
            })
        }
        UNSUBACK => Packet::Unsuback(get_u16(&mut body)?),
        PINGREQ => Packet::Pingreq,
        PINGRESP => Packet::Pingresp,
        DISCONNECT => Packet::Disconnect,
        _ => return Err(PacketError::UnknownType(header)),
    };
    Ok(packet)
}

fn decode_connect(body: &mut Bytes) -> Result<Packet, PacketError> {
    let protocol = get_string(body)?;
    if protocol != PROTOCOL_NAME {
        return Err(PacketError::Malformed("unsupported protocol name"));
    }
    let _level = get_u8(body)?;
    let flags = get_u8(body)?;
    let keep_alive = get_u16(body)?;
    let client_id = get_string(body)?;
    if flags & FLAG_WILL == FLAG_WILL {
        let _will_topic = get_string(body)?;
        let _will_message = get_binary(body)?;
    }
    let username = if flags & FLAG_USERNAME == FLAG_USERNAME {
        Some(get_string(body)?)
    } else {
        None
    };
    let password = if flags & FLAG_PASSWORD == FLAG_PASSWORD {
        let raw = get_binary(body)?;
        Some(String::from_utf8(raw.to_vec()).map_err(|_| PacketError::Utf8)?)
    } else {
        None
    };
    Ok(Packet::Connect(Connect {
        client_id,
        clean_session: flags & FLAG_CLEAN_SESSION == FLAG_CLEAN_SESSION,
        keep_alive,
        username,
        password,
    }))
}
