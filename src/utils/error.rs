//! The `error` module defines the error types used within the `popmqtt` crate.
//!
//! Three families are kept apart:
//! - [`PacketError`]: malformed or unsupported bytes met while framing packets
//! - [`ClientError`]: everything an in-flight operation or the session can fail
//!   with; it is `Clone` because one transport failure fails many waiters
//! - [`ConfigError`]: connection string and settings loading problems

use thiserror::Error;

use crate::packet::ConnectReturnCode;

/// Errors raised while encoding or decoding MQTT control packets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// A remaining-length field announced a fifth continuation byte.
    #[error("malformed remaining length: more than 4 bytes")]
    MalformedLength,

    /// The value does not fit the 4-byte remaining-length encoding.
    #[error("remaining length {0} exceeds 268435455")]
    LengthTooLarge(usize),

    /// The buffer ended in the middle of a packet body.
    #[error("packet body ended unexpectedly")]
    Incomplete,

    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),

    #[error("invalid qos level {0}")]
    InvalidQos(u8),

    #[error("invalid connect return code {0}")]
    InvalidReturnCode(u8),

    #[error("string field is not valid utf-8")]
    Utf8,

    /// A string or binary field is longer than its 16-bit length prefix allows.
    #[error("field of {0} bytes does not fit a 16-bit length prefix")]
    FieldTooLong(usize),

    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

/// Errors surfaced through operation futures and the client event stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The connection went away while the operation was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport could not be opened.
    #[error("socket failed: {0}")]
    SocketFailed(String),

    /// The transport failed after it was opened.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("broker refused the connection: {0}")]
    ConnectionRefused(ConnectReturnCode),

    /// The broker answered with a negative acknowledgment.
    #[error("{0} reported failure")]
    Rejected(&'static str),

    /// Every 16-bit packet identifier is currently in use.
    #[error("could not generate a packet identifier: all in use")]
    ExhaustedIdentifierSpace,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// Errors raised while loading settings or parsing a connection string.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid connection string: {0}")]
    Uri(#[from] url::ParseError),

    #[error("unsupported scheme `{0}`, expected mqtt:// or tcp://")]
    Scheme(String),

    #[error("connection string has no host")]
    MissingHost,

    #[error("invalid value `{value}` for `{key}`")]
    InvalidParameter { key: &'static str, value: String },
}
