//! Connection state of a session.
//!
//! ```text
//! Disconnected -> Connecting -> ConnackPending -> Connected
//!       ^______________________________________________|
//! ```
//!
//! Any transport close or error returns the session to `Disconnected`.

use std::fmt;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport. Outbound packets are queued and trigger a connect.
    #[default]
    Disconnected,

    /// The transport is being opened.
    Connecting,

    /// CONNECT went out, waiting for the broker's CONNACK.
    ConnackPending,

    /// CONNACK accepted. This is the only state in which packets go straight to
    /// the transport.
    Connected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::ConnackPending => "ConnackPending",
            SessionState::Connected => "Connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// True while a connect attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::ConnackPending
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
