//! Explicit step tracking for the publisher side of a QoS 2 exchange.
//!
//! ```text
//! PublishSent --PUBREC--> PubrecReceived --(send PUBREL)--> PubrelSent --PUBCOMP--> PubcompReceived
//! ```
//!
//! The identifier of the original PUBLISH stays allocated for the whole
//! exchange and is released only after PUBCOMP (or a failure).

use std::fmt;

use crate::packet::Packet;
use crate::utils::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos2Step {
    PublishSent,
    PubrecReceived,
    PubrelSent,
    PubcompReceived,
}

impl Qos2Step {
    /// Applies an inbound response to the current step.
    pub fn advance(self, response: &Packet) -> Result<Qos2Step, ClientError> {
        match (self, response) {
            (Qos2Step::PublishSent, Packet::Pubrec(_)) => Ok(Qos2Step::PubrecReceived),
            (Qos2Step::PubrelSent, Packet::Pubcomp(_)) => Ok(Qos2Step::PubcompReceived),
            (step, other) => Err(ClientError::Protocol(format!(
                "unexpected {} while qos 2 publish is {step}",
                other.name()
            ))),
        }
    }

    pub fn is_complete(self) -> bool {
        self == Qos2Step::PubcompReceived
    }
}

impl fmt::Display for Qos2Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Qos2Step::PublishSent => "waiting for PUBREC",
            Qos2Step::PubrecReceived => "sending PUBREL",
            Qos2Step::PubrelSent => "waiting for PUBCOMP",
            Qos2Step::PubcompReceived => "complete",
        };
        f.write_str(text)
    }
}
