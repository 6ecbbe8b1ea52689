//! Correlation of inbound responses with the requests that caused them.
//!
//! Three registries are kept:
//! - `by_id`: client-originated exchanges keyed by the identifier this session
//!   allocated (SUBSCRIBE, UNSUBSCRIBE, PUBLISH at QoS 1 and 2)
//! - `fifo`: exchanges without an identifier (PINGREQ), matched in send order
//! - `inbound`: broker-originated QoS 2 publishes this session has answered with
//!   PUBREC, matched only by PUBREL
//!
//! Identifiers in `by_id` come from the table's own [`IdAllocator`] and are
//! released exactly once, whenever their entry is retired.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use super::handshake::Qos2Step;
use super::identifier::IdAllocator;
use super::waiter::Waiter;
use crate::packet::Packet;
use crate::utils::ClientError;

/// What a correlated request resolves with. Fire-and-forget sends resolve with
/// `None`, acknowledged ones with the acknowledging packet.
pub type Reply = Option<Packet>;

/// How a registered exchange completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// The first matching response settles the waiter.
    Reply,
    /// Publisher side of a QoS 2 publish, at the given step.
    ExactlyOnce(Qos2Step),
}

/// A registered waiter together with its insertion order.
#[derive(Debug)]
pub struct Tracked {
    seq: u64,
    waiter: Waiter<Reply>,
    flow: Flow,
}

impl Tracked {
    pub fn flow(&self) -> Flow {
        self.flow
    }

    pub fn resolve(mut self, reply: Reply) {
        self.waiter.resolve(reply);
    }

    pub fn fail(mut self, error: ClientError) {
        self.waiter.fail(error);
    }
}

/// Result of matching one inbound response.
#[derive(Debug)]
pub enum Matched {
    /// The waiter was resolved or failed and its identifier released.
    Settled,
    /// PUBREC for an outbound QoS 2 publish. The caller must send PUBREL and
    /// hand the entry back through [`CorrelationTable::resume`].
    Pubrec { id: u16, tracked: Tracked },
    /// PUBREL for an inbound QoS 2 publish. The caller must send PUBCOMP and
    /// then settle the entry.
    Pubrel { id: u16, tracked: Tracked },
    /// Nothing was waiting for this response.
    Unmatched(Packet),
}

#[derive(Debug, Default)]
pub struct CorrelationTable {
    ids: IdAllocator,
    by_id: HashMap<u16, Tracked>,
    fifo: VecDeque<Tracked>,
    inbound: HashMap<u16, Tracked>,
    next_seq: u64,
}

impl CorrelationTable {
    pub fn new(ids: IdAllocator) -> Self {
        Self {
            ids,
            ..Self::default()
        }
    }

    pub fn allocate(&mut self) -> Result<u16, ClientError> {
        self.ids.allocate()
    }

    /// Claims a caller-chosen identifier. Returns `false` if it is already taken.
    pub fn reserve(&mut self, id: u16) -> bool {
        id != 0 && self.ids.reserve(id)
    }

    pub fn release(&mut self, id: u16) -> bool {
        self.ids.release(id)
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Registers a waiter for an outbound packet.
    ///
    /// Packets with an identifier are matched by it, all others in FIFO order.
    pub fn register(&mut self, id: Option<u16>, waiter: Waiter<Reply>, flow: Flow) {
        let tracked = Tracked {
            seq: self.next_seq(),
            waiter,
            flow,
        };
        match id {
            Some(id) => self.insert_by_id(id, tracked),
            None => self.fifo.push_back(tracked),
        }
    }

    /// Puts a QoS 2 entry back after PUBREL went out. The identifier stays allocated.
    pub fn resume(&mut self, id: u16, mut tracked: Tracked, step: Qos2Step) {
        tracked.flow = Flow::ExactlyOnce(step);
        self.insert_by_id(id, tracked);
    }

    /// Registers the acknowledger side of an inbound QoS 2 publish.
    ///
    /// Returns `false`, leaving the existing entry in place, when PUBREC was
    /// already sent for `id`.
    pub fn register_inbound(&mut self, id: u16, waiter: Waiter<Reply>) -> bool {
        if self.inbound.contains_key(&id) {
            return false;
        }
        let tracked = Tracked {
            seq: self.next_seq(),
            waiter,
            flow: Flow::Reply,
        };
        self.inbound.insert(id, tracked);
        true
    }

    pub fn has_inbound(&self, id: u16) -> bool {
        self.inbound.contains_key(&id)
    }

    /// Matches `response` against the outstanding waiters.
    ///
    /// A response that reports failure fails its waiter instead of resolving it.
    pub fn resolve_incoming(&mut self, response: Packet) -> Matched {
        if let Packet::Pubrel(id) = response {
            return match self.inbound.remove(&id) {
                Some(tracked) => Matched::Pubrel { id, tracked },
                None => Matched::Unmatched(response),
            };
        }

        let Some(id) = response.id() else {
            return match self.fifo.pop_front() {
                Some(tracked) => {
                    debug!("{} matched untracked waiter", response.name());
                    settle(tracked, response);
                    Matched::Settled
                }
                None => Matched::Unmatched(response),
            };
        };

        let Some(mut tracked) = self.by_id.remove(&id) else {
            return Matched::Unmatched(response);
        };

        let flow = tracked.flow;
        match flow {
            Flow::ExactlyOnce(step) if !response.is_failure() => match step.advance(&response) {
                Ok(next) if !next.is_complete() => {
                    tracked.flow = Flow::ExactlyOnce(next);
                    return Matched::Pubrec { id, tracked };
                }
                Ok(_) => tracked.resolve(Some(response)),
                Err(error) => tracked.fail(error),
            },
            _ => settle(tracked, response),
        }
        self.ids.release(id);
        Matched::Settled
    }

    /// Fails every outstanding waiter, in registration order, and releases
    /// every identifier. All registries are empty afterwards.
    pub fn fail_all(&mut self, error: &ClientError) -> usize {
        let mut drained: Vec<Tracked> = Vec::with_capacity(self.len());
        for (id, tracked) in self.by_id.drain() {
            self.ids.release(id);
            drained.push(tracked);
        }
        drained.extend(self.fifo.drain(..));
        drained.extend(self.inbound.drain().map(|(_, tracked)| tracked));
        drained.sort_by_key(|tracked| tracked.seq);

        let count = drained.len();
        for tracked in drained {
            tracked.fail(error.clone());
        }
        count
    }

    pub fn len(&self) -> usize {
        self.by_id.len() + self.fifo.len() + self.inbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: u16) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn untracked(&self) -> usize {
        self.fifo.len()
    }

    fn insert_by_id(&mut self, id: u16, tracked: Tracked) {
        if let Some(previous) = self.by_id.insert(id, tracked) {
            warn!("packet identifier {id} reused while outstanding");
            previous.fail(ClientError::Protocol(format!(
                "packet identifier {id} reused while outstanding"
            )));
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

fn settle(tracked: Tracked, response: Packet) {
    if response.is_failure() {
        tracked.fail(ClientError::Rejected(response.name()));
    } else {
        tracked.resolve(Some(response));
    }
}
