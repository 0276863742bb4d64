use serde_derive::{Deserialize, Serialize};

use crate::clock;
use crate::payload;

/// Request to enter the critical section.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Request {
    pub p_id: usize,
    pub timestamp: clock::Timestamp,
}

impl Request {
    /// Requester's own clock component, which names the request cycle.
    pub fn round(&self) -> u64 {
        self.timestamp.get(self.p_id)
    }
}

/// Permission to enter the critical section for round `round`.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reply {
    pub p_id: usize,
    pub round: u64,
}

/// Retraction of an abandoned request.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Withdraw {
    pub p_id: usize,
    pub round: u64,
}

/// Protocol traffic between mutual exclusion engines.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Protocol {
    Request(Request),
    Reply(Reply),
    Withdraw(Withdraw),
}

impl Protocol {
    /// Process that sent this message.
    pub fn sender(&self) -> usize {
        match self {
        | Protocol::Request(request) => request.p_id,
        | Protocol::Reply(reply) => reply.p_id,
        | Protocol::Withdraw(withdraw) => withdraw.p_id,
        }
    }
}

/// Workload message carrying the sender's clock.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Stamped<P: payload::Payload> {
    pub p_id: usize,
    pub timestamp: clock::Timestamp,
    pub payload: P,
}

/// Workload message handed to the application after its clock was merged.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Delivery<P: payload::Payload> {
    /// Sending process
    pub from: usize,

    /// Local clock right after the merge
    pub clock: clock::Timestamp,

    pub payload: P,
}

/// Protocol messages addressed to peers, in send order.
pub type Outbox = Vec<(usize, Protocol)>;
