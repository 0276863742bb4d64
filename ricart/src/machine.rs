//! # Summary
//!
//! This module implements the Ricart–Agrawala state machine. It is pure:
//! every transition returns the decision it took and the protocol messages
//! that must be sent as a result, and the caller performs the sends after
//! the transition has been committed. This keeps remote I/O out of the
//! critical path and makes the machine easy to drive from a simulation.
//!
//! A process cycles through `Released`, `Wanted` and `Held`. Requests are
//! ordered by vector clock, and concurrent requests are ordered by process
//! ID, smallest first.

use std::cmp;
use std::collections::VecDeque;
use std::fmt;

use hashbrown::HashSet as Set;

use crate::clock;
use crate::error::{Anomaly, Error, Result};
use crate::message::{self, Outbox, Protocol};

/// Rule used to order two pending requests.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Priority {
    /// Happens-before order, ties and concurrent pairs broken by process ID.
    Causal,

    /// Sum of clock components, ties broken by process ID. A total order
    /// that extends happens-before.
    Lamport,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Causal
    }
}

/// Lifecycle of a process with respect to the critical section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Released,
    Wanted { pending: clock::Timestamp },
    Held { round: u64 },
}

impl Status {
    pub fn name(&self) -> &'static str {
        match self {
        | Status::Released => "released",
        | Status::Wanted { .. } => "wanted",
        | Status::Held { .. } => "held",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Status::Wanted { pending } => write!(fmt, "wanted {}", pending),
        | Status::Held { round } => write!(fmt, "held in round {}", round),
        | Status::Released => write!(fmt, "released"),
        }
    }
}

/// Outcome of an incoming request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Grant immediately by sending this reply to the requester.
    Reply(message::Reply),

    /// Queue the requester until we leave the critical section.
    Defer,

    /// Requester is already queued; nothing changes.
    Duplicate,
}

/// How far the current request has progressed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    Waiting { received: usize, needed: usize },
    Granted { round: u64 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Deferred {
    p_id: usize,
    round: u64,
}

/// Mutual exclusion state of a single process.
#[derive(Debug)]
pub struct Machine {
    /// Unique ID of this process
    id: usize,

    /// Total number of processes
    count: usize,

    /// Ordering rule for competing requests
    priority: Priority,

    /// Causal clock owned by this process
    clock: clock::Clock,

    /// Current lifecycle state
    status: Status,

    /// Requests waiting for us to leave the critical section, oldest first
    deferred: VecDeque<Deferred>,

    /// Peers that granted the current request
    replies: Set<usize>,

    /// Rounds we abandoned; late replies for them are expected
    withdrawn: Set<u64>,
}

impl Machine {
    pub fn new(id: usize, count: usize) -> Self {
        Machine {
            id,
            count,
            priority: Priority::default(),
            clock: clock::Clock::new(id, count),
            status: Status::Released,
            deferred: VecDeque::new(),
            replies: Set::default(),
            withdrawn: Set::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn clock(&self) -> &clock::Clock {
        &self.clock
    }

    pub fn is_held(&self) -> bool {
        match self.status {
        | Status::Held { .. } => true,
        | _ => false,
        }
    }

    /// Processes currently queued behind us, oldest first.
    pub fn deferred(&self) -> Vec<usize> {
        self.deferred.iter().map(|entry| entry.p_id).collect()
    }

    /// Number of grants collected for the current request.
    pub fn replies(&self) -> usize {
        self.replies.len()
    }

    /// Starts a new request cycle: `Released -> Wanted`.
    ///
    /// Returns the request to send to every other process. With a single
    /// process there is nobody to ask, and the machine moves straight to `Held`.
    pub fn request(&mut self) -> Result<(message::Request, Progress)> {
        if self.status != Status::Released {
            return Err(Error::Busy)
        }
        self.clock.tick();
        let pending = self.clock.snapshot();
        let request = message::Request {
            p_id: self.id,
            timestamp: pending.clone(),
        };
        debug!("requesting with {}", pending);
        self.replies.clear();
        self.status = Status::Wanted { pending };
        Ok((request, self.advance()))
    }

    /// Decides whether to grant `request` now or after we release.
    pub fn receive_request(&mut self, request: &message::Request) -> Result<Decision> {
        self.validate(request.p_id)?;
        self.validate_timestamp(request.p_id, &request.timestamp)?;
        self.clock.merge(&request.timestamp);

        let round = request.round();
        if let Some(entry) = self.deferred.iter_mut().find(|entry| entry.p_id == request.p_id) {
            entry.round = cmp::max(entry.round, round);
            debug!("{} already deferred", request.p_id);
            return Ok(Decision::Duplicate)
        }

        let defer = match &self.status {
        | Status::Released => false,
        | Status::Held { .. } => true,
        | Status::Wanted { pending } => self.precedes(pending, &request.timestamp, request.p_id),
        };

        if defer {
            debug!("deferring {} at {} while {}", request.p_id, request.timestamp, self.status);
            self.deferred.push_back(Deferred { p_id: request.p_id, round });
            Ok(Decision::Defer)
        } else {
            debug!("granting {} at {} while {}", request.p_id, request.timestamp, self.status);
            Ok(Decision::Reply(message::Reply { p_id: self.id, round }))
        }
    }

    /// Counts a grant toward the current request.
    pub fn receive_reply(&mut self, reply: message::Reply) -> Result<Progress> {
        self.validate(reply.p_id)?;
        let expected = match &self.status {
        | Status::Wanted { pending } => pending.get(self.id),
        | _ if self.withdrawn.contains(&reply.round) => {
            return Err(Error::Stale { from: reply.p_id, round: reply.round })
        }
        | status => {
            return Err(Anomaly::UnexpectedReply { from: reply.p_id, status: status.name() }.into())
        }
        };

        if reply.round != expected {
            if self.withdrawn.contains(&reply.round) {
                return Err(Error::Stale { from: reply.p_id, round: reply.round })
            }
            return Err(Anomaly::WrongRound { from: reply.p_id, round: reply.round, expected }.into())
        }

        if !self.replies.insert(reply.p_id) {
            debug!("duplicate reply from {}", reply.p_id);
        }
        Ok(self.advance())
    }

    /// Leaves the critical section: `Held -> Released`.
    ///
    /// Returns one reply per deferred request, in the order they arrived.
    pub fn release(&mut self) -> Result<Outbox> {
        if !self.is_held() {
            return Err(Error::NotHeld)
        }
        debug!("releasing, {} deferred", self.deferred.len());
        self.status = Status::Released;
        Ok(self.drain())
    }

    /// Gives up on the current cycle, whatever its state.
    ///
    /// A `Wanted` request is retracted: deferred peers are answered and every
    /// peer that has not granted yet is told to drop its entry for us. A
    /// `Held` section is released. `Released` is left untouched.
    pub fn abandon(&mut self) -> Outbox {
        let round = match &self.status {
        | Status::Released => return Outbox::new(),
        | Status::Held { .. } => return self.release().unwrap_or_default(),
        | Status::Wanted { pending } => pending.get(self.id),
        };

        debug!("withdrawing round {} with {} of {} replies", round, self.replies.len(), self.count - 1);
        let withdraw = message::Withdraw { p_id: self.id, round };
        let waiting = (0..self.count)
            .filter(|p_id| *p_id != self.id && !self.replies.contains(p_id))
            .map(|p_id| (p_id, Protocol::Withdraw(withdraw)))
            .collect::<Vec<_>>();

        self.withdrawn.insert(round);
        self.replies.clear();
        self.status = Status::Released;

        let mut outbox = self.drain();
        outbox.extend(waiting);
        outbox
    }

    /// Drops the deferred entry of a request its sender abandoned.
    pub fn receive_withdraw(&mut self, withdraw: message::Withdraw) -> Result<bool> {
        self.validate(withdraw.p_id)?;
        let before = self.deferred.len();
        self.deferred.retain(|entry| entry.p_id != withdraw.p_id || entry.round > withdraw.round);
        Ok(self.deferred.len() < before)
    }

    /// Records a local event and returns the timestamp to send with it.
    pub fn stamp(&mut self) -> clock::Timestamp {
        self.clock.tick();
        self.clock.snapshot()
    }

    /// Records the receipt of a workload message from `p_id`.
    pub fn observe(&mut self, p_id: usize, timestamp: &clock::Timestamp) -> Result<()> {
        self.validate(p_id)?;
        self.validate_timestamp(p_id, timestamp)?;
        self.clock.merge(timestamp);
        Ok(())
    }

    /// Whether our pending request `mine` wins against `theirs` from `their_id`.
    fn precedes(&self, mine: &clock::Timestamp, theirs: &clock::Timestamp, their_id: usize) -> bool {
        match self.priority {
        | Priority::Causal => match mine.compare(theirs) {
            | clock::Causality::Before => true,
            | clock::Causality::After => false,
            | clock::Causality::Equal
            | clock::Causality::Concurrent => self.id < their_id,
        },
        | Priority::Lamport => (mine.lamport(), self.id) < (theirs.lamport(), their_id),
        }
    }

    /// Enters the critical section once every other process has granted.
    fn advance(&mut self) -> Progress {
        let needed = self.count - 1;
        let round = match &self.status {
        | Status::Wanted { pending } if self.replies.len() >= needed => pending.get(self.id),
        | _ => return Progress::Waiting { received: self.replies.len(), needed },
        };
        debug!("entering round {}", round);
        self.replies.clear();
        self.status = Status::Held { round };
        Progress::Granted { round }
    }

    fn drain(&mut self) -> Outbox {
        let id = self.id;
        self.deferred
            .drain(..)
            .map(|entry| (entry.p_id, Protocol::Reply(message::Reply { p_id: id, round: entry.round })))
            .collect()
    }

    fn validate(&self, p_id: usize) -> Result<()> {
        if p_id == self.id {
            Err(Anomaly::FromSelf(p_id).into())
        } else if p_id >= self.count {
            Err(Error::UnknownProcess(p_id))
        } else {
            Ok(())
        }
    }

    fn validate_timestamp(&self, from: usize, timestamp: &clock::Timestamp) -> Result<()> {
        if timestamp.len() == self.count {
            Ok(())
        } else {
            Err(Anomaly::MalformedTimestamp { from, len: timestamp.len(), expected: self.count }.into())
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn request(p_id: usize, ticks: &[u64]) -> message::Request {
        message::Request {
            p_id,
            timestamp: clock::Timestamp::from(ticks.to_vec()),
        }
    }

    fn reply(p_id: usize, round: u64) -> message::Reply {
        message::Reply { p_id, round }
    }

    /// Drives `machine` into `Held` by granting from every other process.
    fn hold(machine: &mut Machine) -> u64 {
        let (request, _) = machine.request().unwrap();
        let round = request.round();
        let (id, count) = (machine.id(), machine.count());
        for p_id in (0..count).filter(|p_id| *p_id != id) {
            machine.receive_reply(reply(p_id, round)).unwrap();
        }
        assert!(machine.is_held());
        round
    }

    #[test]
    fn request_ticks_and_waits_for_everyone() {
        let mut machine = Machine::new(1, 3);
        let (request, progress) = machine.request().unwrap();
        assert_eq!(request, self::request(1, &[0, 1, 0]));
        assert_eq!(progress, Progress::Waiting { received: 0, needed: 2 });
        assert_eq!(machine.status().name(), "wanted");
        assert!(matches!(machine.request(), Err(Error::Busy)));
    }

    #[test]
    fn single_process_enters_immediately() {
        let mut machine = Machine::new(0, 1);
        let (_, progress) = machine.request().unwrap();
        assert_eq!(progress, Progress::Granted { round: 1 });
        assert!(machine.is_held());
        assert!(machine.release().unwrap().is_empty());
    }

    #[test]
    fn enters_after_last_reply_and_clears_reply_set() {
        let mut machine = Machine::new(0, 3);
        machine.request().unwrap();
        assert_eq!(
            machine.receive_reply(reply(2, 1)).unwrap(),
            Progress::Waiting { received: 1, needed: 2 },
        );
        assert_eq!(
            machine.receive_reply(reply(2, 1)).unwrap(),
            Progress::Waiting { received: 1, needed: 2 },
        );
        assert_eq!(machine.receive_reply(reply(1, 1)).unwrap(), Progress::Granted { round: 1 });
        assert_eq!(machine.status(), &Status::Held { round: 1 });
        assert_eq!(machine.replies(), 0);
    }

    #[test]
    fn released_grants_and_merges() {
        let mut machine = Machine::new(0, 3);
        let decision = machine.receive_request(&request(2, &[0, 0, 4])).unwrap();
        assert_eq!(decision, Decision::Reply(reply(0, 4)));
        assert_eq!(machine.clock().snapshot(), clock::Timestamp::from(vec![1, 0, 4]));
    }

    #[test]
    fn held_defers_without_duplicates_and_replays_in_order() {
        let mut machine = Machine::new(0, 5);
        hold(&mut machine);

        assert_eq!(machine.receive_request(&request(1, &[0, 1, 0, 0, 0])).unwrap(), Decision::Defer);
        assert_eq!(machine.receive_request(&request(3, &[0, 0, 0, 1, 0])).unwrap(), Decision::Defer);
        assert_eq!(machine.receive_request(&request(1, &[0, 1, 0, 0, 0])).unwrap(), Decision::Duplicate);
        assert_eq!(machine.receive_request(&request(4, &[0, 0, 0, 0, 1])).unwrap(), Decision::Defer);
        assert_eq!(machine.deferred(), vec![1, 3, 4]);

        let outbox = machine.release().unwrap();
        assert_eq!(outbox, vec![
            (1, Protocol::Reply(reply(0, 1))),
            (3, Protocol::Reply(reply(0, 1))),
            (4, Protocol::Reply(reply(0, 1))),
        ]);
        assert!(machine.deferred().is_empty());
        assert_eq!(machine.status(), &Status::Released);
    }

    #[test]
    fn release_requires_held() {
        let mut machine = Machine::new(0, 2);
        assert!(matches!(machine.release(), Err(Error::NotHeld)));
        machine.request().unwrap();
        assert!(matches!(machine.release(), Err(Error::NotHeld)));
    }

    #[test]
    fn wanted_defers_later_requests() {
        let mut machine = Machine::new(1, 3);
        machine.request().unwrap();
        let decision = machine.receive_request(&request(0, &[2, 1, 0])).unwrap();
        assert_eq!(decision, Decision::Defer);
    }

    #[test]
    fn wanted_grants_earlier_requests() {
        let mut machine = Machine::new(1, 3);
        machine.receive_request(&request(0, &[1, 0, 0])).unwrap();
        machine.request().unwrap();
        assert_eq!(machine.status(), &Status::Wanted { pending: clock::Timestamp::from(vec![1, 2, 0]) });
        let decision = machine.receive_request(&request(0, &[1, 0, 0])).unwrap();
        assert_eq!(decision, Decision::Reply(reply(1, 1)));
    }

    #[test]
    fn concurrent_requests_favor_smaller_id() {
        let mut low = Machine::new(2, 6);
        let mut high = Machine::new(5, 6);
        let (from_low, _) = low.request().unwrap();
        let (from_high, _) = high.request().unwrap();
        assert_eq!(from_low.timestamp.compare(&from_high.timestamp), clock::Causality::Concurrent);

        assert_eq!(low.receive_request(&from_high).unwrap(), Decision::Defer);
        assert_eq!(high.receive_request(&from_low).unwrap(), Decision::Reply(reply(5, 1)));
    }

    #[test]
    fn tie_break_ignores_arrival_order() {
        for low_first in &[true, false] {
            let mut low = Machine::new(2, 6);
            let mut high = Machine::new(5, 6);
            let (from_low, _) = low.request().unwrap();
            let (from_high, _) = high.request().unwrap();

            let (low_decision, high_decision) = if *low_first {
                let l = low.receive_request(&from_high).unwrap();
                (l, high.receive_request(&from_low).unwrap())
            } else {
                let h = high.receive_request(&from_low).unwrap();
                (low.receive_request(&from_high).unwrap(), h)
            };
            assert_eq!(low_decision, Decision::Defer);
            assert!(matches!(high_decision, Decision::Reply(_)));
        }
    }

    #[test]
    fn equal_timestamps_favor_smaller_id() {
        let mut machine = Machine::new(1, 3);
        machine.request().unwrap();
        assert_eq!(machine.receive_request(&request(0, &[0, 1, 0])).unwrap(), Decision::Reply(reply(1, 0)));

        let mut machine = Machine::new(1, 3);
        machine.request().unwrap();
        assert_eq!(machine.receive_request(&request(2, &[0, 1, 0])).unwrap(), Decision::Defer);
    }

    #[test]
    fn lamport_priority_orders_by_sum() {
        // [4, 0, 0] is concurrent with [0, 0, 1]; the causal rule lets the
        // smaller ID win, the Lamport rule lets the smaller sum win.
        let mut causal = Machine::new(0, 3);
        for _ in 0..3 { causal.stamp(); }
        causal.request().unwrap();
        assert_eq!(causal.receive_request(&request(2, &[0, 0, 1])).unwrap(), Decision::Defer);

        let mut lamport = Machine::new(0, 3).with_priority(Priority::Lamport);
        for _ in 0..3 { lamport.stamp(); }
        lamport.request().unwrap();
        assert_eq!(lamport.receive_request(&request(2, &[0, 0, 1])).unwrap(), Decision::Reply(reply(0, 1)));
    }

    #[test]
    fn reply_outside_wanted_is_an_anomaly() {
        let mut machine = Machine::new(0, 2);
        match machine.receive_reply(reply(1, 1)) {
        | Err(Error::Anomaly(Anomaly::UnexpectedReply { from: 1, status: "released" })) => (),
        | other => panic!("unexpected {:?}", other),
        }

        hold(&mut machine);
        match machine.receive_reply(reply(1, 1)) {
        | Err(Error::Anomaly(Anomaly::UnexpectedReply { from: 1, status: "held" })) => (),
        | other => panic!("unexpected {:?}", other),
        }
        assert!(machine.is_held());
    }

    #[test]
    fn reply_for_wrong_round_is_not_counted() {
        let mut machine = Machine::new(0, 2);
        machine.request().unwrap();
        match machine.receive_reply(reply(1, 7)) {
        | Err(Error::Anomaly(Anomaly::WrongRound { from: 1, round: 7, expected: 1 })) => (),
        | other => panic!("unexpected {:?}", other),
        }
        assert_eq!(machine.replies(), 0);
    }

    #[test]
    fn rejects_foreign_and_malformed_senders() {
        let mut machine = Machine::new(0, 3);
        assert!(matches!(machine.receive_request(&request(0, &[1, 0, 0])), Err(Error::Anomaly(Anomaly::FromSelf(0)))));
        assert!(matches!(machine.receive_request(&request(7, &[0, 0, 0])), Err(Error::UnknownProcess(7))));
        assert!(matches!(
            machine.receive_request(&request(1, &[0, 1])),
            Err(Error::Anomaly(Anomaly::MalformedTimestamp { from: 1, len: 2, expected: 3 }))
        ));
        assert_eq!(machine.clock().own(), 0);
    }

    #[test]
    fn abandon_withdraws_and_answers_deferred() {
        let mut machine = Machine::new(0, 4);
        machine.request().unwrap();
        machine.receive_reply(reply(1, 1)).unwrap();
        assert_eq!(machine.receive_request(&request(3, &[0, 0, 0, 1])).unwrap(), Decision::Defer);

        let outbox = machine.abandon();
        assert_eq!(outbox, vec![
            (3, Protocol::Reply(reply(0, 1))),
            (2, Protocol::Withdraw(message::Withdraw { p_id: 0, round: 1 })),
            (3, Protocol::Withdraw(message::Withdraw { p_id: 0, round: 1 })),
        ]);
        assert_eq!(machine.status(), &Status::Released);
        assert!(machine.deferred().is_empty());

        // Late grant for the abandoned round is dropped, and does not leak
        // into the next cycle.
        assert!(matches!(machine.receive_reply(reply(2, 1)), Err(Error::Stale { from: 2, round: 1 })));
        let (next, _) = machine.request().unwrap();
        assert!(matches!(machine.receive_reply(reply(3, 1)), Err(Error::Stale { from: 3, round: 1 })));
        assert_eq!(machine.replies(), 0);
        assert!(next.round() > 1);
    }

    #[test]
    fn abandon_releases_held_section() {
        let mut machine = Machine::new(1, 2);
        hold(&mut machine);
        machine.receive_request(&request(0, &[1, 0])).unwrap();
        assert_eq!(machine.abandon(), vec![(0, Protocol::Reply(reply(1, 1)))]);
        assert_eq!(machine.status(), &Status::Released);
        assert!(machine.abandon().is_empty());
    }

    #[test]
    fn withdraw_removes_only_older_entries() {
        let mut machine = Machine::new(0, 3);
        hold(&mut machine);
        machine.receive_request(&request(1, &[0, 1, 0])).unwrap();
        machine.receive_request(&request(2, &[0, 0, 2])).unwrap();

        assert!(!machine.receive_withdraw(message::Withdraw { p_id: 2, round: 1 }).unwrap());
        assert!(machine.receive_withdraw(message::Withdraw { p_id: 1, round: 1 }).unwrap());
        assert_eq!(machine.deferred(), vec![2]);
    }

    #[test]
    fn duplicate_request_refreshes_round() {
        let mut machine = Machine::new(0, 2);
        hold(&mut machine);
        machine.receive_request(&request(1, &[0, 1])).unwrap();
        assert_eq!(machine.receive_request(&request(1, &[0, 2])).unwrap(), Decision::Duplicate);
        assert_eq!(machine.release().unwrap(), vec![(1, Protocol::Reply(reply(0, 2)))]);
    }

    #[test]
    fn workload_events_move_the_clock() {
        let mut machine = Machine::new(1, 2);
        assert_eq!(machine.stamp(), clock::Timestamp::from(vec![0, 1]));
        machine.observe(0, &clock::Timestamp::from(vec![3, 0])).unwrap();
        assert_eq!(machine.clock().snapshot(), clock::Timestamp::from(vec![3, 2]));
    }
}
