use tokio::sync::oneshot;

use crate::clock;
use crate::error::{Error, Result};
use crate::internal::{Rx, Tx};
use crate::machine;
use crate::message;
use crate::payload;
use crate::shared;
use crate::thread::peer;

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub enum In<P: payload::Payload> {
    /// Local request to enter the critical section; answered with the round
    Acquire(oneshot::Sender<Result<u64>>),

    /// Local exit from the critical section entered in the given round
    Release(u64),

    /// Local cancellation of a pending request
    Abandon,

    /// Local workload message for a peer; answered with its timestamp
    Send(usize, P, oneshot::Sender<Result<clock::Timestamp>>),

    Status(oneshot::Sender<machine::Status>),

    Protocol(message::Protocol),

    Payload(message::Stamped<P>),
}

pub struct Process<P: payload::Payload> {
    machine: machine::Machine,
    rx: Rx<In<P>>,
    shared_tx: shared::Shared<P>,
    deliver_tx: Tx<message::Delivery<P>>,
    waiter: Option<oneshot::Sender<Result<u64>>>,
}

impl<P: payload::Payload> Process<P> {
    pub fn new(
        machine: machine::Machine,
        rx: Rx<In<P>>,
        shared_tx: shared::Shared<P>,
        deliver_tx: Tx<message::Delivery<P>>,
    ) -> Self {
        Process {
            machine,
            rx,
            shared_tx,
            deliver_tx,
            waiter: None,
        }
    }

    fn dispatch(&self, outbox: message::Outbox) {
        let shared_tx = self.shared_tx.read();
        for (p_id, protocol) in outbox {
            trace!("sending {:?} to {}", protocol, p_id);
            if let Err(error) = shared_tx.send(p_id, peer::In::Protocol(protocol)) {
                warn!("dropped message: {}", error);
            }
        }
    }

    fn respond_acquire(&mut self, waiter: oneshot::Sender<Result<u64>>) {
        if self.waiter.is_some() {
            waiter.send(Err(Error::Busy)).ok();
            return
        }

        let (request, progress) = match self.machine.request() {
        | Ok(pending) => pending,
        | Err(error) => {
            waiter.send(Err(error)).ok();
            return
        }
        };

        let self_id = self.machine.id();
        let unreachable = {
            let shared_tx = self.shared_tx.read();
            (0..self.machine.count())
                .filter(|p_id| *p_id != self_id)
                .find(|p_id| {
                    let protocol = message::Protocol::Request(request.clone());
                    shared_tx.send(*p_id, peer::In::Protocol(protocol)).is_err()
                })
        };

        if let Some(p_id) = unreachable {
            warn!("failed to reach {}, withdrawing", p_id);
            let outbox = self.machine.abandon();
            self.dispatch(outbox);
            waiter.send(Err(Error::PeerUnreachable(p_id))).ok();
            return
        }

        self.waiter = Some(waiter);
        self.respond_progress(progress);
    }

    fn respond_progress(&mut self, progress: machine::Progress) {
        match progress {
        | machine::Progress::Waiting { received, needed } => {
            trace!("waiting on {} of {} replies", needed - received, needed);
        }
        | machine::Progress::Granted { round } => {
            info!("entered critical section in round {}", round);
            if let Some(waiter) = self.waiter.take() {
                if waiter.send(Ok(round)).is_ok() { return }
            }
            debug!("nobody is waiting on round {}, releasing", round);
            self.respond_release(round);
        }
        }
    }

    fn respond_release(&mut self, round: u64) {
        match self.machine.status() {
        | machine::Status::Held { round: held } if *held == round => (),
        | status => {
            debug!("ignoring release of round {} while {}", round, status);
            return
        }
        }
        match self.machine.release() {
        | Ok(outbox) => {
            info!("left critical section in round {}", round);
            self.dispatch(outbox);
        }
        | Err(error) => warn!("failed to release: {}", error),
        }
    }

    /// Withdraws the pending request, but only once its caller has stopped
    /// listening. `Abandon` from a caller that was turned away as `Busy`
    /// must not touch a request or section owned by someone else.
    fn respond_abandon(&mut self) {
        match &self.waiter {
        | Some(waiter) if waiter.is_closed() => (),
        | _ => {
            debug!("nothing to withdraw while {}", self.machine.status());
            return
        }
        }
        self.waiter.take();
        let outbox = self.machine.abandon();
        self.dispatch(outbox);
    }

    fn respond_send(&mut self, p_id: usize, payload: P) -> Result<clock::Timestamp> {
        if p_id == self.machine.id() || p_id >= self.machine.count() {
            return Err(Error::UnknownProcess(p_id))
        }
        let timestamp = self.machine.stamp();
        let stamped = message::Stamped {
            p_id: self.machine.id(),
            timestamp: timestamp.clone(),
            payload,
        };
        self.shared_tx.read().send(p_id, peer::In::Payload(stamped))?;
        Ok(timestamp)
    }

    fn respond_payload(&mut self, stamped: message::Stamped<P>) -> Result<()> {
        self.machine.observe(stamped.p_id, &stamped.timestamp)?;
        let delivery = message::Delivery {
            from: stamped.p_id,
            clock: self.machine.clock().snapshot(),
            payload: stamped.payload,
        };
        self.deliver_tx.try_send(delivery);
        Ok(())
    }

    fn respond_protocol(&mut self, protocol: message::Protocol) -> Result<()> {
        match protocol {
        | message::Protocol::Request(request) => {
            if let machine::Decision::Reply(reply) = self.machine.receive_request(&request)? {
                self.dispatch(vec![(request.p_id, message::Protocol::Reply(reply))]);
            }
        }
        | message::Protocol::Reply(reply) => {
            let progress = self.machine.receive_reply(reply)?;
            self.respond_progress(progress);
        }
        | message::Protocol::Withdraw(withdraw) => {
            if self.machine.receive_withdraw(withdraw)? {
                debug!("{} withdrew round {}", withdraw.p_id, withdraw.round);
            }
        }
        }
        Ok(())
    }

    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            trace!("received {:?}", message);
            let result = match message {
            | In::Acquire(waiter) => {
                self.respond_acquire(waiter);
                Ok(())
            }
            | In::Release(round) => {
                self.respond_release(round);
                Ok(())
            }
            | In::Abandon => {
                self.respond_abandon();
                Ok(())
            }
            | In::Send(p_id, payload, tx) => {
                tx.send(self.respond_send(p_id, payload)).ok();
                Ok(())
            }
            | In::Status(tx) => {
                tx.send(self.machine.status().clone()).ok();
                Ok(())
            }
            | In::Protocol(protocol) => self.respond_protocol(protocol),
            | In::Payload(stamped) => self.respond_payload(stamped),
            };
            match result {
            | Ok(()) => (),
            | Err(error @ Error::Stale { .. }) => debug!("{}", error),
            | Err(error) => warn!("{}", error),
            }
        }
        debug!("process {} shutting down", self.machine.id());
    }
}
