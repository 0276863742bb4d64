//! # Summary
//!
//! Application-facing side of a running engine. A `Handle` asks the process
//! task for the critical section and hands back a `Guard`, which leaves the
//! section when released or dropped. Workload messages sent through the
//! handle carry the process clock; messages received from peers come out of
//! `Deliveries` after their clock has been merged.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::clock;
use crate::error::{Error, Result};
use crate::internal::{Rx, Tx};
use crate::machine;
use crate::message;
use crate::payload;
use crate::thread::process;

#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Handle<P: payload::Payload> {
    /// Local process ID
    id: usize,

    /// Total number of processes
    count: usize,

    process_tx: Tx<process::In<P>>,

    /// Default bound on `acquire`, unbounded if `None`
    timeout: Option<Duration>,
}

impl<P: payload::Payload> Handle<P> {
    pub(crate) fn new(
        id: usize,
        count: usize,
        process_tx: Tx<process::In<P>>,
        timeout: Option<Duration>,
    ) -> Self {
        Handle { id, count, process_tx, timeout }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Waits for the critical section, bounded by the configured timeout.
    pub async fn acquire(&self) -> Result<Guard<P>> {
        match self.timeout {
        | Some(timeout) => self.acquire_timeout(timeout).await,
        | None => self.acquire_until(futures::future::pending::<()>()).await,
        }
    }

    /// Waits at most `timeout` for the critical section.
    ///
    /// On expiry the request is withdrawn and `Error::Cancelled` is returned,
    /// leaving the process free to try again.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Guard<P>> {
        self.acquire_until(tokio::time::sleep(timeout)).await
    }

    /// Waits for the critical section until `cancel` completes.
    ///
    /// A grant that lands after `cancel` fired is released right away.
    pub async fn acquire_until<F>(&self, cancel: F) -> Result<Guard<P>>
        where F: Future<Output = ()>
    {
        let (tx, mut rx) = oneshot::channel();
        self.process_tx.send(process::In::Acquire(tx))?;
        tokio::pin!(cancel);
        tokio::select! {
            granted = &mut rx => match granted {
            | Ok(Ok(round)) => Ok(Guard {
                round,
                process_tx: self.process_tx.clone(),
            }),
            | Ok(Err(error)) => Err(error),
            | Err(_) => Err(Error::Shutdown),
            },
            _ = &mut cancel => {
                debug!("giving up on critical section");
                rx.close();
                match rx.try_recv() {
                | Ok(Ok(round)) => Guard {
                    round,
                    process_tx: self.process_tx.clone(),
                }.release(),
                | Ok(Err(error)) => return Err(error),
                | Err(_) => self.process_tx.try_send(process::In::Abandon),
                }
                Err(Error::Cancelled)
            }
        }
    }

    /// Sends a workload message to `p_id`, returning the timestamp it carries.
    pub async fn send(&self, p_id: usize, payload: P) -> Result<clock::Timestamp> {
        let (tx, rx) = oneshot::channel();
        self.process_tx.send(process::In::Send(p_id, payload, tx))?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Current state of the local process.
    pub async fn status(&self) -> Result<machine::Status> {
        let (tx, rx) = oneshot::channel();
        self.process_tx.send(process::In::Status(tx))?;
        rx.await.map_err(|_| Error::Shutdown)
    }
}

/// Exclusive access to the critical section. Dropping the guard releases it.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Guard<P: payload::Payload> {
    round: u64,
    process_tx: Tx<process::In<P>>,
}

impl<P: payload::Payload> Guard<P> {
    /// Request cycle in which the section was entered.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn release(self) {}
}

impl<P: payload::Payload> Drop for Guard<P> {
    fn drop(&mut self) {
        self.process_tx.try_send(process::In::Release(self.round));
    }
}

/// Stream of workload messages received from peers.
#[derive(Debug)]
pub struct Deliveries<P: payload::Payload>(pub(crate) Rx<message::Delivery<P>>);

impl<P: payload::Payload> Deliveries<P> {
    /// Waits for the next message; `None` once the engine has stopped.
    pub async fn recv(&mut self) -> Option<message::Delivery<P>> {
        self.0.recv().await
    }
}
