//! # Summary
//!
//! This module abstracts over internal connections between tasks.
//!
//! Currently backed by `tokio::sync::mpsc`: multiple-producer single-consumer
//! unbounded channels. Sending never blocks, so a task may hand a message
//! off while in the middle of a state transition. The only way for a send to
//! fail is if the receiving task has exited.

use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Intra-process receiving channel.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Rx<T>(mpsc::UnboundedReceiver<T>);

/// Intra-process transmission channel. All clones send to the same receiving end.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Tx<T>(mpsc::UnboundedSender<T>);

/// Create a new pair of linked receiving and transmitting channels.
pub fn new<T>() -> (Rx<T>, Tx<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Rx(rx), Tx(tx))
}

impl<T> Tx<T> {
    /// Send a message through the channel.
    /// Fails if the receiving end has been dropped.
    pub fn send(&self, message: T) -> Result<()> {
        self.0.send(message).map_err(|_| Error::Shutdown)
    }

    /// Attempt to send a message through the channel.
    /// Does nothing if the receiving end has been dropped.
    pub fn try_send(&self, message: T) {
        self.0.send(message).ok();
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

impl<T> Rx<T> {
    /// Waits for the next message; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.0.recv().await
    }
}
