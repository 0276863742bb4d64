//! # Summary
//!
//! This module implements a central hub for intra-server message
//! forwarding. We wrap the central `State` type with Arc<RwLock<T>>
//! to share the connections between concurrently running tasks.
//!
//! Every send is a hand-off to an unbounded channel, so callers never
//! block on the network while holding the lock.

use std::sync::Arc;

use hashbrown::HashMap as Map;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::internal::Tx;
use crate::payload;
use crate::thread::{peer, process};

/// Thread-safe wrapper around `State` forwarding hub.
#[derive(Derivative)]
#[derivative(Clone(bound = ""))]
pub struct Shared<P: payload::Payload>(Arc<RwLock<State<P>>>);

impl<P: payload::Payload> Shared<P> {

    /// Initializes a message hub that forwards inbound traffic to `process_tx`.
    pub fn new(process_tx: Tx<process::In<P>>) -> Self {
        Shared(Arc::new(RwLock::new(State::new(process_tx))))
    }

    /// Acquires a read lock on the underlying state.
    pub fn read(&self) -> RwLockReadGuard<State<P>> {
        self.0.read()
    }

    /// Acquires a write lock on the underlying state.
    pub fn write(&self) -> RwLockWriteGuard<State<P>> {
        self.0.write()
    }
}

/// Collection of intra-server transmitting channels.
pub struct State<P: payload::Payload> {
    /// Live connection to each peer, tagged with the token it registered under
    peer_txs: Map<usize, (u64, Tx<peer::In<P>>)>,
    process_tx: Tx<process::In<P>>,
    next: u64,
}

impl<P: payload::Payload> State<P> {

    /// Initializes a message hub with the provided transmission channel.
    pub fn new(process_tx: Tx<process::In<P>>) -> Self {
        State {
            peer_txs: Map::default(),
            process_tx,
            next: 0,
        }
    }

    /// Registers the provided peer channel with this hub, returning the
    /// token that disconnects it.
    pub fn connect_peer(&mut self, id: usize, tx: Tx<peer::In<P>>) -> u64 {
        let token = self.next;
        self.next += 1;
        if self.peer_txs.insert(id, (token, tx)).is_some() {
            warn!("replaced existing connection to {}", id);
        }
        token
    }

    /// Disconnects the provided peer from this hub, unless the connection
    /// registered under `token` has already been replaced.
    pub fn disconnect_peer(&mut self, id: usize, token: u64) {
        match self.peer_txs.get(&id) {
        | Some((current, _)) if *current == token => {
            self.peer_txs.remove(&id);
        }
        | Some(_) => debug!("connection to {} already replaced", id),
        | None => (),
        }
    }

    /// Number of peers with a live connection.
    pub fn connected(&self) -> usize {
        self.peer_txs.values().filter(|(_, tx)| !tx.is_closed()).count()
    }

    pub fn is_connected(&self, id: usize) -> bool {
        self.peer_txs.get(&id).map_or(false, |(_, tx)| !tx.is_closed())
    }

    /// Forwards a message to the local mutual exclusion process.
    pub fn send_process(&self, message: process::In<P>) {
        self.process_tx.try_send(message);
    }

    /// Forwards a message to an external peer server.
    pub fn send(&self, id: usize, message: peer::In<P>) -> Result<()> {
        self.peer_txs
            .get(&id)
            .ok_or(Error::PeerUnreachable(id))?
            .1
            .send(message)
            .map_err(|_| Error::PeerUnreachable(id))
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::internal;

    #[test]
    fn stale_disconnect_keeps_the_replacement() {
        let (_process_rx, process_tx) = internal::new::<process::In<u64>>();
        let shared = Shared::new(process_tx);
        let (_old_rx, old_tx) = internal::new();
        let (_new_rx, new_tx) = internal::new();

        let old = shared.write().connect_peer(1, old_tx);
        let new = shared.write().connect_peer(1, new_tx);
        assert_ne!(old, new);

        shared.write().disconnect_peer(1, old);
        assert!(shared.read().is_connected(1));
        assert!(shared.read().send(1, peer::In::Ping(0)).is_ok());

        shared.write().disconnect_peer(1, new);
        assert!(!shared.read().is_connected(1));
        assert!(matches!(shared.read().send(1, peer::In::Ping(0)), Err(Error::PeerUnreachable(1))));
    }
}
