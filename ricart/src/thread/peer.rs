//! # Summary
//!
//! This module defines connections to peer servers. Responsible for
//! forwarding protocol and workload messages between the network and the
//! local process, and for detecting peers that have gone silent.
//!
//! Process `i` dials every peer `j > i` and accepts connections from every
//! peer `j < i`, so each pair shares exactly one connection. The first frame
//! on a connection is the dialer's `Ping`, which tells the accepting side
//! who it is talking to.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde_derive::{Deserialize, Serialize};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::internal;
use crate::message;
use crate::payload;
use crate::shared::Shared;
use crate::socket;
use crate::thread::process;

/// Number of heartbeat intervals a peer may stay silent.
const MISSED_PINGS: u32 = 3;

#[derive(Derivative, Deserialize, Serialize)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
#[serde(bound(serialize = "", deserialize = ""))]
pub enum In<P: payload::Payload> {
    Ping(usize),
    Protocol(message::Protocol),
    Payload(message::Stamped<P>),
}

/// Bounded retry policy for dialing a peer.
#[derive(Copy, Clone, Debug)]
pub struct Retry {
    /// Attempts after the first one
    pub retries: usize,

    /// Delay added per failed attempt
    pub backoff: Duration,
}

pub struct Peer<P: payload::Payload> {
    self_id: usize,
    peer_id: usize,
    rx: internal::Rx<In<P>>,
    peer_rx: socket::Rx<In<P>>,
    peer_tx: socket::Tx<In<P>>,
    shared_tx: Shared<P>,
    timeout: Duration,

    /// Identifies this connection in the shared hub
    token: u64,
}

impl<P: payload::Payload> Peer<P> {
    fn new(
        self_id: usize,
        peer_id: usize,
        peer_rx: socket::Rx<In<P>>,
        peer_tx: socket::Tx<In<P>>,
        shared_tx: Shared<P>,
        timeout: Duration,
    ) -> Self {
        let (rx, tx) = internal::new();
        let token = shared_tx.write().connect_peer(peer_id, tx);
        info!("connected to {}", peer_id);
        Peer {
            self_id,
            peer_id,
            rx,
            peer_rx,
            peer_tx,
            shared_tx,
            timeout,
            token,
        }
    }

    /// Connects to `peer_id` at `address`, retrying with linear backoff.
    pub async fn dial(
        self_id: usize,
        peer_id: usize,
        address: SocketAddr,
        shared_tx: Shared<P>,
        timeout: Duration,
        retry: Retry,
    ) -> Result<Self> {
        let mut attempt = 0;
        let stream = loop {
            match TcpStream::connect(address).await {
            | Ok(stream) => break stream,
            | Err(error) if attempt < retry.retries => {
                attempt += 1;
                debug!("failed to reach {} at {} ({}), attempt {}", peer_id, address, error, attempt);
                tokio::time::sleep(retry.backoff * attempt as u32).await;
            }
            | Err(error) => {
                warn!("giving up on {} at {}: {}", peer_id, address, error);
                return Err(Error::PeerUnreachable(peer_id))
            }
            }
        };
        stream.set_nodelay(true)?;
        let (peer_rx, mut peer_tx) = socket::split::<In<P>, In<P>>(stream);
        peer_tx.send(&In::Ping(self_id)).await?;
        Ok(Peer::new(self_id, peer_id, peer_rx, peer_tx, shared_tx, timeout))
    }

    /// Waits for the handshake on an accepted connection.
    pub async fn accept(
        self_id: usize,
        count: usize,
        stream: TcpStream,
        shared_tx: Shared<P>,
        timeout: Duration,
    ) -> Result<Self> {
        stream.set_nodelay(true)?;
        let (mut peer_rx, peer_tx) = socket::split::<In<P>, In<P>>(stream);
        let first = tokio::time::timeout(timeout * MISSED_PINGS, peer_rx.recv())
            .await
            .map_err(|_| Error::Io(std::io::ErrorKind::TimedOut.into()))?;
        match first {
        | Some(Ok(In::Ping(peer_id))) if peer_id < count && peer_id != self_id => {
            Ok(Peer::new(self_id, peer_id, peer_rx, peer_tx, shared_tx, timeout))
        }
        | Some(Ok(In::Ping(peer_id))) => Err(Error::UnknownProcess(peer_id)),
        | Some(Ok(_)) | None => Err(Error::Io(std::io::ErrorKind::InvalidData.into())),
        | Some(Err(error)) => Err(error),
        }
    }

    fn respond_incoming(&self, message: In<P>) {
        let shared_tx = self.shared_tx.read();
        match message {
        | In::Ping(_) => (),
        | In::Protocol(protocol) if protocol.sender() == self.peer_id => {
            shared_tx.send_process(process::In::Protocol(protocol));
        }
        | In::Payload(stamped) if stamped.p_id == self.peer_id => {
            shared_tx.send_process(process::In::Payload(stamped));
        }
        | message => warn!("dropping {:?} forged on connection to {}", message, self.peer_id),
        }
    }

    /// Pumps messages in both directions until the connection fails or
    /// the peer misses too many heartbeats.
    pub async fn run(mut self) {
        let mut heartbeat = tokio::time::interval(self.timeout);
        let mut seen = Instant::now();
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if seen.elapsed() > self.timeout * MISSED_PINGS {
                        warn!("{} stopped responding", self.peer_id);
                        break
                    }
                    if let Err(error) = self.peer_tx.send(&In::Ping(self.self_id)).await {
                        warn!("failed to ping {}: {}", self.peer_id, error);
                        break
                    }
                }
                incoming = self.peer_rx.recv() => match incoming {
                | Some(Ok(In::Ping(_))) => seen = Instant::now(),
                | Some(Ok(message)) => {
                    seen = Instant::now();
                    trace!("received {:?}", message);
                    self.respond_incoming(message);
                }
                | Some(Err(error)) => {
                    warn!("failed to read from {}: {}", self.peer_id, error);
                    break
                }
                | None => break,
                },
                outgoing = self.rx.recv() => match outgoing {
                | Some(message) => {
                    trace!("sending {:?}", message);
                    if let Err(error) = self.peer_tx.send(&message).await {
                        warn!("failed to send to {}: {}", self.peer_id, error);
                        break
                    }
                }
                | None => break,
                },
            }
        }
    }
}

impl<P: payload::Payload> Drop for Peer<P> {
    fn drop(&mut self) {
        info!("disconnected from {}", self.peer_id);
        self.shared_tx.write().disconnect_peer(self.peer_id, self.token);
    }
}
