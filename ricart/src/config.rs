use std::time::{Duration, Instant};

use tokio::net::TcpListener;

use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::handle::{Deliveries, Handle};
use crate::internal;
use crate::machine;
use crate::payload;
use crate::shared;
use crate::thread;

/// Interval between checks for peer connections during startup.
const CONNECT_POLL: Duration = Duration::from_millis(20);

#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Config<P> {
    /// Unique process ID
    id: usize,

    /// Listening address of every process, including this one
    directory: Directory,

    /// Heartbeat interval for detecting unresponsive peers
    timeout: Duration,

    /// Dial attempts after the first one
    retries: usize,

    /// Delay added per failed dial attempt
    backoff: Duration,

    /// Time allowed for every peer to connect
    deadline: Duration,

    /// Default bound on `Handle::acquire`
    acquire: Option<Duration>,

    priority: machine::Priority,

    _marker: std::marker::PhantomData<fn() -> P>,
}

impl<P: payload::Payload> Config<P> {
    pub fn new(id: usize, directory: Directory) -> Self {
        Config {
            id,
            directory,
            timeout: Duration::from_secs(1),
            retries: 10,
            backoff: Duration::from_millis(100),
            deadline: Duration::from_secs(10),
            acquire: None,
            priority: machine::Priority::default(),
            _marker: Default::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: usize, backoff: Duration) -> Self {
        self.retries = retries;
        self.backoff = backoff;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire: Duration) -> Self {
        self.acquire = Some(acquire);
        self
    }

    pub fn with_priority(mut self, priority: machine::Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Binds the listener, connects to every peer and starts the process task.
    ///
    /// Resolves once every peer is connected, or fails with the first peer
    /// still missing when the deadline passes.
    pub async fn run(self) -> Result<(Handle<P>, Deliveries<P>)> {
        let count = self.directory.len();
        let address = self.directory.address(self.id)?;

        let (process_rx, process_tx) = internal::new();
        let (deliver_rx, deliver_tx) = internal::new();
        let shared_tx: shared::Shared<P> = shared::Shared::new(process_tx.clone());

        let listener = TcpListener::bind(address).await?;
        info!("process {} of {} listening on {}", self.id, count, address);

        let self_id = self.id;
        let timeout = self.timeout;
        let shared = shared_tx.clone();
        tokio::spawn(async move {
            loop {
                let stream = match listener.accept().await {
                | Ok((stream, _)) => stream,
                | Err(error) => {
                    warn!("failed to accept connection: {}", error);
                    continue
                }
                };
                let shared = shared.clone();
                tokio::spawn(async move {
                    match thread::peer::Peer::accept(self_id, count, stream, shared, timeout).await {
                    | Ok(peer) => peer.run().await,
                    | Err(error) => warn!("rejected connection: {}", error),
                    }
                });
            }
        });

        let retry = thread::peer::Retry {
            retries: self.retries,
            backoff: self.backoff,
        };
        for peer_id in self.directory.peers(self.id).filter(|peer_id| *peer_id > self_id) {
            let address = self.directory.address(peer_id)?;
            let shared = shared_tx.clone();
            tokio::spawn(async move {
                match thread::peer::Peer::dial(self_id, peer_id, address, shared, timeout, retry).await {
                | Ok(peer) => peer.run().await,
                | Err(error) => warn!("{}", error),
                }
            });
        }

        let machine = machine::Machine::new(self.id, count).with_priority(self.priority);
        let process = thread::process::Process::new(machine, process_rx, shared_tx.clone(), deliver_tx);
        tokio::spawn(process.run());

        let start = Instant::now();
        loop {
            let missing = {
                let shared = shared_tx.read();
                self.directory
                    .peers(self.id)
                    .find(|peer_id| !shared.is_connected(*peer_id))
            };
            match missing {
            | None => break,
            | Some(peer_id) if start.elapsed() > self.deadline => {
                return Err(Error::PeerUnreachable(peer_id))
            }
            | Some(_) => tokio::time::sleep(CONNECT_POLL).await,
            }
        }

        info!("process {} connected to {} peers", self.id, shared_tx.read().connected());
        Ok((
            Handle::new(self.id, count, process_tx, self.acquire),
            Deliveries(deliver_rx),
        ))
    }
}
