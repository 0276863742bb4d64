//! # Summary
//!
//! Static membership table mapping process IDs to the socket address their
//! peer listener is bound to. IDs are dense: a table of `N` entries holds
//! exactly the IDs `0..N`. Lookups never block; an unknown ID is an error.

use std::convert::TryFrom;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bimap::BiMap;
use serde_derive::Deserialize;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default)]
pub struct Directory(BiMap<usize, SocketAddr>);

/// One row of a JSON membership file.
#[derive(Deserialize)]
struct Entry {
    id: usize,
    address: SocketAddr,
}

impl Directory {
    /// `count` processes on the loopback interface, process `i` at `base + i`.
    ///
    /// Fails if the last port does not fit in a `u16`.
    pub fn localhost(count: usize, base: u16) -> Result<Self> {
        let addresses = (0..count)
            .map(|id| {
                u16::try_from(id)
                    .ok()
                    .and_then(|offset| base.checked_add(offset))
                    .map(|port| SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)))
                    .ok_or_else(|| Error::Membership(format!("no port for process {} above {}", id, base)))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_addresses(addresses)
    }

    /// Assigns IDs in iteration order.
    pub fn from_addresses<I>(addresses: I) -> Result<Self>
        where I: IntoIterator<Item = SocketAddr>
    {
        let mut table = BiMap::new();
        for (id, address) in addresses.into_iter().enumerate() {
            table.insert_no_overwrite(id, address)
                .map_err(|(_, address)| Error::Membership(format!("{} listed twice", address)))?;
        }
        Ok(Directory(table))
    }

    /// Parses a JSON array of `{"id": .., "address": ..}` objects.
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let entries: Vec<Entry> = serde_json::from_reader(reader)?;
        let mut table = BiMap::new();
        for entry in entries {
            table.insert_no_overwrite(entry.id, entry.address)
                .map_err(|(id, address)| Error::Membership(format!("{} or {} listed twice", id, address)))?;
        }
        for id in 0..table.len() {
            if !table.contains_left(&id) {
                return Err(Error::Membership(format!("missing process {}", id)))
            }
        }
        Ok(Directory(table))
    }

    pub fn from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Number of processes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn address(&self, id: usize) -> Result<SocketAddr> {
        self.0.get_by_left(&id)
            .copied()
            .ok_or(Error::UnknownProcess(id))
    }

    /// Every process except `id`, in ascending order.
    pub fn peers(&self, id: usize) -> impl Iterator<Item = usize> {
        (0..self.len()).filter(move |peer_id| *peer_id != id)
    }
}
