//! # Summary
//!
//! This module abstracts over external connections to peer servers.
//!
//! Currently uses `tokio-util`'s length-delimited codec on top of `tokio`'s
//! asynchronous TCP stream, and `bincode` to encode each frame. This allows
//! us to send and receive Rust structs through a TCP connection with
//! minimal boilerplate on the sending and receiving ends.

use std::marker::PhantomData;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{tcp, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::{Error, Result};

/// External receiving channel. Expects length-delimited, bincode-encoded
/// Rust data of type `T` sent via TCP.
pub struct Rx<T> {
    frames: FramedRead<tcp::OwnedReadHalf, LengthDelimitedCodec>,
    _marker: PhantomData<fn() -> T>,
}

/// External transmission channel. Sends length-delimited, bincode-encoded
/// Rust data of type `T` over TCP.
pub struct Tx<T> {
    frames: FramedWrite<tcp::OwnedWriteHalf, LengthDelimitedCodec>,
    _marker: PhantomData<fn(T)>,
}

/// Split a `tokio::net::TcpStream` into a pair of receiving and transmitting
/// channels capable of reading and writing bincode-encoded data.
pub fn split<T, R>(stream: TcpStream) -> (Rx<R>, Tx<T>)
where T: serde::Serialize,
      R: serde::de::DeserializeOwned,
{
    let (rx, tx) = stream.into_split();
    let rx = Rx {
        frames: FramedRead::new(rx, LengthDelimitedCodec::new()),
        _marker: PhantomData,
    };
    let tx = Tx {
        frames: FramedWrite::new(tx, LengthDelimitedCodec::new()),
        _marker: PhantomData,
    };
    (rx, tx)
}

impl<T: serde::de::DeserializeOwned> Rx<T> {
    /// Reads the next frame; `None` once the peer closes the connection.
    pub async fn recv(&mut self) -> Option<Result<T>> {
        let frame = match self.frames.next().await? {
        | Ok(frame) => frame,
        | Err(error) => return Some(Err(Error::from(error))),
        };
        Some(bincode::deserialize(&frame).map_err(Error::from))
    }
}

impl<T: serde::Serialize> Tx<T> {
    /// Writes and flushes a single frame.
    pub async fn send(&mut self, item: &T) -> Result<()> {
        let bytes = bincode::serialize(item)?;
        self.frames.send(Bytes::from(bytes)).await?;
        Ok(())
    }
}
