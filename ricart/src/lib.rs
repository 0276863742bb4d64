//! # Summary
//!
//! Distributed mutual exclusion with the Ricart-Agrawala algorithm.
//!
//! Each process keeps a vector clock and stamps its requests with it. A
//! process enters the critical section once every other process has
//! granted its current request; conflicting requests are ordered by their
//! timestamps, with process IDs breaking ties. The protocol state machine
//! in `Machine` is free of I/O and can be driven directly; `Config::run`
//! wires it to TCP connections between the processes in a `Directory`.

#[macro_use] extern crate derivative;
#[macro_use] extern crate log;

pub mod clock;
mod config;
mod directory;
mod error;
mod handle;
mod internal;
pub mod machine;
pub mod message;
mod payload;
mod shared;
mod socket;
mod thread;

pub use crate::clock::{Causality, Clock, Timestamp};
pub use crate::config::Config;
pub use crate::directory::Directory;
pub use crate::error::{Anomaly, Error, Result};
pub use crate::handle::{Deliveries, Guard, Handle};
pub use crate::machine::{Decision, Machine, Priority, Progress, Status};
pub use crate::message::Delivery;
pub use crate::payload::Payload;
