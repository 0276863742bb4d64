//! # Summary
//!
//! This module contains the long-running tasks behind a mutual exclusion
//! engine.
//!
//! The `process` task owns the Ricart-Agrawala state machine and is the only
//! place its state is touched. One `peer` task per connection forwards
//! traffic between the network and the process task.

/// Peer server communication.
pub(crate) mod peer;

/// Ricart-Agrawala process.
pub(crate) mod process;
