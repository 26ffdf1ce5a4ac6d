//! A minimal distributed message-passing API.
//!
//! This module exports a minimal message-passing API, which is encapsulated
//! by the [`Communicator`] trait. Implementors only need to write tagged
//! `send` and `recv` operations for a given transport layer (a pure-Rust TCP
//! example is included in [`TcpCommunicator`]). The trait then provides
//! default implementations for broadcast and gather.

mod comm;
#[cfg(feature = "mpi")]
mod mpi;
mod null;
mod tcp;
mod thread;
pub mod util;

pub use comm::{Communicator, BROADCAST_TAG, GATHER_TAG};
pub use null::NullCommunicator;
pub use tcp::{parse_peers, ConnectOptions, TcpCommunicator};
pub use thread::ThreadCommunicator;
#[cfg(feature = "mpi")]
pub use self::mpi::MpiCommunicator;
