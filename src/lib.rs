//! Parallel Method Invocation: mirrored object calls across SPMD ranks.
//!
//! One rank, the controller, drives identical computation on every other
//! rank, the workers. Instead of shipping arguments and results, PMI only
//! agrees on *which* class is instantiated, *which* method runs and *which*
//! instance it runs on. Each rank holds its own locally constructed mirror
//! of every object and executes each call against purely local data.
//!
//! ```no_run
//! use pmi::message::TcpCommunicator;
//! use pmi::{Pmi, PmiConfig, Registry};
//!
//! #[derive(Default)]
//! struct Foo {
//!     calls: usize,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = Registry::new();
//!     registry
//!         .register_class::<Foo>("Foo")?
//!         .register_method::<Foo, _>("bar", |foo| foo.calls += 1)?;
//!
//!     let comm = TcpCommunicator::from_env()?;
//!     let mut pmi = Pmi::new(comm, PmiConfig::from_env()?, registry)?;
//!     if pmi.is_controller() {
//!         let foo = pmi.create::<Foo>()?;
//!         pmi.invoke(&foo, "bar")?;
//!         pmi.destroy(foo)?;
//!         pmi.end_workers()?;
//!     } else {
//!         pmi.worker_loop()?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod coder;
pub mod config;
pub mod context;
pub mod error;
pub mod ids;
pub mod message;
pub mod object_table;
pub mod parallel;
pub mod registry;
pub mod transmit;
pub mod types;

pub use config::PmiConfig;
pub use context::{Pmi, Snapshot, WorkerState};
pub use error::{PmiError, TransportError};
pub use parallel::ParallelObject;
pub use registry::Registry;
pub use types::{ClassId, Command, MethodId, ObjectId, Opcode, Role, Status};
