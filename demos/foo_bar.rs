//! Mirrors a few `Foo` instances across a group of ranks.
//!
//! With `PMI_RANK` and `PMI_PEERS` set, each process is one rank of a TCP
//! group, e.g. in two shells:
//!
//! ```text
//! PMI_RANK=0 PMI_PEERS=127.0.0.1:7700,127.0.0.1:7701 cargo run --example foo_bar
//! PMI_RANK=1 PMI_PEERS=127.0.0.1:7700,127.0.0.1:7701 cargo run --example foo_bar
//! ```
//!
//! Otherwise four ranks run as threads of this process.

use pmi::message::{Communicator, TcpCommunicator, ThreadCommunicator};
use pmi::{Pmi, PmiConfig, Registry};
use std::error::Error;
use std::thread;
use tracing::info;

#[derive(Default)]
struct Foo {
    calls: usize,
}

impl Foo {
    fn bar(&mut self) {
        self.calls += 1;
    }
}

fn registry() -> Result<Registry, Box<dyn Error>> {
    let mut registry = Registry::new();
    registry
        .register_class::<Foo>("Foo")?
        .register_method::<Foo, _>("bar", Foo::bar)?
        .register_method::<Foo, _>("report", |foo| info!("bar was called {} times", foo.calls))?;
    Ok(registry)
}

fn run<C: Communicator>(comm: C) -> Result<(), Box<dyn Error>> {
    let mut pmi = Pmi::new(comm, PmiConfig::from_env()?, registry()?)?;

    if pmi.is_controller() {
        let foos = (0..3)
            .map(|_| pmi.create::<Foo>())
            .collect::<Result<Vec<_>, _>>()?;
        let mut foos = foos.into_iter();
        if let (Some(first), Some(second), Some(third)) = (foos.next(), foos.next(), foos.next()) {
            pmi.destroy(second)?;
            let again = pmi.create::<Foo>()?;
            info!("the new instance took object id {}", again.id());

            pmi.invoke(&third, "bar")?;
            pmi.invoke(&third, "report")?;
            for foo in [first, again, third] {
                pmi.destroy(foo)?;
            }
        }
        pmi.end_workers()?;
    } else {
        pmi.worker_loop()?;
    }
    pmi.dump();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if std::env::var_os("PMI_PEERS").is_some() {
        return run(TcpCommunicator::from_env()?);
    }

    let handles: Vec<_> = ThreadCommunicator::world(4)
        .into_iter()
        .map(|comm| thread::spawn(move || run(comm).map_err(|e| e.to_string())))
        .collect();
    for handle in handles {
        handle.join().map_err(|_| "a rank panicked")??;
    }
    Ok(())
}
