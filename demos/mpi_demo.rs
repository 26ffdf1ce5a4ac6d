#[cfg(feature = "mpi")]
fn main() {
    use pmi::message::MpiCommunicator;
    use pmi::{Pmi, PmiConfig, Registry};

    #[derive(Default)]
    struct Counter {
        count: u64,
    }

    let universe = match mpi::initialize() {
        Some(universe) => universe,
        None => {
            eprintln!("MPI was already initialized");
            return;
        }
    };
    let comm = MpiCommunicator::new(universe.world());

    let mut registry = Registry::new();
    let registered = registry
        .register_class::<Counter>("Counter")
        .and_then(|r| r.register_method::<Counter, _>("increment", |c| c.count += 1));
    if let Err(e) = registered {
        eprintln!("{}", e);
        return;
    }

    let mut pmi = match Pmi::new(comm, PmiConfig::default(), registry) {
        Ok(pmi) => pmi,
        Err(e) => {
            eprintln!("{}", e);
            return;
        }
    };

    let result = if pmi.is_controller() {
        (|| {
            let counter = pmi.create::<Counter>()?;
            for _ in 0..10 {
                pmi.invoke(&counter, "increment")?;
            }
            println!("controller counted to {}", pmi.local(&counter)?.count);
            pmi.destroy(counter)?;
            pmi.end_workers()
        })()
    } else {
        pmi.worker_loop()
    };
    if let Err(e) = result {
        eprintln!("rank {}: {}", pmi.rank(), e);
    }
    pmi.dump();
}

#[cfg(not(feature = "mpi"))]
fn main() {
    println!("mpi feature is disabled");
}
