#![allow(dead_code)]

use pmi::message::{Communicator, ThreadCommunicator};
use pmi::{Registry, TransportError};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Runs `rank_main` once per rank, each on its own thread, and returns the
/// results ordered by rank.
pub fn run_world<F, R>(size: usize, rank_main: F) -> Vec<R>
where
    F: Fn(ThreadCommunicator) -> R + Send + Sync + 'static,
    R: Send + 'static,
{
    init_logging();
    let rank_main = Arc::new(rank_main);
    let handles: Vec<_> = ThreadCommunicator::world(size)
        .into_iter()
        .map(|comm| {
            let rank_main = rank_main.clone();
            thread::Builder::new()
                .name(format!("rank-{}", comm.rank()))
                .spawn(move || rank_main(comm))
                .unwrap()
        })
        .collect();
    handles
        .into_iter()
        .map(|handle| handle.join().expect("a rank panicked"))
        .collect()
}

/// Something that happened to a probe instance on one rank. Probes are
/// numbered in construction order, which is the same on every rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Created(usize),
    Invoked(&'static str, usize),
    Dropped(usize),
}

pub type Log = Rc<RefCell<Vec<Event>>>;

pub struct Foo {
    pub serial: usize,
    pub calls: usize,
    log: Log,
}

impl Drop for Foo {
    fn drop(&mut self) {
        self.log.borrow_mut().push(Event::Dropped(self.serial));
    }
}

pub struct Baz {
    pub serial: usize,
    log: Log,
}

/// Registers `Foo` (methods `bar` and `qux`) and `Baz` (method `bar`), all
/// writing to `log`.
pub fn probe_registry(log: &Log) -> Registry {
    let mut registry = Registry::new();
    let serials = Rc::new(Cell::new(0));

    let (l, s) = (log.clone(), serials.clone());
    registry
        .register_class_with("Foo", move || {
            let serial = s.get();
            s.set(serial + 1);
            l.borrow_mut().push(Event::Created(serial));
            Foo {
                serial,
                calls: 0,
                log: l.clone(),
            }
        })
        .unwrap();

    let (l, s) = (log.clone(), serials);
    registry
        .register_class_with("Baz", move || {
            let serial = s.get();
            s.set(serial + 1);
            l.borrow_mut().push(Event::Created(serial));
            Baz {
                serial,
                log: l.clone(),
            }
        })
        .unwrap();

    registry
        .register_method::<Foo, _>("bar", |foo| {
            foo.calls += 1;
            foo.log.borrow_mut().push(Event::Invoked("Foo::bar", foo.serial));
        })
        .unwrap()
        .register_method::<Foo, _>("qux", |foo| {
            foo.log.borrow_mut().push(Event::Invoked("Foo::qux", foo.serial));
        })
        .unwrap()
        .register_method::<Baz, _>("bar", |baz| {
            baz.log.borrow_mut().push(Event::Invoked("Baz::bar", baz.serial));
        })
        .unwrap();
    registry
}

pub fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// Wraps a communicator and counts the broadcasts it takes part in.
pub struct CountingCommunicator<C> {
    inner: C,
    broadcasts: Rc<Cell<usize>>,
}

impl<C> CountingCommunicator<C> {
    pub fn new(inner: C) -> (Self, Rc<Cell<usize>>) {
        let broadcasts = Rc::new(Cell::new(0));
        (
            Self {
                inner,
                broadcasts: broadcasts.clone(),
            },
            broadcasts,
        )
    }
}

impl<C: Communicator> Communicator for CountingCommunicator<C> {
    fn rank(&self) -> usize {
        self.inner.rank()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn send(&self, rank: usize, tag: usize, message: Vec<u8>) -> Result<(), TransportError> {
        self.inner.send(rank, tag, message)
    }

    fn recv(&self, rank: usize, tag: usize) -> Result<Vec<u8>, TransportError> {
        self.inner.recv(rank, tag)
    }

    fn broadcast(&self, root: usize, message: Option<Vec<u8>>) -> Result<Vec<u8>, TransportError> {
        self.broadcasts.set(self.broadcasts.get() + 1);
        self.inner.broadcast(root, message)
    }

    fn gather(&self, root: usize, message: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, TransportError> {
        self.inner.gather(root, message)
    }
}
