//! Provides a message-passing communicator based on TCP sockets.
//!
//! TCP is a connection-oriented protocol, which means that a connection must
//! be established between the sending and receiving ends of the socket in
//! order to read from or write to a stream.
//!
//! Each frame on a stream is `len | tag | source | payload`, with the three
//! header words written as little-endian `usize`.

use super::comm::Communicator;
use super::util;
use crate::error::TransportError;
use figment::providers::Env;
use figment::Figment;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

const ACCEPT_POLL: Duration = Duration::from_millis(5);

type Envelope = (usize, usize, Vec<u8>);
type SendS = mpsc::Sender<(SocketAddr, Envelope)>;
type SendR = mpsc::Receiver<(SocketAddr, Envelope)>;
type RecvS = mpsc::Sender<Envelope>;
type RecvR = mpsc::Receiver<Envelope>;

/// How hard to try when a peer is not yet listening.
#[derive(Clone, Copy, Debug)]
pub struct ConnectOptions {
    pub attempts: usize,
    pub retry_interval: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            attempts: 50,
            retry_interval: Duration::from_millis(100),
        }
    }
}

fn connect(address: SocketAddr, options: ConnectOptions) -> io::Result<TcpStream> {
    let mut attempt = 1;
    loop {
        match TcpStream::connect(address) {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < options.attempts => {
                debug!(%address, attempt, "connect failed ({}), retrying", e);
                attempt += 1;
                thread::sleep(options.retry_interval);
            }
            Err(e) => return Err(e),
        }
    }
}

fn write_frame(stream: &mut TcpStream, (source, tag, message): &Envelope) -> io::Result<()> {
    util::write_usize(stream, message.len())?;
    util::write_usize(stream, *tag)?;
    util::write_usize(stream, *source)?;
    stream.write_all(message)
}

fn read_frame(stream: &mut TcpStream) -> io::Result<Envelope> {
    let len = util::read_usize(stream)?;
    let tag = util::read_usize(stream)?;
    let source = util::read_usize(stream)?;
    Ok((source, tag, util::read_bytes_vec(stream, len)?))
}

/// Maintains a cache of ingoing and outgoing TCP connections.
///
/// This object facilitates non-blocking sends and blocking receives from any
/// peer. Communicating with a remote peer only opens a new connection on the
/// first call; subsequent communications with that peer reuse the cached
/// connection. Every accepted connection is read by its own thread, which
/// forwards complete frames to a single receiving channel.
///
/// Dropping the pool flushes every queued frame to its peer, then stops
/// accepting and closes the listener.
pub struct ConnectionPool {
    alive: Arc<AtomicBool>,
    send_s: Option<SendS>,
    recv_r: RecvR,
    send_thread: Option<thread::JoinHandle<()>>,
    accept_thread: Option<thread::JoinHandle<()>>,
}

impl ConnectionPool {
    /// Creates a `ConnectionPool` from a `TcpListener`. The listener is
    /// placed in a non-blocking accept mode, so the pre-existing blocking
    /// mode is overwritten.
    pub fn from_listener(listener: TcpListener, options: ConnectOptions) -> io::Result<Self> {
        let (send_s, send_r): (SendS, SendR) = mpsc::channel();
        let (recv_s, recv_r): (RecvS, RecvR) = mpsc::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let keep_accepting = alive.clone();
        listener.set_nonblocking(true)?;

        let send_thread = thread::spawn(move || {
            let mut streams = HashMap::new();
            for (address, envelope) in send_r {
                if !streams.contains_key(&address) {
                    match connect(address, options) {
                        Ok(stream) => {
                            streams.insert(address, stream);
                        }
                        Err(e) => {
                            error!(%address, "could not connect to peer: {}", e);
                            return;
                        }
                    }
                }
                if let Some(stream) = streams.get_mut(&address) {
                    if let Err(e) = write_frame(stream, &envelope) {
                        error!(%address, "could not write to peer: {}", e);
                        return;
                    }
                }
            }
        });

        let accept_thread = thread::spawn(move || {
            let mut readers = Vec::new();
            while keep_accepting.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, address)) => match Self::spawn_reader(stream, recv_s.clone()) {
                        Ok(reader) => readers.push(reader),
                        Err(e) => error!(%address, "could not read from peer: {}", e),
                    },
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                    Err(e) => error!("could not accept a connection: {}", e),
                }
            }
            for (stream, reader) in readers {
                let _ = stream.shutdown(Shutdown::Both);
                if reader.join().is_err() {
                    error!("a connection reader panicked");
                }
            }
        });

        Ok(Self {
            alive,
            send_s: Some(send_s),
            recv_r,
            send_thread: Some(send_thread),
            accept_thread: Some(accept_thread),
        })
    }

    /// Reads frames from `stream` until the peer hangs up or the stream is
    /// shut down through the returned clone.
    fn spawn_reader(stream: TcpStream, recv_s: RecvS) -> io::Result<(TcpStream, thread::JoinHandle<()>)> {
        stream.set_nonblocking(false)?;
        let handle = stream.try_clone()?;
        let mut stream = stream;
        let reader = thread::spawn(move || loop {
            match read_frame(&mut stream) {
                Ok(envelope) => {
                    if recv_s.send(envelope).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!("connection closed: {}", e);
                    return;
                }
            }
        });
        Ok((handle, reader))
    }

    /// Initiates a blocking receive from any peer.
    pub fn recv(&mut self) -> Option<Envelope> {
        self.recv_r.recv().ok()
    }

    /// Initiates a non-blocking send to a particular peer. Returns `false`
    /// if the send thread has stopped.
    pub fn send(&mut self, peer: SocketAddr, envelope: Envelope) -> bool {
        match &self.send_s {
            Some(send_s) => send_s.send((peer, envelope)).is_ok(),
            None => false,
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        drop(self.send_s.take());
        if let Some(send_thread) = self.send_thread.take() {
            if send_thread.join().is_err() {
                error!("the send thread panicked");
            }
        }
        if let Some(accept_thread) = self.accept_thread.take() {
            if accept_thread.join().is_err() {
                error!("the accept thread panicked");
            }
        }
    }
}

/// One rank of a group whose members are reachable at known socket
/// addresses, indexed by rank.
pub struct TcpCommunicator {
    rank: usize,
    peers: Vec<SocketAddr>,
    connections: RefCell<ConnectionPool>,
    undelivered: RefCell<Vec<Envelope>>,
}

impl TcpCommunicator {
    /// Binds this rank's address and starts accepting peers.
    pub fn new(rank: usize, peers: Vec<SocketAddr>) -> Result<Self, TransportError> {
        let address = *peers.get(rank).ok_or(TransportError::InvalidRank(rank))?;
        let listener = TcpListener::bind(address)?;
        Self::from_listener(rank, listener, peers, ConnectOptions::default())
    }

    /// Uses an already bound listener for this rank. `peers[rank]` should be
    /// the listener's address.
    pub fn from_listener(
        rank: usize,
        listener: TcpListener,
        peers: Vec<SocketAddr>,
        options: ConnectOptions,
    ) -> Result<Self, TransportError> {
        if rank >= peers.len() {
            return Err(TransportError::InvalidRank(rank));
        }
        let connections = RefCell::new(ConnectionPool::from_listener(listener, options)?);
        Ok(Self {
            rank,
            peers,
            connections,
            undelivered: RefCell::new(Vec::new()),
        })
    }

    /// Builds the communicator from `PMI_RANK` and `PMI_PEERS`, the latter
    /// a comma-separated list of socket addresses ordered by rank.
    pub fn from_env() -> Result<Self, TransportError> {
        let env: TcpEnv = Figment::from(Env::prefixed("PMI_").only(&["rank", "peers"]))
            .extract()
            .map_err(|e| TransportError::Address(e.to_string()))?;
        Self::new(env.rank, parse_peers(&env.peers)?)
    }
}

#[derive(Deserialize)]
struct TcpEnv {
    rank: usize,
    peers: String,
}

/// Parses a comma-separated list of socket addresses.
pub fn parse_peers(list: &str) -> Result<Vec<SocketAddr>, TransportError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| TransportError::Address(format!("{} is not a socket address", s)))
        })
        .collect()
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, tag: usize, message: Vec<u8>) -> Result<(), TransportError> {
        let peer = *self.peers.get(rank).ok_or(TransportError::InvalidRank(rank))?;
        if self
            .connections
            .borrow_mut()
            .send(peer, (self.rank, tag, message))
        {
            Ok(())
        } else {
            Err(TransportError::Disconnected(rank))
        }
    }

    fn recv(&self, rank: usize, tag: usize) -> Result<Vec<u8>, TransportError> {
        if rank >= self.size() {
            return Err(TransportError::InvalidRank(rank));
        }
        let mut connections = self.connections.borrow_mut();
        let mut undelivered = self.undelivered.borrow_mut();
        match undelivered
            .iter()
            .position(|(source, t, _)| *source == rank && *t == tag)
        {
            Some(index) => Ok(undelivered.remove(index).2),
            None => loop {
                let (source, t, message) = connections
                    .recv()
                    .ok_or(TransportError::Disconnected(rank))?;
                if source == rank && t == tag {
                    return Ok(message);
                }
                undelivered.push((source, t, message))
            },
        }
    }
}
