//! Provides a communicator whose ranks are threads of a single process.
//!
//! Every rank owns the receiving end of one channel and a sending end into
//! every rank's channel. This is how a multi-rank program is exercised
//! without launching separate processes.

use super::comm::Communicator;
use crate::error::TransportError;
use std::cell::RefCell;

/// A message in flight: source rank, tag, payload.
type Envelope = (usize, usize, Vec<u8>);

#[cfg(feature = "crossbeam-channel")]
type EnvelopeSender = crossbeam_channel::Sender<Envelope>;

#[cfg(feature = "crossbeam-channel")]
type EnvelopeReceiver = crossbeam_channel::Receiver<Envelope>;

#[cfg(not(feature = "crossbeam-channel"))]
type EnvelopeSender = std::sync::mpsc::Sender<Envelope>;

#[cfg(not(feature = "crossbeam-channel"))]
type EnvelopeReceiver = std::sync::mpsc::Receiver<Envelope>;

/// One rank of an in-process group. Build the whole group with
/// [`ThreadCommunicator::world`] and move each endpoint onto its own thread.
pub struct ThreadCommunicator {
    rank: usize,
    senders: Vec<EnvelopeSender>,
    receiver: EnvelopeReceiver,
    undelivered: RefCell<Vec<Envelope>>,
}

impl ThreadCommunicator {
    /// Creates the endpoints of a group of `size` ranks, ordered by rank.
    pub fn world(size: usize) -> Vec<Self> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| Self::make_channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| Self {
                rank,
                senders: senders.clone(),
                receiver,
                undelivered: RefCell::new(Vec::new()),
            })
            .collect()
    }

    #[cfg(feature = "crossbeam-channel")]
    fn make_channel() -> (EnvelopeSender, EnvelopeReceiver) {
        crossbeam_channel::unbounded()
    }

    #[cfg(not(feature = "crossbeam-channel"))]
    fn make_channel() -> (EnvelopeSender, EnvelopeReceiver) {
        std::sync::mpsc::channel()
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, rank: usize, tag: usize, message: Vec<u8>) -> Result<(), TransportError> {
        self.senders
            .get(rank)
            .ok_or(TransportError::InvalidRank(rank))?
            .send((self.rank, tag, message))
            .map_err(|_| TransportError::Disconnected(rank))
    }

    fn recv(&self, rank: usize, tag: usize) -> Result<Vec<u8>, TransportError> {
        if rank >= self.size() {
            return Err(TransportError::InvalidRank(rank));
        }
        let mut undelivered = self.undelivered.borrow_mut();
        if let Some(index) = undelivered
            .iter()
            .position(|(source, t, _)| *source == rank && *t == tag)
        {
            return Ok(undelivered.remove(index).2);
        }
        loop {
            let (source, t, message) = self
                .receiver
                .recv()
                .map_err(|_| TransportError::Disconnected(rank))?;
            if source == rank && t == tag {
                return Ok(message);
            }
            undelivered.push((source, t, message))
        }
    }
}
