use super::comm::Communicator;
use crate::error::TransportError;

/// A communicator holding a single rank. Broadcasts and gathers complete
/// locally; point-to-point messaging is an error since there is no peer.
#[derive(Default)]
pub struct NullCommunicator {}

impl NullCommunicator {
    pub fn new() -> Self {
        Self {}
    }
}

impl Communicator for NullCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, _rank: usize, _tag: usize, _message: Vec<u8>) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("cannot send on a null communicator"))
    }

    fn recv(&self, _rank: usize, _tag: usize) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Unsupported("cannot recv on a null communicator"))
    }
}
