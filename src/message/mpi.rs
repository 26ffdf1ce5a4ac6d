use super::comm;
use crate::error::TransportError;
use mpi::collective::{CommunicatorCollectives, Root};
use mpi::point_to_point::{Destination, Source};
use mpi::topology::{Communicator, SystemCommunicator};

/// A communicator over an MPI system communicator. Broadcasts use the
/// native MPI collective; point-to-point traffic uses tagged messages.
pub struct MpiCommunicator {
    comm: SystemCommunicator,
}

impl MpiCommunicator {
    pub fn new(comm: SystemCommunicator) -> Self {
        Self { comm }
    }

    pub fn barrier(&self) {
        self.comm.barrier()
    }
}

impl comm::Communicator for MpiCommunicator {
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn send(&self, rank: usize, tag: usize, message: Vec<u8>) -> Result<(), TransportError> {
        if rank >= comm::Communicator::size(self) {
            return Err(TransportError::InvalidRank(rank));
        }
        self.comm
            .process_at_rank(rank as i32)
            .send_with_tag(&message[..], tag as i32);
        Ok(())
    }

    fn recv(&self, rank: usize, tag: usize) -> Result<Vec<u8>, TransportError> {
        if rank >= comm::Communicator::size(self) {
            return Err(TransportError::InvalidRank(rank));
        }
        Ok(self
            .comm
            .process_at_rank(rank as i32)
            .receive_vec_with_tag::<u8>(tag as i32)
            .0)
    }

    fn broadcast(&self, root: usize, message: Option<Vec<u8>>) -> Result<Vec<u8>, TransportError> {
        if root >= comm::Communicator::size(self) {
            return Err(TransportError::InvalidRank(root));
        }
        let root_process = self.comm.process_at_rank(root as i32);
        let mut len = message.as_ref().map_or(0, |m| m.len()) as u64;
        root_process.broadcast_into(&mut len);
        let mut buffer = message.unwrap_or_else(|| vec![0; len as usize]);
        if buffer.len() != len as usize {
            return Err(TransportError::Malformed("broadcast length mismatch".into()));
        }
        root_process.broadcast_into(&mut buffer[..]);
        Ok(buffer)
    }
}
