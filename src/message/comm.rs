use super::util;
use crate::error::TransportError;

/// Tag used by the default [`Communicator::broadcast`] implementation.
pub const BROADCAST_TAG: usize = 1;

/// Tag used by the default [`Communicator::gather`] implementation.
pub const GATHER_TAG: usize = 2;

/// A group of ranks that can exchange byte messages.
///
/// Implementors supply tagged point-to-point `send` and `recv`. Messages
/// sent from one rank to another on the same tag must be received in the
/// order they were sent. The trait then provides a binomial-tree
/// `broadcast` and a root-collected `gather`; transports with native
/// collectives can override these.
///
/// Collective operations must be called by every rank, in the same order,
/// with the same root. Otherwise the group stalls.
pub trait Communicator {
    /// The rank of this process within the group.
    fn rank(&self) -> usize;

    /// The number of ranks in the group.
    fn size(&self) -> usize;

    /// Sends a message to the given rank. The call may return before the
    /// message is delivered.
    fn send(&self, rank: usize, tag: usize, message: Vec<u8>) -> Result<(), TransportError>;

    /// Blocks until a message with the given tag arrives from the given rank.
    fn recv(&self, rank: usize, tag: usize) -> Result<Vec<u8>, TransportError>;

    /// Broadcasts a message from `root` to every rank. The root passes
    /// `Some(message)`, every other rank passes `None`, and all ranks return
    /// the root's message.
    ///
    /// The message travels along a binomial tree: in round `k`, each rank
    /// that already holds it forwards it to the rank `2^k` places further
    /// along (counting from the root), so the broadcast completes in
    /// `ceil(log2(size))` rounds.
    fn broadcast(&self, root: usize, message: Option<Vec<u8>>) -> Result<Vec<u8>, TransportError> {
        let size = self.size();
        if root >= size {
            return Err(TransportError::InvalidRank(root));
        }
        let relative = (self.rank() + size - root) % size;
        let absolute = |r: usize| (r + root) % size;
        let mut data = if relative == 0 {
            Some(message.ok_or(TransportError::Malformed(
                "the broadcast root has no message".into(),
            ))?)
        } else {
            None
        };

        for round in 0..util::ceil_log2(size) {
            let span = 1 << round;
            if relative < span {
                let target = relative + span;
                if target < size {
                    if let Some(data) = &data {
                        self.send(absolute(target), BROADCAST_TAG, data.clone())?;
                    }
                }
            } else if relative < 2 * span {
                data = Some(self.recv(absolute(relative - span), BROADCAST_TAG)?);
            }
        }
        data.ok_or(TransportError::Malformed("broadcast delivered no message".into()))
    }

    /// Collects one message from every rank at `root`. The root gets every
    /// contribution in rank order, its own included. Every other rank gets
    /// `None`.
    fn gather(&self, root: usize, message: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, TransportError> {
        let size = self.size();
        if root >= size {
            return Err(TransportError::InvalidRank(root));
        }
        if self.rank() != root {
            self.send(root, GATHER_TAG, message)?;
            return Ok(None);
        }
        let mut own = Some(message);
        let mut all = Vec::with_capacity(size);
        for rank in 0..size {
            if rank == root {
                all.push(own.take().unwrap_or_default());
            } else {
                all.push(self.recv(rank, GATHER_TAG)?);
            }
        }
        Ok(Some(all))
    }
}
