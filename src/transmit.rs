//! The PMI transport primitives, layered over a [`Communicator`].
//!
//! Every broadcast here is a collective: the controller calls the
//! `broadcast_*` side and every worker the matching `receive_*` side, in the
//! same order. The status gather is the same: after a command, every rank
//! contributes one status code, and a rank reporting an error follows its
//! code with a message sent to the controller on [`STATUS_MESSAGE_TAG`].

use crate::coder::{Coder, CommandCoder, NameCoder, ObjectIdCoder, StatusCoder};
use crate::error::{PmiError, TransportError};
use crate::message::Communicator;
use crate::types::{Command, ObjectId, Status};
use std::convert::TryFrom;
use tracing::{debug, info};

/// Tag of the point-to-point message that follows a non-Ok status.
pub const STATUS_MESSAGE_TAG: usize = 99;

pub struct Transmit<C> {
    comm: C,
    root: usize,
}

impl<C: Communicator> Transmit<C> {
    pub fn new(comm: C, root: usize) -> Result<Self, PmiError> {
        if root >= comm.size() {
            return Err(PmiError::Config(format!(
                "controller rank {} is outside a communicator of size {}",
                root,
                comm.size()
            )));
        }
        Ok(Self { comm, root })
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn is_controller(&self) -> bool {
        self.comm.rank() == self.root
    }

    pub fn broadcast_command(&self, command: Command) -> Result<(), PmiError> {
        info!(rank = self.rank(), "Controller broadcasts command {}", command);
        self.comm
            .broadcast(self.root, Some(CommandCoder.encode(command)))?;
        debug!(rank = self.rank(), "Controller finished broadcast");
        Ok(())
    }

    /// Broadcasts a name. Its encoded length must already have been sent in
    /// the preceding Associate command.
    pub fn broadcast_name(&self, name: &str) -> Result<(), PmiError> {
        info!(rank = self.rank(), "Controller broadcasts name \"{}\"", name);
        let coder = NameCoder::new(NameCoder::encoded_len(name));
        self.comm
            .broadcast(self.root, Some(coder.encode(name.to_string())))?;
        Ok(())
    }

    pub fn broadcast_object_id(&self, id: ObjectId) -> Result<(), PmiError> {
        info!(rank = self.rank(), "Controller broadcasts object id {}", id);
        self.comm
            .broadcast(self.root, Some(ObjectIdCoder.encode(id)))?;
        Ok(())
    }

    /// Receives the next command as raw wire fields. Decoding is left to the
    /// caller, so an unknown opcode can be reported rather than failing the
    /// receive.
    pub fn receive_command(&self) -> Result<Result<Command, PmiError>, PmiError> {
        debug!(rank = self.rank(), "Worker waits to receive a command");
        let data = self.comm.broadcast(self.root, None)?;
        let command = CommandCoder.decode(data);
        if let Ok(command) = &command {
            info!(rank = self.rank(), "Worker received command {}", command);
        }
        Ok(command)
    }

    /// Receives a name whose encoded length was announced as `len`.
    pub fn receive_name(&self, len: u32) -> Result<Result<String, PmiError>, PmiError> {
        debug!(rank = self.rank(), "Worker waits to receive a name of length {}", len);
        let data = self.comm.broadcast(self.root, None)?;
        let name = NameCoder::new(len).decode(data);
        if let Ok(name) = &name {
            info!(rank = self.rank(), "Worker received name \"{}\"", name);
        }
        Ok(name)
    }

    pub fn receive_object_id(&self) -> Result<ObjectId, PmiError> {
        debug!(rank = self.rank(), "Worker waits to receive an object id");
        let id = ObjectIdCoder.decode(self.comm.broadcast(self.root, None)?)?;
        info!(rank = self.rank(), "Worker received object id {}", id);
        Ok(id)
    }

    /// Controller side of the status gather. Collects one code per rank and,
    /// for every rank that did not report Ok, receives its message. The
    /// error of the lowest failing rank is returned.
    pub fn gather_status(&self) -> Result<(), PmiError> {
        debug!(rank = self.rank(), "Controller gathers status of workers");
        let codes = self
            .comm
            .gather(self.root, StatusCoder.encode(Status::Ok as u16))?
            .ok_or(TransportError::Malformed("gather delivered nothing to the root".into()))?;

        let mut first = None;
        for (rank, code) in codes.into_iter().enumerate() {
            if rank == self.root {
                continue;
            }
            let code = StatusCoder.decode(code)?;
            if code == Status::Ok as u16 {
                continue;
            }
            debug!(rank = self.rank(), "Controller got status {} from worker {}", code, rank);
            let data = self.comm.recv(rank, STATUS_MESSAGE_TAG)?;
            let what = decode_message(data);
            let error = match Status::try_from(code) {
                Ok(status) => PmiError::from_status(status, what),
                Err(code) => PmiError::Internal(format!("unknown status {}: {}", code, what)),
            };
            first.get_or_insert(error);
        }
        match first {
            Some(error) => Err(error),
            None => {
                info!(rank = self.rank(), "Controller gathered all OK from workers");
                Ok(())
            }
        }
    }

    pub fn report_ok(&self) -> Result<(), PmiError> {
        debug!(rank = self.rank(), "Worker reports status OK");
        self.comm
            .gather(self.root, StatusCoder.encode(Status::Ok as u16))?;
        Ok(())
    }

    pub fn report_error(&self, status: Status, what: &str) -> Result<(), PmiError> {
        info!(rank = self.rank(), "Worker reports error status {}", status as u16);
        self.comm
            .gather(self.root, StatusCoder.encode(status as u16))?;
        info!(rank = self.rank(), "Worker sends error message \"{}\"", what);
        let mut message = what.as_bytes().to_vec();
        message.push(0);
        self.comm.send(self.root, STATUS_MESSAGE_TAG, message)?;
        Ok(())
    }

    /// Reports the outcome of a worker's local attempt.
    pub fn report(&self, outcome: &Result<(), PmiError>) -> Result<(), PmiError> {
        match outcome {
            Ok(()) => self.report_ok(),
            Err(error) => self.report_error(error.status(), &error.message()),
        }
    }
}

/// Strips the terminator from an error message.
fn decode_message(mut data: Vec<u8>) -> String {
    if data.last() == Some(&0) {
        data.pop();
    }
    String::from_utf8_lossy(&data).into_owned()
}
