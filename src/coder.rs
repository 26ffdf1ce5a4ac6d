use crate::error::PmiError;
use crate::types::{Command, ObjectId};
use std::convert::TryInto;

/// An object that can encode a particular type to, and decode it from, a
/// `Vec<u8>`. Decoding can fail, since the bytes come off the wire.
pub trait Coder {
    type Type;

    /// Consume an instance of the encodable type and convert it to bytes.
    fn encode(&self, inst: Self::Type) -> Vec<u8>;

    /// Consume a buffer of bytes and decode it to the decodable type.
    fn decode(&self, data: Vec<u8>) -> Result<Self::Type, PmiError>;
}

fn fixed<const SIZE: usize>(data: &[u8], what: &str) -> Result<[u8; SIZE], PmiError> {
    data.try_into().map_err(|_| {
        PmiError::Internal(format!(
            "{} has {} bytes, expected {}",
            what,
            data.len(),
            SIZE
        ))
    })
}

/// Encodes a [`Command`] as four little-endian `u32` fields.
#[derive(Default)]
pub struct CommandCoder;

impl Coder for CommandCoder {
    type Type = Command;

    fn encode(&self, inst: Command) -> Vec<u8> {
        inst.to_wire()
            .iter()
            .flat_map(|field| field.to_le_bytes())
            .collect()
    }

    fn decode(&self, data: Vec<u8>) -> Result<Command, PmiError> {
        let bytes: [u8; 16] = fixed(&data, "command record")?;
        let mut fields = [0u32; 4];
        for (field, chunk) in fields.iter_mut().zip(bytes.chunks_exact(4)) {
            *field = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Command::from_wire(fields)
    }
}

/// Encodes a class or method name as its UTF-8 bytes plus one NUL
/// terminator. The decoder checks the length announced by the preceding
/// Associate command.
pub struct NameCoder {
    expected_len: u32,
}

impl NameCoder {
    pub fn new(expected_len: u32) -> Self {
        Self { expected_len }
    }

    /// The byte length of the encoded name, terminator included.
    pub fn encoded_len(name: &str) -> u32 {
        name.len() as u32 + 1
    }
}

impl Coder for NameCoder {
    type Type = String;

    fn encode(&self, inst: String) -> Vec<u8> {
        let mut bytes = inst.into_bytes();
        bytes.push(0);
        bytes
    }

    fn decode(&self, mut data: Vec<u8>) -> Result<String, PmiError> {
        if data.len() != self.expected_len as usize {
            return Err(PmiError::Internal(format!(
                "received a name of {} bytes, but the command announced {}",
                data.len(),
                self.expected_len
            )));
        }
        if data.pop() != Some(0) {
            return Err(PmiError::Internal("received a name without terminator".into()));
        }
        String::from_utf8(data)
            .map_err(|e| PmiError::Internal(format!("received a name that is not UTF-8: {}", e)))
    }
}

#[derive(Default)]
pub struct ObjectIdCoder;

impl Coder for ObjectIdCoder {
    type Type = ObjectId;

    fn encode(&self, inst: ObjectId) -> Vec<u8> {
        inst.0.to_le_bytes().to_vec()
    }

    fn decode(&self, data: Vec<u8>) -> Result<ObjectId, PmiError> {
        Ok(ObjectId(u32::from_le_bytes(fixed(&data, "object id")?)))
    }
}

/// Encodes a raw status code. Unknown codes survive decoding so the
/// controller can report them.
#[derive(Default)]
pub struct StatusCoder;

impl Coder for StatusCoder {
    type Type = u16;

    fn encode(&self, inst: u16) -> Vec<u8> {
        inst.to_le_bytes().to_vec()
    }

    fn decode(&self, data: Vec<u8>) -> Result<u16, PmiError> {
        Ok(u16::from_le_bytes(fixed(&data, "status code")?))
    }
}
