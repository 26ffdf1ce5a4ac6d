//! Identities, commands and status codes shared by every rank.

use crate::error::PmiError;
use std::convert::TryFrom;
use std::fmt;

/// Value carried by a command field that has no meaning for its opcode.
pub const NOT_DEFINED: u32 = u32::MAX;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identity of a registered class, agreed on by all ranks at association.
    ClassId
);
id_type!(
    /// Identity of a registered method, agreed on by all ranks at association.
    MethodId
);
id_type!(
    /// Slot of a live mirrored instance in every rank's object table.
    ObjectId
);

/// Command codes, as they appear in the first field of a command record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    End = 0,
    AssociateClass = 1,
    AssociateMethod = 2,
    Create = 3,
    Invoke = 4,
    Destroy = 5,
}

impl TryFrom<u32> for Opcode {
    type Error = u32;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Opcode::End),
            1 => Ok(Opcode::AssociateClass),
            2 => Ok(Opcode::AssociateMethod),
            3 => Ok(Opcode::Create),
            4 => Ok(Opcode::Invoke),
            5 => Ok(Opcode::Destroy),
            other => Err(other),
        }
    }
}

/// A decoded command record.
///
/// On the wire every command is `[opcode, classId, methodId, objectId]`. The
/// Associate variants reuse the `objectId` slot for the byte length of the
/// name broadcast that follows them (terminator included); `name_len` is
/// that value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    End,
    AssociateClass {
        class_id: ClassId,
        name_len: u32,
    },
    AssociateMethod {
        method_id: MethodId,
        name_len: u32,
    },
    Create {
        class_id: ClassId,
        object_id: ObjectId,
    },
    Invoke {
        class_id: ClassId,
        method_id: MethodId,
        object_id: ObjectId,
    },
    Destroy {
        class_id: ClassId,
        object_id: ObjectId,
    },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::End => Opcode::End,
            Command::AssociateClass { .. } => Opcode::AssociateClass,
            Command::AssociateMethod { .. } => Opcode::AssociateMethod,
            Command::Create { .. } => Opcode::Create,
            Command::Invoke { .. } => Opcode::Invoke,
            Command::Destroy { .. } => Opcode::Destroy,
        }
    }

    /// The four wire fields of this command.
    pub fn to_wire(&self) -> [u32; 4] {
        let op = self.opcode() as u32;
        match *self {
            Command::End => [op, NOT_DEFINED, NOT_DEFINED, NOT_DEFINED],
            Command::AssociateClass { class_id, name_len } => {
                [op, class_id.0, NOT_DEFINED, name_len]
            }
            Command::AssociateMethod {
                method_id,
                name_len,
            } => [op, NOT_DEFINED, method_id.0, name_len],
            Command::Create {
                class_id,
                object_id,
            } => [op, class_id.0, NOT_DEFINED, object_id.0],
            Command::Invoke {
                class_id,
                method_id,
                object_id,
            } => [op, class_id.0, method_id.0, object_id.0],
            Command::Destroy {
                class_id,
                object_id,
            } => [op, class_id.0, NOT_DEFINED, object_id.0],
        }
    }

    /// Interprets four wire fields. An unknown opcode is an internal error:
    /// only a controller running this same code issues commands.
    pub fn from_wire(fields: [u32; 4]) -> Result<Self, PmiError> {
        let [op, class, method, object] = fields;
        let opcode = Opcode::try_from(op)
            .map_err(|code| PmiError::Internal(format!("unknown command code {}", code)))?;
        Ok(match opcode {
            Opcode::End => Command::End,
            Opcode::AssociateClass => Command::AssociateClass {
                class_id: ClassId(class),
                name_len: object,
            },
            Opcode::AssociateMethod => Command::AssociateMethod {
                method_id: MethodId(method),
                name_len: object,
            },
            Opcode::Create => Command::Create {
                class_id: ClassId(class),
                object_id: ObjectId(object),
            },
            Opcode::Invoke => Command::Invoke {
                class_id: ClassId(class),
                method_id: MethodId(method),
                object_id: ObjectId(object),
            },
            Opcode::Destroy => Command::Destroy {
                class_id: ClassId(class),
                object_id: ObjectId(object),
            },
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.to_wire();
        write!(f, "({}, {}, {}, {})", a, b, c, d)
    }
}

/// Per-rank outcome of a command, collected by the status gather.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Ok = 0,
    UserError = 1,
    InternalError = 2,
    OtherError = 3,
}

impl TryFrom<u16> for Status {
    type Error = u16;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Status::Ok),
            1 => Ok(Status::UserError),
            2 => Ok(Status::InternalError),
            3 => Ok(Status::OtherError),
            other => Err(other),
        }
    }
}

/// The role a rank plays, fixed by its rank relative to the controller rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Controller,
    Worker(usize),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Controller => write!(f, "Controller"),
            Role::Worker(rank) => write!(f, "Worker {}", rank),
        }
    }
}
