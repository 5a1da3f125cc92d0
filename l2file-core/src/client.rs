//! Client side of the control protocol, without I/O: builds command frames with fresh
//! sequence numbers and interprets replies.

use crate::chunk::ChunkError;
use crate::protocol::{Opcode, Status};
use crate::sequence::{SequenceMismatch, SequenceTracker};
use crate::wire::{self, Command, FrameError, StatusReply};

/// A command written and not yet answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub opcode: Opcode,
    pub sequence: u8,
}

/// Per-connection client state. Callers must not issue a second command before the first
/// one's reply (or stream) has been consumed.
#[derive(Debug, Default)]
pub struct ClientSession {
    sequence: SequenceTracker,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sequence(sequence: SequenceTracker) -> Self {
        Self { sequence }
    }

    /// Build a command with the next sequence number. Returns the bytes to write and the
    /// pending request to match the reply against.
    pub fn command(&mut self, opcode: Opcode, payload: &[u8]) -> (Vec<u8>, Pending) {
        let sequence = self.sequence.issue();
        let frame = wire::encode_command(&Command::new(opcode, sequence, payload));
        (frame, Pending { opcode, sequence })
    }

    pub fn next_sequence(&self) -> u8 {
        self.sequence.peek()
    }
}

/// Decode a reply and check it belongs to `pending`.
pub fn read_reply(frame: &[u8], pending: Pending) -> Result<StatusReply, FileError> {
    let reply = wire::decode_reply(frame)?;
    SequenceTracker::check(&reply, pending.sequence)?;
    Ok(reply)
}

/// Interpret the reply to a SIZE command.
pub fn read_size_reply(frame: &[u8], pending: Pending) -> Result<u32, FileError> {
    let reply = read_reply(frame, pending)?;
    match reply.known_status() {
        Some(Status::Ok) => reply.size.ok_or(FileError::MissingSize),
        Some(Status::NotFound) => Err(FileError::NotFound),
        _ => Err(FileError::Unknown(reply.status)),
    }
}

/// Interpret a reply that carries only a status (e.g. DONE).
pub fn read_status_reply(frame: &[u8], pending: Pending) -> Result<(), FileError> {
    let reply = read_reply(frame, pending)?;
    match reply.known_status() {
        Some(Status::Ok) => Ok(()),
        Some(Status::NotFound) => Err(FileError::NotFound),
        _ => Err(FileError::Unknown(reply.status)),
    }
}

/// Failures of a file operation, split into protocol errors (abort the session) and domain
/// conditions (caller may continue).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileError {
    #[error("{0}")]
    InvalidResponse(#[from] FrameError),
    #[error("{0}")]
    WrongReply(#[from] SequenceMismatch),
    #[error("OK reply without size field")]
    MissingSize,
    #[error("not found")]
    NotFound,
    #[error("unknown status {0}")]
    Unknown(u8),
    #[error("{0}")]
    Transfer(#[from] ChunkError),
}

impl FileError {
    /// Missing resource: ordinary control flow for the caller.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FileError::NotFound)
    }

    /// Protocol desynchronisation: the session cannot be trusted any more.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            FileError::InvalidResponse(_)
                | FileError::WrongReply(_)
                | FileError::MissingSize
                | FileError::Transfer(ChunkError::Overrun { .. })
        )
    }
}
