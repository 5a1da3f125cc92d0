//! Framing: fixed-layout command and status frames on the control channel.
//!
//! Command: `[opcode:u8][sequence:u8][payload...]`. The attribute write itself delimits the
//! value, so the payload has no length prefix.
//! Reply: `[opcode:u8][sequence:u8][status:u8]` optionally followed by `[size:u32 LE]`.

use crate::protocol::{Opcode, Status};

const COMMAND_HEADER_LEN: usize = 2;
/// Reply without trailing payload.
pub const SHORT_REPLY_LEN: usize = 3;
/// Reply carrying a little-endian `u32` size.
pub const SIZED_REPLY_LEN: usize = 7;

/// A command as written by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    pub sequence: u8,
    pub payload: Vec<u8>,
}

impl Command {
    pub fn new(opcode: Opcode, sequence: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            sequence,
            payload: payload.into(),
        }
    }

    /// Command whose payload is a UTF-8 path.
    pub fn with_path(opcode: Opcode, sequence: u8, path: &str) -> Self {
        Self::new(opcode, sequence, path.as_bytes())
    }
}

/// A status reply. `opcode` echoes the command that produced it; it is not an opcode in its
/// own right and is not validated against [`Opcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReply {
    pub opcode: u8,
    pub sequence: u8,
    pub status: u8,
    pub size: Option<u32>,
}

impl StatusReply {
    pub fn new(opcode: u8, sequence: u8, status: u8) -> Self {
        Self {
            opcode,
            sequence,
            status,
            size: None,
        }
    }

    /// `OK` reply to a SIZE command.
    pub fn sized(opcode: u8, sequence: u8, size: u32) -> Self {
        Self {
            opcode,
            sequence,
            status: Status::Ok.as_u8(),
            size: Some(size),
        }
    }

    /// Reply to `cmd` with the given status and no trailing payload.
    pub fn for_command(cmd: &Command, status: Status) -> Self {
        Self::new(cmd.opcode.as_u8(), cmd.sequence, status.as_u8())
    }

    /// Decoded status, or `None` when the byte is outside the known status space.
    pub fn known_status(&self) -> Option<Status> {
        Status::from_u8(self.status)
    }
}

/// Encode a command into the bytes written to the control attribute.
pub fn encode_command(cmd: &Command) -> Vec<u8> {
    let mut out = Vec::with_capacity(COMMAND_HEADER_LEN + cmd.payload.len());
    out.push(cmd.opcode.as_u8());
    out.push(cmd.sequence);
    out.extend_from_slice(&cmd.payload);
    out
}

/// Decode a command received on the control attribute (server side).
pub fn decode_command(bytes: &[u8]) -> Result<Command, FrameError> {
    if bytes.len() < COMMAND_HEADER_LEN {
        return Err(FrameError::ShortCommand(bytes.len()));
    }
    let (raw, sequence) = (bytes[0], bytes[1]);
    let opcode = Opcode::try_from(raw).map_err(|opcode| FrameError::UnknownOpcode {
        opcode,
        sequence,
    })?;
    Ok(Command {
        opcode,
        sequence,
        payload: bytes[COMMAND_HEADER_LEN..].to_vec(),
    })
}

/// Encode a reply into the bytes notified on the control attribute (server side).
pub fn encode_reply(reply: &StatusReply) -> Vec<u8> {
    let mut out = Vec::with_capacity(SIZED_REPLY_LEN);
    out.push(reply.opcode);
    out.push(reply.sequence);
    out.push(reply.status);
    if let Some(size) = reply.size {
        out.extend_from_slice(&size.to_le_bytes());
    }
    out
}

/// Decode a reply. Only the 3- and 7-byte forms are accepted.
pub fn decode_reply(bytes: &[u8]) -> Result<StatusReply, FrameError> {
    let size = match bytes.len() {
        SHORT_REPLY_LEN => None,
        SIZED_REPLY_LEN => Some(u32::from_le_bytes([
            bytes[3], bytes[4], bytes[5], bytes[6],
        ])),
        n => return Err(FrameError::BadReplyLength(n)),
    };
    Ok(StatusReply {
        opcode: bytes[0],
        sequence: bytes[1],
        status: bytes[2],
        size,
    })
}

/// Error decoding a control-channel frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid response: reply must be 3 or 7 bytes, got {0}")]
    BadReplyLength(usize),
    #[error("command frame too short ({0} bytes)")]
    ShortCommand(usize),
    #[error("unknown opcode {opcode} (seq {sequence})")]
    UnknownOpcode { opcode: u8, sequence: u8 },
}
