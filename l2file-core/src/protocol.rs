//! Control-channel vocabulary: opcodes, status codes, and link constants.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// File service advertised by the file server.
pub const FILE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0492fcec_7194_11eb_9439_0242ac130002);
/// Control characteristic inside the file service (write commands, notify replies).
pub const CONTROL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0492fcec_7194_11eb_9439_0242ac130003);

/// Advertised name of the file server.
pub const FILE_SERVER_NAME: &str = "mpy-file";
/// Advertised name of the perf (self-test) server.
pub const PERF_SERVER_NAME: &str = "mpy-l2cap-perf";

/// Bulk channel port identifier (PSM) shared by the file and perf servers.
pub const BULK_PSM: u16 = 22;
/// MTU requested for the bulk channel by the file client.
pub const FILE_MTU: usize = 512;
/// MTU used by both ends of the perf test.
pub const PERF_MTU: usize = 300;
/// Chunk size used by the perf test sender.
pub const PERF_CHUNK_SIZE: usize = 240;
/// Payload length exchanged in each direction by the perf test.
pub const PERF_TOTAL_BYTES: usize = 10 * 1024;

/// Command opcode (first byte of every command frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// Server sends a file's contents to the client over the bulk channel.
    Send = 0,
    /// Client sends a file to the server. Reserved; answered with `NotImplemented`.
    Recv = 1,
    /// Server streams a directory listing over the bulk channel.
    List = 2,
    /// Server replies with a file's size on the control channel.
    Size = 3,
    /// End of session.
    Done = 4,
}

impl Opcode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Opcode::Send),
            1 => Ok(Opcode::Recv),
            2 => Ok(Opcode::List),
            3 => Ok(Opcode::Size),
            4 => Ok(Opcode::Done),
            other => Err(other),
        }
    }
}

/// Status byte carried by a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    NotImplemented = 1,
    NotFound = 2,
}

/// Raw status sent for failures that are neither "not found" nor "not implemented".
/// Clients surface it as an unknown status.
pub const STATUS_FAILED: u8 = 0xff;

impl Status {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Status::Ok),
            1 => Some(Status::NotImplemented),
            2 => Some(Status::NotFound),
            _ => None,
        }
    }
}
