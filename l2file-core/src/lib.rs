//! l2file protocol reference implementation.
//! Host-driven: no I/O; host passes control values and bulk chunks in and receives actions.

pub mod chunk;
pub mod client;
pub mod ffi;
pub mod integrity;
pub mod listing;
pub mod protocol;
pub mod sequence;
pub mod server;
pub mod store;
pub mod wire;

pub use chunk::{ChunkError, LengthAccumulator, Progress, SentinelAccumulator};
pub use client::{ClientSession, FileError, Pending};
pub use integrity::{Digest, IntegrityError, SelfTestPayload, SelfTestReceiver, SelfTestReport};
pub use listing::ListingEntry;
pub use protocol::{Opcode, Status};
pub use sequence::{SequenceMismatch, SequenceTracker};
pub use server::{Action, FileServerCore, ServerError, ServerState};
pub use store::{FileStore, MemoryStore, StoreError};
pub use wire::{decode_reply, encode_command, Command, FrameError, StatusReply};
