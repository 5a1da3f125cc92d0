//! Host-driven command dispatcher: the host passes each control-channel value in and performs
//! the returned actions (notify a reply, stream over the bulk channel, end the session).

use crate::listing::{self, ListingEntry};
use crate::protocol::{Opcode, Status, STATUS_FAILED};
use crate::store::{self, FileStore, StoreError};
use crate::wire::{self, Command, FrameError, StatusReply};

/// Dispatcher state. A new command is accepted only in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    /// Response to `(opcode, sequence)` is being written by the host.
    Dispatching { opcode: Opcode, sequence: u8 },
}

/// Action for the host to perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Notify this reply on the control attribute.
    Notify(Vec<u8>),
    /// Send these bytes over the bulk channel, then flush.
    Stream(Vec<u8>),
    /// Read `len` bytes of the file at `path` from the store in chunk-sized pieces, send
    /// each over the bulk channel, then flush. If the file cannot be read to `len`, the
    /// host must end the session so the client sees a disconnect instead of waiting.
    StreamFile { path: String, len: u64 },
    /// Close the connection once the preceding actions are done.
    EndSession,
}

/// Command dispatcher for one connection.
pub struct FileServerCore {
    state: ServerState,
    handled: u64,
}

impl FileServerCore {
    pub fn new() -> Self {
        Self {
            state: ServerState::Idle,
            handled: 0,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Commands answered so far on this connection.
    pub fn handled(&self) -> u64 {
        self.handled
    }

    /// Process one command frame.
    ///
    /// On success the dispatcher enters `Dispatching` until the host calls
    /// [`on_response_complete`](Self::on_response_complete). Errors mean no response can be
    /// produced; the dispatcher stays `Idle`. See [`ServerError::ends_session`] for the
    /// errors the host cannot simply drop.
    pub fn on_command<S: FileStore + ?Sized>(
        &mut self,
        frame: &[u8],
        store: &S,
    ) -> Result<Vec<Action>, ServerError> {
        if let ServerState::Dispatching { opcode, sequence } = self.state {
            return Err(ServerError::Busy { opcode, sequence });
        }
        let cmd = match wire::decode_command(frame) {
            Ok(cmd) => cmd,
            Err(FrameError::UnknownOpcode { opcode, sequence }) => {
                let reply = StatusReply::new(opcode, sequence, Status::NotImplemented.as_u8());
                self.handled += 1;
                return Ok(vec![Action::Notify(wire::encode_reply(&reply))]);
            }
            Err(e) => return Err(ServerError::Frame(e)),
        };

        let actions = match cmd.opcode {
            Opcode::Size => vec![Action::Notify(wire::encode_reply(&size_reply(&cmd, store)))],
            Opcode::Send => {
                let stream = store::validate_path(&cmd.payload).and_then(|path| {
                    let len = store.size(path)?;
                    Ok(Action::StreamFile {
                        path: path.to_string(),
                        len,
                    })
                });
                vec![stream.map_err(|source| ServerError::Store {
                    opcode: cmd.opcode,
                    sequence: cmd.sequence,
                    source,
                })?]
            }
            Opcode::List => vec![Action::Stream(listing_block(&cmd, store))],
            Opcode::Recv => vec![Action::Notify(wire::encode_reply(
                &StatusReply::for_command(&cmd, Status::NotImplemented),
            ))],
            Opcode::Done => vec![
                Action::Notify(wire::encode_reply(&StatusReply::for_command(
                    &cmd,
                    Status::Ok,
                ))),
                Action::EndSession,
            ],
        };
        self.state = ServerState::Dispatching {
            opcode: cmd.opcode,
            sequence: cmd.sequence,
        };
        self.handled += 1;
        Ok(actions)
    }

    /// Host finished writing the reply or the bulk stream.
    pub fn on_response_complete(&mut self) {
        self.state = ServerState::Idle;
    }
}

impl Default for FileServerCore {
    fn default() -> Self {
        Self::new()
    }
}

fn size_reply<S: FileStore + ?Sized>(cmd: &Command, store: &S) -> StatusReply {
    let seq = cmd.sequence;
    let op = cmd.opcode.as_u8();
    match store::validate_path(&cmd.payload).and_then(|p| store.size(p)) {
        Ok(size) => match u32::try_from(size) {
            Ok(size) => StatusReply::sized(op, seq, size),
            Err(_) => StatusReply::new(op, seq, STATUS_FAILED),
        },
        Err(StoreError::NotFound(_)) | Err(StoreError::InvalidPath(_)) => {
            StatusReply::for_command(cmd, Status::NotFound)
        }
        Err(_) => StatusReply::new(op, seq, STATUS_FAILED),
    }
}

/// A missing or unreadable directory streams an empty listing so the client still sees a
/// terminator.
fn listing_block<S: FileStore + ?Sized>(cmd: &Command, store: &S) -> Vec<u8> {
    let entries: Vec<ListingEntry> = store::validate_path(&cmd.payload)
        .and_then(|p| store.list(p))
        .map(|entries| {
            entries
                .into_iter()
                .filter(ListingEntry::is_encodable)
                .collect()
        })
        .unwrap_or_default();
    listing::encode_listing(&entries)
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("command received while answering opcode {opcode:?} seq {sequence}")]
    Busy { opcode: Opcode, sequence: u8 },
    #[error("undecodable command: {0}")]
    Frame(FrameError),
    #[error("{opcode:?} seq {sequence}: {source}")]
    Store {
        opcode: Opcode,
        sequence: u8,
        #[source]
        source: StoreError,
    },
}

impl ServerError {
    /// SEND has no reply, so a client that already has its size is waiting on the bulk
    /// channel. Only closing the session releases it.
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            ServerError::Store {
                opcode: Opcode::Send,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::wire::{decode_reply, encode_command};

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_file("/tmp/demo/a.txt", vec![b'a'; 10])
            .with_file("/tmp/demo/b.bin", vec![0u8; 2048])
            .with_file("/tmp/demo/file.txt", vec![b'x'; 1234])
    }

    fn frame(op: Opcode, seq: u8, path: &str) -> Vec<u8> {
        encode_command(&Command::with_path(op, seq, path))
    }

    fn only_notify(actions: Vec<Action>) -> StatusReply {
        match actions.as_slice() {
            [Action::Notify(bytes)] => decode_reply(bytes).unwrap(),
            other => panic!("expected single Notify, got {:?}", other),
        }
    }

    #[test]
    fn size_found() {
        let mut core = FileServerCore::new();
        let actions = core
            .on_command(&frame(Opcode::Size, 1, "/tmp/demo/file.txt"), &store())
            .unwrap();
        let reply = only_notify(actions);
        assert_eq!(reply.opcode, Opcode::Size.as_u8());
        assert_eq!(reply.sequence, 1);
        assert_eq!(reply.known_status(), Some(Status::Ok));
        assert_eq!(reply.size, Some(1234));
    }

    #[test]
    fn size_not_found_has_no_size() {
        let mut core = FileServerCore::new();
        let actions = core
            .on_command(&frame(Opcode::Size, 2, "/tmp/demo/notfound.bin"), &store())
            .unwrap();
        let reply = only_notify(actions);
        assert_eq!(reply.known_status(), Some(Status::NotFound));
        assert_eq!(reply.size, None);
    }

    #[test]
    fn size_invalid_path_is_not_found() {
        let mut core = FileServerCore::new();
        let actions = core
            .on_command(&frame(Opcode::Size, 3, "/tmp/../etc"), &store())
            .unwrap();
        assert_eq!(only_notify(actions).known_status(), Some(Status::NotFound));
    }

    #[test]
    fn send_streams_file_without_reply() {
        let mut core = FileServerCore::new();
        let actions = core
            .on_command(&frame(Opcode::Send, 4, "/tmp/demo/a.txt"), &store())
            .unwrap();
        assert_eq!(
            actions,
            vec![Action::StreamFile {
                path: "/tmp/demo/a.txt".into(),
                len: 10
            }]
        );
    }

    #[test]
    fn send_missing_file_ends_session() {
        let mut core = FileServerCore::new();
        let err = core
            .on_command(&frame(Opcode::Send, 5, "/tmp/demo/none"), &store())
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Store {
                source: StoreError::NotFound(_),
                ..
            }
        ));
        assert!(err.ends_session());
        assert_eq!(core.state(), ServerState::Idle);
    }

    #[test]
    fn unanswerable_frames_do_not_end_session() {
        let mut core = FileServerCore::new();
        let err = core.on_command(&[3], &store()).unwrap_err();
        assert!(!err.ends_session());
        core.on_command(&frame(Opcode::Size, 1, "/tmp/demo/a.txt"), &store())
            .unwrap();
        let busy = core
            .on_command(&frame(Opcode::Send, 2, "/tmp/demo/a.txt"), &store())
            .unwrap_err();
        assert!(!busy.ends_session());
    }

    #[test]
    fn list_streams_sentinel_terminated_block() {
        let mut core = FileServerCore::new();
        let mut s = MemoryStore::new();
        s.insert("/d/a.txt", vec![0u8; 10]);
        s.insert("/d/b.bin", vec![0u8; 2048]);
        let actions = core.on_command(&frame(Opcode::List, 6, "/d"), &s).unwrap();
        assert_eq!(
            actions,
            vec![Action::Stream(b"10:a.txt\n2048:b.bin\n\n".to_vec())]
        );
    }

    #[test]
    fn list_missing_directory_streams_empty_listing() {
        let mut core = FileServerCore::new();
        let actions = core
            .on_command(&frame(Opcode::List, 7, "/nowhere"), &store())
            .unwrap();
        assert_eq!(actions, vec![Action::Stream(b"\n".to_vec())]);
    }

    #[test]
    fn list_skips_unencodable_names() {
        let mut core = FileServerCore::new();
        let s = MemoryStore::new()
            .with_file("/d/ok", vec![1])
            .with_file("/d/bad:name", vec![1, 2]);
        let actions = core.on_command(&frame(Opcode::List, 8, "/d"), &s).unwrap();
        assert_eq!(actions, vec![Action::Stream(b"1:ok\n\n".to_vec())]);
    }

    #[test]
    fn recv_not_implemented() {
        let mut core = FileServerCore::new();
        let actions = core
            .on_command(&frame(Opcode::Recv, 9, "/tmp/up.bin"), &store())
            .unwrap();
        let reply = only_notify(actions);
        assert_eq!(reply.opcode, Opcode::Recv.as_u8());
        assert_eq!(reply.known_status(), Some(Status::NotImplemented));
    }

    #[test]
    fn unknown_opcode_not_implemented() {
        let mut core = FileServerCore::new();
        let actions = core.on_command(&[0x7f, 10, b'x'], &store()).unwrap();
        let reply = only_notify(actions);
        assert_eq!(reply.opcode, 0x7f);
        assert_eq!(reply.sequence, 10);
        assert_eq!(reply.known_status(), Some(Status::NotImplemented));
        assert_eq!(core.state(), ServerState::Idle);
    }

    #[test]
    fn done_replies_then_ends_session() {
        let mut core = FileServerCore::new();
        let actions = core
            .on_command(&encode_command(&Command::new(Opcode::Done, 11, Vec::new())), &store())
            .unwrap();
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], Action::Notify(_)));
        assert_eq!(actions[1], Action::EndSession);
    }

    #[test]
    fn one_command_in_flight() {
        let mut core = FileServerCore::new();
        core.on_command(&frame(Opcode::Size, 1, "/tmp/demo/a.txt"), &store())
            .unwrap();
        assert_eq!(
            core.state(),
            ServerState::Dispatching {
                opcode: Opcode::Size,
                sequence: 1
            }
        );
        let err = core
            .on_command(&frame(Opcode::Size, 2, "/tmp/demo/a.txt"), &store())
            .unwrap_err();
        assert!(matches!(err, ServerError::Busy { sequence: 1, .. }));
        core.on_response_complete();
        assert_eq!(core.state(), ServerState::Idle);
        assert!(core
            .on_command(&frame(Opcode::Size, 2, "/tmp/demo/a.txt"), &store())
            .is_ok());
        assert_eq!(core.handled(), 2);
    }

    #[test]
    fn short_frame_rejected() {
        let mut core = FileServerCore::new();
        assert!(matches!(
            core.on_command(&[3], &store()),
            Err(ServerError::Frame(FrameError::ShortCommand(1)))
        ));
    }
}
