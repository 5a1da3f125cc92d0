//! Request sequence numbers: issue, wrap at 256, match replies.

use crate::wire::StatusReply;

/// First sequence number issued on a fresh connection.
pub const INITIAL_SEQUENCE: u8 = 1;

/// Per-connection sequence counter. There is at most one outstanding command, so a reply
/// either carries the sequence just issued or the connection is desynchronised.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    next: u8,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::starting_at(INITIAL_SEQUENCE)
    }

    pub fn starting_at(next: u8) -> Self {
        Self { next }
    }

    /// Return the next sequence number and advance the counter (mod 256).
    pub fn issue(&mut self) -> u8 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }

    /// Sequence number the next `issue()` will return.
    pub fn peek(&self) -> u8 {
        self.next
    }

    pub fn matches(reply: &StatusReply, expected: u8) -> bool {
        reply.sequence == expected
    }

    /// Like [`matches`](Self::matches) but as an error for `?` propagation.
    pub fn check(reply: &StatusReply, expected: u8) -> Result<(), SequenceMismatch> {
        if Self::matches(reply, expected) {
            Ok(())
        } else {
            Err(SequenceMismatch {
                expected,
                got: reply.sequence,
            })
        }
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Reply sequence did not match the outstanding command. No resynchronisation is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wrong reply: expected seq {expected}, got {got}")]
pub struct SequenceMismatch {
    pub expected: u8,
    pub got: u8,
}
