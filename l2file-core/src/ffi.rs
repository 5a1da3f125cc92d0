//! C ABI for linking l2file-core as a static library from firmware or other C hosts.
//! Covers the wire codec, listing terminator detection and payload digests; the host keeps
//! its own radio stack and calls these around it.

use std::os::raw::c_int;
use std::slice;

use crate::integrity::{self, DIGEST_LEN};
use crate::listing;
use crate::protocol::Opcode;
use crate::wire::{self, Command};

/// Encode a command frame `[opcode][seq][payload]` into `out_buf`. Returns bytes written, or
/// -1 on unknown opcode, null pointer or short buffer.
#[no_mangle]
pub extern "C" fn l2file_encode_command(
    opcode: u8,
    sequence: u8,
    payload: *const u8,
    payload_len: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if out_buf.is_null() || (payload.is_null() && payload_len > 0) {
        return -1;
    }
    let opcode = match Opcode::try_from(opcode) {
        Ok(op) => op,
        Err(_) => return -1,
    };
    let payload = if payload_len == 0 {
        &[][..]
    } else {
        unsafe { slice::from_raw_parts(payload, payload_len) }
    };
    let frame = wire::encode_command(&Command::new(opcode, sequence, payload));
    if frame.len() > out_buf_len {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(frame.as_ptr(), frame.len());
    }
    frame.len() as c_int
}

/// Decode a reply frame. Fills `out_sequence` and `out_status`; `out_size` is set to the size
/// field or left untouched for a 3-byte reply. Returns 1 if a size was present, 0 if not,
/// -1 on bad length or null pointer.
#[no_mangle]
pub extern "C" fn l2file_decode_reply(
    buf: *const u8,
    len: usize,
    out_sequence: *mut u8,
    out_status: *mut u8,
    out_size: *mut u32,
) -> c_int {
    if buf.is_null() || out_sequence.is_null() || out_status.is_null() || out_size.is_null() {
        return -1;
    }
    let data = unsafe { slice::from_raw_parts(buf, len) };
    let reply = match wire::decode_reply(data) {
        Ok(r) => r,
        Err(_) => return -1,
    };
    unsafe {
        *out_sequence = reply.sequence;
        *out_status = reply.status;
    }
    match reply.size {
        Some(size) => {
            unsafe {
                *out_size = size;
            }
            1
        }
        None => 0,
    }
}

/// 1 if the accumulated listing bytes are complete, 0 if more are expected, -1 on null.
#[no_mangle]
pub extern "C" fn l2file_listing_terminated(buf: *const u8, len: usize) -> c_int {
    if buf.is_null() {
        return -1;
    }
    let data = unsafe { slice::from_raw_parts(buf, len) };
    listing::is_terminated(data) as c_int
}

/// SHA-256 of `buf` into `out_digest` (32 bytes). Returns 0, or -1 on null / short buffer.
#[no_mangle]
pub extern "C" fn l2file_payload_digest(
    buf: *const u8,
    len: usize,
    out_digest: *mut u8,
    out_len: usize,
) -> c_int {
    if out_digest.is_null() || out_len < DIGEST_LEN || (buf.is_null() && len > 0) {
        return -1;
    }
    let data = if len == 0 {
        &[][..]
    } else {
        unsafe { slice::from_raw_parts(buf, len) }
    };
    let digest = integrity::hash_bytes(data);
    unsafe {
        out_digest.copy_from_nonoverlapping(digest.as_bytes().as_ptr(), DIGEST_LEN);
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_command_into_buffer() {
        let path = b"/tmp/demo/file.txt";
        let mut out = [0u8; 64];
        let n = l2file_encode_command(3, 1, path.as_ptr(), path.len(), out.as_mut_ptr(), out.len());
        assert_eq!(n, 2 + path.len() as c_int);
        assert_eq!(&out[..2], &[3, 1]);
        assert_eq!(&out[2..n as usize], path);
    }

    #[test]
    fn encode_command_rejects_unknown_opcode_and_small_buffer() {
        let mut out = [0u8; 4];
        assert_eq!(
            l2file_encode_command(9, 1, std::ptr::null(), 0, out.as_mut_ptr(), out.len()),
            -1
        );
        let path = b"/long/path";
        assert_eq!(
            l2file_encode_command(3, 1, path.as_ptr(), path.len(), out.as_mut_ptr(), out.len()),
            -1
        );
        assert_eq!(
            l2file_encode_command(4, 7, std::ptr::null(), 0, out.as_mut_ptr(), out.len()),
            2
        );
    }

    #[test]
    fn decode_sized_and_short_replies() {
        let (mut seq, mut status, mut size) = (0u8, 0u8, 0u32);
        let sized = [3u8, 5, 0, 0xd2, 0x04, 0, 0];
        assert_eq!(
            l2file_decode_reply(sized.as_ptr(), sized.len(), &mut seq, &mut status, &mut size),
            1
        );
        assert_eq!((seq, status, size), (5, 0, 1234));

        let short = [3u8, 6, 2];
        assert_eq!(
            l2file_decode_reply(short.as_ptr(), short.len(), &mut seq, &mut status, &mut size),
            0
        );
        assert_eq!((seq, status), (6, 2));

        let bad = [3u8, 6, 2, 0];
        assert_eq!(
            l2file_decode_reply(bad.as_ptr(), bad.len(), &mut seq, &mut status, &mut size),
            -1
        );
    }

    #[test]
    fn listing_terminator() {
        let done = b"10:a.txt\n\n";
        let partial = b"10:a.txt\n";
        assert_eq!(l2file_listing_terminated(done.as_ptr(), done.len()), 1);
        assert_eq!(l2file_listing_terminated(partial.as_ptr(), partial.len()), 0);
        assert_eq!(l2file_listing_terminated(std::ptr::null(), 0), -1);
    }

    #[test]
    fn digest_matches_rust_side() {
        let payload = [7u8; 300];
        let mut out = [0u8; 32];
        assert_eq!(
            l2file_payload_digest(payload.as_ptr(), payload.len(), out.as_mut_ptr(), out.len()),
            0
        );
        assert_eq!(&out, integrity::hash_bytes(&payload).as_bytes());
        let mut short = [0u8; 16];
        assert_eq!(
            l2file_payload_digest(payload.as_ptr(), payload.len(), short.as_mut_ptr(), 16),
            -1
        );
    }
}
