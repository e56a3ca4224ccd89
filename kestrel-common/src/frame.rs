//! # Request Framing
//!
//! Purpose: encode and decode the length-prefixed request frames exchanged
//! between client and server.
//!
//! ## Wire Layout
//!
//! ```text
//! request frame:
//! +------------+-----------+----------------------------+
//! | total_len  | nargs     | (arg_len | arg_bytes) * n  |
//! | u32 le     | u32 le    | u32 le   | raw             |
//! +------------+-----------+----------------------------+
//! ```
//!
//! `total_len` excludes its own four bytes and covers everything after it.
//! The inner lengths must sum exactly to `total_len - 4`; anything else is a
//! malformed frame and fatal for the connection that sent it.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Upper bound on a single frame's payload, excluding the length prefix.
pub const MAX_MSG: usize = 4096;

/// Upper bound on the number of arguments in one request.
pub const MAX_ARGS: usize = 1024;

/// Framing violations. All of these are fatal for the offending connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Declared frame length exceeds `MAX_MSG`.
    #[error("frame exceeds maximum message size")]
    Oversize,
    /// Declared argument count exceeds `MAX_ARGS`.
    #[error("too many arguments in request")]
    TooManyArgs,
    /// Truncated body, inner lengths not summing to the frame length, or an
    /// unknown value tag.
    #[error("malformed frame")]
    Malformed,
}

/// Encodes a request frame for the given argument list.
///
/// Used by the client side; the resulting bytes start with the total length
/// prefix and can be written to the socket as-is.
pub fn encode_request(args: &[&[u8]], out: &mut Vec<u8>) -> Result<(), FrameError> {
    if args.len() > MAX_ARGS {
        return Err(FrameError::TooManyArgs);
    }
    let body: usize = 4 + args.iter().map(|a| 4 + a.len()).sum::<usize>();
    if body > MAX_MSG {
        return Err(FrameError::Oversize);
    }

    out.extend_from_slice(&(body as u32).to_le_bytes());
    out.extend_from_slice(&(args.len() as u32).to_le_bytes());
    for arg in args {
        out.extend_from_slice(&(arg.len() as u32).to_le_bytes());
        out.extend_from_slice(arg);
    }
    Ok(())
}

/// Attempts to extract one complete request frame from the read buffer.
///
/// Returns `Ok(None)` when the buffer does not yet hold a full frame. On
/// success the consumed bytes are advanced past, so repeated calls drain
/// every pipelined request delivered by a single read.
pub fn take_frame(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, FrameError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_MSG {
        return Err(FrameError::Oversize);
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }

    let args = decode_args(&buf[4..4 + len])?;
    buf.advance(4 + len);
    Ok(Some(args))
}

/// Decodes the argument list from a frame body (everything after the length
/// prefix). The body must be consumed exactly.
pub fn decode_args(body: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
    if body.len() < 4 {
        return Err(FrameError::Malformed);
    }
    let nargs = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
    if nargs > MAX_ARGS {
        return Err(FrameError::TooManyArgs);
    }

    let mut args = Vec::with_capacity(nargs);
    let mut pos = 4;
    for _ in 0..nargs {
        if pos + 4 > body.len() {
            return Err(FrameError::Malformed);
        }
        let len = u32::from_le_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]])
            as usize;
        pos += 4;
        if pos + len > body.len() {
            return Err(FrameError::Malformed);
        }
        args.push(body[pos..pos + len].to_vec());
        pos += len;
    }
    if pos != body.len() {
        return Err(FrameError::Malformed);
    }
    Ok(args)
}

/// Appends a response frame (length prefix + payload) to the write buffer.
pub fn write_frame(payload: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_set_request() {
        // `SET foo bar`, byte for byte.
        let mut out = Vec::new();
        encode_request(&[b"SET", b"foo", b"bar"], &mut out).unwrap();
        let expected: &[u8] = &[
            0x0e, 0x00, 0x00, 0x00, // total_len = 14
            0x03, 0x00, 0x00, 0x00, // nargs = 3
            0x03, 0x00, 0x00, 0x00, b'S', b'E', b'T',
            0x03, 0x00, 0x00, 0x00, b'f', b'o', b'o',
            0x03, 0x00, 0x00, 0x00, b'b', b'a', b'r',
        ];
        assert_eq!(out, expected);
    }

    #[test]
    fn take_frame_waits_for_full_frame() {
        let mut full = Vec::new();
        encode_request(&[b"get", b"k"], &mut full).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..5]);
        assert_eq!(take_frame(&mut buf).unwrap(), None);

        buf.extend_from_slice(&full[5..]);
        let args = take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![b"get".to_vec(), b"k".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn take_frame_drains_pipelined_requests() {
        let mut bytes = Vec::new();
        encode_request(&[b"get", b"a"], &mut bytes).unwrap();
        encode_request(&[b"get", b"b"], &mut bytes).unwrap();

        let mut buf = BytesMut::from(&bytes[..]);
        assert_eq!(take_frame(&mut buf).unwrap().unwrap()[1], b"a");
        assert_eq!(take_frame(&mut buf).unwrap().unwrap()[1], b"b");
        assert_eq!(take_frame(&mut buf).unwrap(), None);
    }

    #[test]
    fn rejects_oversize_frame() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&((MAX_MSG as u32) + 1).to_le_bytes());
        assert_eq!(take_frame(&mut buf), Err(FrameError::Oversize));
    }

    #[test]
    fn rejects_length_mismatch() {
        // nargs = 1, arg_len = 2, but three bytes of argument data.
        let body = [
            0x01, 0x00, 0x00, 0x00, // nargs
            0x02, 0x00, 0x00, 0x00, b'h', b'i', b'!',
        ];
        assert_eq!(decode_args(&body), Err(FrameError::Malformed));
    }

    #[test]
    fn rejects_truncated_body() {
        let body = [0x02, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00];
        assert_eq!(decode_args(&body), Err(FrameError::Malformed));
    }

    #[test]
    fn allows_embedded_nul_bytes() {
        let mut out = Vec::new();
        encode_request(&[b"set", b"a\0b", b"\0"], &mut out).unwrap();
        let args = decode_args(&out[4..]).unwrap();
        assert_eq!(args[1], b"a\0b");
        assert_eq!(args[2], b"\0");
    }

    #[test]
    fn encode_rejects_oversize_request() {
        let big = vec![0u8; MAX_MSG];
        let mut out = Vec::new();
        assert_eq!(
            encode_request(&[b"set", b"k", &big], &mut out),
            Err(FrameError::Oversize)
        );
    }
}
