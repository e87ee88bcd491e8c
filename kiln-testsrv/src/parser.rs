//! # Request Framing Parser
//!
//! Purpose: Incrementally parse client request framing out of a byte
//! buffer. A request is either a single inline line or an array of
//! length-prefixed bulk elements; every declared length must match the
//! actual payload length.
//!
//! Nothing is consumed from the buffer until a complete request is
//! available, so the caller can keep appending reads.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// One complete request pulled off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Single-line command without array framing.
    Inline(Vec<u8>),
    /// Array-of-bulk-strings command.
    Array(Vec<Vec<u8>>),
}

/// Framing violations that fail the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The `*N` array header did not carry a valid count.
    #[error("invalid array header")]
    BadArrayHeader,
    /// An array element did not start with a `$` bulk header.
    #[error("expected bulk element")]
    ExpectedBulk,
    /// A `$len` bulk header did not carry a valid length.
    #[error("invalid bulk length")]
    BadBulkLength,
    /// A bulk payload line disagreed with its declared length.
    #[error("bulk length mismatch: declared {declared}, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Tries to parse one request from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete
/// request; the buffer is left untouched in that case.
pub fn parse_request(buf: &mut BytesMut) -> Result<Option<Request>, FrameError> {
    let Some(header_end) = find_crlf(buf, 0) else {
        return Ok(None);
    };

    if buf[0] != b'*' {
        let line = buf[..header_end].to_vec();
        buf.advance(header_end + 2);
        return Ok(Some(Request::Inline(line)));
    }

    let count = parse_usize(&buf[1..header_end]).ok_or(FrameError::BadArrayHeader)?;

    let mut pos = header_end + 2;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(bulk_end) = find_crlf(buf, pos) else {
            return Ok(None);
        };
        if buf[pos] != b'$' {
            return Err(FrameError::ExpectedBulk);
        }
        let declared = parse_usize(&buf[pos + 1..bulk_end]).ok_or(FrameError::BadBulkLength)?;

        let data_start = bulk_end + 2;
        let Some(data_end) = find_crlf(buf, data_start) else {
            return Ok(None);
        };
        let actual = data_end - data_start;
        if actual != declared {
            return Err(FrameError::LengthMismatch { declared, actual });
        }
        args.push(buf[data_start..data_end].to_vec());
        pos = data_end + 2;
    }

    buf.advance(pos);
    Ok(Some(Request::Array(args)))
}

fn find_crlf(buf: &BytesMut, from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|pair| pair == b"\r\n")
        .map(|offset| from + offset)
}

fn parse_usize(data: &[u8]) -> Option<usize> {
    if data.is_empty() {
        return None;
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Some(value)
}
