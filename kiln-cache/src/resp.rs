//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server replies without pulling
//! in a protocol crate, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: The caller provides the line buffer so steady-state
//!    reads allocate only for payload bytes.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::CacheError;

/// One parsed RESP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    /// +OK or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for the nil reply.
    Bulk(Option<Vec<u8>>),
    /// *... arrays (rare in this client).
    Array(Vec<Reply>),
}

/// Encodes a RESP2 array command into the provided buffer.
pub(crate) fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one RESP reply from the buffered reader.
///
/// Returns a boxed `Send` future so the recursive call in `read_array` does
/// not trip the compiler's auto-trait inference cycle for recursive `async`.
pub(crate) fn read_reply<'a, R>(
    reader: &'a mut R,
    line_buf: &'a mut Vec<u8>,
) -> Pin<Box<dyn Future<Output = Result<Reply, CacheError>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        read_line(reader, line_buf).await?;
        if line_buf.is_empty() {
            return Err(CacheError::Protocol);
        }

        match line_buf[0] {
            b'+' => Ok(Reply::Simple(line_buf[1..].to_vec())),
            b'-' => Ok(Reply::Error(line_buf[1..].to_vec())),
            b':' => Ok(Reply::Integer(parse_i64(&line_buf[1..])?)),
            b'$' => {
                let len = parse_i64(&line_buf[1..])?;
                read_bulk(reader, len, line_buf).await
            }
            b'*' => {
                let len = parse_i64(&line_buf[1..])?;
                read_array(reader, len, line_buf).await
            }
            _ => Err(CacheError::Protocol),
        }
    })
}

async fn read_bulk<R>(reader: &mut R, len: i64, line_buf: &mut Vec<u8>) -> Result<Reply, CacheError>
where
    R: AsyncBufRead + Unpin + Send,
{
    if len < 0 {
        return Ok(Reply::Bulk(None));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await?;
    if crlf != [b'\r', b'\n'] {
        return Err(CacheError::Protocol);
    }

    line_buf.clear();
    Ok(Reply::Bulk(Some(data)))
}

async fn read_array<R>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> Result<Reply, CacheError>
where
    R: AsyncBufRead + Unpin + Send,
{
    if len <= 0 {
        return Ok(Reply::Array(Vec::new()));
    }

    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        // `read_reply` already returns a boxed `Send` future, breaking the
        // recursive future type for nested replies.
        items.push(read_reply(reader, line_buf).await?);
    }
    Ok(Reply::Array(items))
}

async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<(), CacheError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let bytes = reader.read_until(b'\n', buf).await?;
    if bytes == 0 {
        return Err(CacheError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by backend",
        )));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(CacheError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> Result<i64, CacheError> {
    if data.is_empty() {
        return Err(CacheError::Protocol);
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
        if data.len() == 1 {
            return Err(CacheError::Protocol);
        }
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(CacheError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Digits go through a small stack buffer to avoid heap work.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}
