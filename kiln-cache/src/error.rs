//! # Error Taxonomy and Classification
//!
//! Purpose: Map backend failures into a closed set of outcomes so callers
//! branch on kind instead of probing error internals: a miss is `NotFound`,
//! transient network conditions are `Retriable`, everything else is fatal.
//!
//! The split matters because a miss is a frequent, normal outcome that must
//! not trigger retries, connection resets under load heal on reconnect, and
//! a protocol or server error retried forever is indistinguishable from a
//! hang.

use std::io;

use kiln_rpc::Transient;
use thiserror::Error;

/// Closed classification of every failure the cache layer can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Key absent on the backend; a normal outcome, never retried.
    NotFound,
    /// Transient condition absorbed by the retry loop.
    Retriable,
    /// Terminal failure surfaced to the caller unchanged.
    Fatal,
}

/// Errors surfaced by the cache client.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Key absent on the backend.
    #[error("key not found")]
    NotFound,
    /// Transient network failure, safe to retry.
    #[error("transient backend error: {0}")]
    Retriable(#[source] io::Error),
    /// Terminal I/O failure.
    #[error("io error: {0}")]
    Io(#[source] io::Error),
    /// RESP framing violated.
    #[error("protocol error")]
    Protocol,
    /// Server replied with an error message.
    #[error("server error: {0}")]
    Server(String),
    /// Reply type did not match the issued command.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Pool had no free connection slot; the admission gate is sized to
    /// make this unreachable.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// Client was closed while the operation was in flight.
    #[error("cache client closed")]
    Closed,
}

impl CacheError {
    /// Returns the closed classification for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::NotFound => ErrorKind::NotFound,
            CacheError::Retriable(_) => ErrorKind::Retriable,
            _ => ErrorKind::Fatal,
        }
    }
}

impl Transient for CacheError {
    fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Retriable
    }
}

/// Classifies a raw I/O failure from the backend connection.
///
/// Connection resets and aborts are common when many clients share a pooled
/// backend and heal on reconnect; timeouts and interrupts likewise. A clean
/// EOF stays fatal: it is how a closed backend surfaces mid-operation.
pub fn classify_io(err: io::Error) -> CacheError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::Interrupted => CacheError::Retriable(err),
        _ => CacheError::Io(err),
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        classify_io(err)
    }
}
