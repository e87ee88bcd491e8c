//! # Fake Cache Backend
//!
//! Purpose: Provide a protocol-speaking stand-in for the shared cache
//! server so load and concurrency behavior of the client can be driven
//! without a live dependency.
//!
//! ## Design Principles
//! 1. **Strict Framing**: Requests are parsed and validated in full; a
//!    framing violation fails the connection.
//! 2. **Canned Semantics**: Every command gets one fixed bulk reply,
//!    enough for throughput and pooling tests, not protocol conformance.
//! 3. **Observable Concurrency**: Active and peak connection counts are
//!    exposed so tests can assert the client's admission bound.
//! 4. **Clean Shutdown**: Closing the backend stops the accept loop and
//!    ends in-flight connections.

mod parser;
mod server;

pub use parser::{parse_request, FrameError, Request};
pub use server::{FakeBackend, CANNED_VALUE};
