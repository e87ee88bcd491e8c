//! # Kiln Cache Client
//!
//! Purpose: Provide a resilient client for the shared compile cache, a
//! Redis-compatible key/value server, on behalf of many concurrent
//! compilation requests.
//!
//! ## Design Principles
//! 1. **Outer Admission Gate**: A fixed-capacity gate in front of the pool
//!    owns all blocking; the pool itself never waits for a slot.
//! 2. **Closed Error Taxonomy**: Every failure is a miss, transient, or
//!    fatal; callers branch on kind and the retry loop absorbs transients.
//! 3. **Scoped Release**: Admission permits and connection leases are RAII
//!    guards, released exactly once on every exit path.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod config;
mod error;
mod gate;
mod metrics;
mod pool;
mod resp;

pub use client::{
    CacheClient, ClientOptions, Fetched, DEFAULT_MAX_ACTIVE_CONNS, DEFAULT_MAX_IDLE_CONNS,
};
pub use config::{addr_from_env, ConfigError, DEFAULT_PORT};
pub use error::{classify_io, CacheError, ErrorKind};
pub use metrics::{LatencySnapshot, Metrics, MetricsSnapshot};
