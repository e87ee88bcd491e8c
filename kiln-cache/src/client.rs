//! # Cache Client
//!
//! Purpose: Expose the `get`/`put` surface used by the exec service to
//! deduplicate compile results through the shared cache, and keep that
//! surface correct under heavy concurrency and a flaky network.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` hides admission, pooling, retry,
//!    and protocol details behind two operations.
//! 2. **Gate Before Lease**: The admission permit is acquired strictly
//!    before the pool lease and released strictly after it.
//! 3. **Absorb Transients**: Operations are idempotent, so the retry loop
//!    runs unbounded; only the caller's deadline ends it.
//! 4. **Terminal Outcomes Only**: Callers observe success, a miss, or a
//!    fatal error, never a transient failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_rpc::Retry;
use tokio::sync::{watch, Mutex};

use crate::error::CacheError;
use crate::gate::{AdmissionGate, SLOW_ADMISSION_WAIT};
use crate::metrics::Metrics;
use crate::pool::{ConnectionPool, PoolConfig, PooledConnection};
use crate::resp::{encode_command, Reply};

/// Default cap on idle connections retained by the pool.
pub const DEFAULT_MAX_IDLE_CONNS: usize = 50;

/// Default cap on concurrently active connections.
///
/// Managed cache offerings commonly quota connections in the tens of
/// thousands per instance; 200 per process leaves ample headroom.
pub const DEFAULT_MAX_ACTIVE_CONNS: usize = 200;

/// Cache client configuration, immutable once the client is built.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Prefix prepended to every key before it reaches the backend.
    pub prefix: String,
    /// Maximum idle connections kept warm.
    pub max_idle: usize,
    /// Maximum concurrently active connections; one number bounds both the
    /// admission gate and the pool.
    pub max_active: usize,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            prefix: String::new(),
            max_idle: DEFAULT_MAX_IDLE_CONNS,
            max_active: DEFAULT_MAX_ACTIVE_CONNS,
            connect_timeout: None,
        }
    }
}

/// Value fetched from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// The key as supplied by the caller, without the prefix.
    pub key: String,
    /// The stored bytes, returned verbatim.
    pub value: Vec<u8>,
    /// Reserved for a fronting in-process tier; always true today.
    pub in_memory: bool,
}

/// Resilient client for the shared compile cache.
///
/// Cheap to clone and safe to share across tasks. Every operation acquires
/// an admission slot, leases a pooled connection, and retries transient
/// failures until the caller's deadline cancels it.
#[derive(Clone)]
pub struct CacheClient {
    prefix: String,
    gate: AdmissionGate,
    pool: ConnectionPool,
    retry: Retry,
    metrics: &'static Metrics,
}

impl CacheClient {
    /// Creates a client for the backend at `addr`.
    pub fn new(addr: impl Into<String>, options: ClientOptions) -> Self {
        let pool = ConnectionPool::new(PoolConfig {
            addr: addr.into(),
            max_idle: options.max_idle,
            max_total: options.max_active,
            connect_timeout: options.connect_timeout,
        });
        CacheClient {
            prefix: options.prefix,
            gate: AdmissionGate::new(options.max_active),
            pool,
            retry: Retry::default(),
            metrics: Metrics::global(),
        }
    }

    /// Fetches the value for `key`.
    ///
    /// Returns [`CacheError::NotFound`] when the key is absent, a normal
    /// outcome rather than a failure. Transient backend errors are retried until
    /// the caller cancels; bound the call with `tokio::time::timeout`.
    pub async fn get(&self, key: &str) -> Result<Fetched, CacheError> {
        self.metrics.record_get_start();
        let _timer = OpTimer::new(self.metrics);
        let result = self.fetch(key).await;
        match &result {
            Ok(_) => self.metrics.record_hit(),
            Err(CacheError::NotFound) => self.metrics.record_miss(),
            Err(_) => self.metrics.record_error(),
        }
        result
    }

    /// Stores `value` under `key`, overwriting any previous value.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.metrics.record_put_start();
        let _timer = OpTimer::new(self.metrics);
        let result = self.store(key, value).await;
        if result.is_err() {
            self.metrics.record_error();
        }
        result
    }

    /// Closes the client: pooled connections are released, later and
    /// in-flight operations fail with [`CacheError::Closed`]. Safe to call
    /// once during shutdown; repeated calls are no-ops.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Returns the process-wide metrics registry backing this client.
    pub fn metrics(&self) -> &'static Metrics {
        self.metrics
    }

    async fn fetch(&self, key: &str) -> Result<Fetched, CacheError> {
        let namespaced = self.namespaced(key);

        let _permit = self.admit().await;
        let conn = Arc::new(Mutex::new(self.pool.lease()?));
        let closed = self.pool.closed_signal();
        let mut attempt_count: u64 = 0;
        // The retry closure is `async move`, and it holds no borrow tied to
        // the closure's own call lifetime across the await — such a borrow
        // defeats the higher-ranked `Send` check and leaves the operation
        // future non-`Send`, which spawning callers require. The single
        // persistent lease is shared via `Arc<Mutex<..>>` so each attempt can
        // clone a future-local handle and hold the (`Send`) guard across the
        // await instead of a captured `&mut`; the lock is never contended.
        // The attempt counter is shared back out via a moved-in `&mut`.
        let attempts = &mut attempt_count;
        let result = self
            .retry
            .run(async move || {
                *attempts += 1;
                let mut command = Vec::new();
                encode_command(&[b"GET", namespaced.as_slice()], &mut command);
                let conn = conn.clone();
                let mut leased = conn.lock().await;
                exec_until_closed(&mut leased, closed.clone(), command).await
            })
            .await;
        if attempt_count > 1 {
            self.metrics.record_retries(attempt_count - 1);
        }
        match result? {
            Reply::Bulk(Some(value)) => Ok(Fetched {
                key: key.to_string(),
                value,
                in_memory: true,
            }),
            Reply::Bulk(None) => Err(CacheError::NotFound),
            Reply::Error(message) => Err(server_error(&message)),
            _ => Err(CacheError::UnexpectedResponse),
        }
    }

    async fn store(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let namespaced = self.namespaced(key);
        let value = value.to_vec();

        let _permit = self.admit().await;
        let conn = Arc::new(Mutex::new(self.pool.lease()?));
        let closed = self.pool.closed_signal();
        let mut attempt_count: u64 = 0;
        // Same `async move` shaping as `fetch` so the operation future stays
        // `Send`: the single lease is shared through `Arc<Mutex<..>>`, each
        // attempt clones a future-local handle and holds the `Send` guard
        // across the await, and the command is encoded into an owned buffer —
        // nothing tied to the closure call lifetime is held across the await.
        let attempts = &mut attempt_count;
        let result = self
            .retry
            .run(async move || {
                *attempts += 1;
                let mut command = Vec::new();
                encode_command(&[b"SET", namespaced.as_slice(), value.as_slice()], &mut command);
                let conn = conn.clone();
                let mut leased = conn.lock().await;
                exec_until_closed(&mut leased, closed.clone(), command).await
            })
            .await;
        if attempt_count > 1 {
            self.metrics.record_retries(attempt_count - 1);
        }
        match result? {
            Reply::Simple(_) => Ok(()),
            Reply::Error(message) => Err(server_error(&message)),
            _ => Err(CacheError::UnexpectedResponse),
        }
    }

    async fn admit(&self) -> crate::gate::AdmissionPermit {
        let wait_start = Instant::now();
        let permit = self.gate.acquire().await;
        if wait_start.elapsed() > SLOW_ADMISSION_WAIT {
            self.metrics.record_slow_wait();
        }
        permit
    }

    fn namespaced(&self, key: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.prefix.len() + key.len());
        buf.extend_from_slice(self.prefix.as_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf
    }
}

/// Runs one command attempt, racing it against the client-close signal.
///
/// Extracted into a named `async fn` so the per-attempt future has a
/// concrete, `Send` type; inlined as a `tokio::select!` inside the retry
/// async closure it tripped the compiler's higher-ranked `Send` inference.
async fn exec_until_closed(
    conn: &mut PooledConnection,
    mut closed: watch::Receiver<bool>,
    command: Vec<u8>,
) -> Result<Reply, CacheError> {
    let exec = conn.exec_prepared(&command);
    tokio::select! {
        _ = closed.wait_for(|closed| *closed) => Err(CacheError::Closed),
        reply = exec => reply,
    }
}

fn server_error(message: &[u8]) -> CacheError {
    CacheError::Server(String::from_utf8_lossy(message).into_owned())
}

/// Closes out the in-flight gauge and latency sample on every exit path,
/// including a caller that abandons the operation mid-await.
struct OpTimer {
    metrics: &'static Metrics,
    start: Instant,
}

impl OpTimer {
    fn new(metrics: &'static Metrics) -> Self {
        OpTimer {
            metrics,
            start: Instant::now(),
        }
    }
}

impl Drop for OpTimer {
    fn drop(&mut self) {
        self.metrics.record_op_end(self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_with_the_prefix() {
        let client = CacheClient::new(
            "127.0.0.1:1",
            ClientOptions {
                prefix: "kiln:".to_string(),
                ..ClientOptions::default()
            },
        );
        assert_eq!(client.namespaced("abc"), b"kiln:abc".to_vec());
    }

    #[test]
    fn empty_prefix_leaves_keys_untouched() {
        let client = CacheClient::new("127.0.0.1:1", ClientOptions::default());
        assert_eq!(client.namespaced("abc"), b"abc".to_vec());
    }
}
