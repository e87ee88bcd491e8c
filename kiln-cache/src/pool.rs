//! # Async Connection Pool
//!
//! Purpose: Reuse TCP connections to the cache backend across operations to
//! cut handshake latency and allocation churn.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **No Internal Waiting**: Exceeding the total cap is an immediate
//!    error; the admission gate in front of the pool owns all blocking.
//! 3. **Minimal Locking**: Hold the mutex only while moving idle
//!    connections, never across dials or I/O.
//! 4. **Lazy Dialing**: A leased connection dials on first use and redials
//!    after a failed exchange, so one lease can outlive a connection reset.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

use crate::error::CacheError;
use crate::resp::{encode_command, read_reply, Reply};

/// Pool configuration.
#[derive(Debug, Clone)]
pub(crate) struct PoolConfig {
    /// Backend address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum idle connections retained for reuse.
    pub max_idle: usize,
    /// Maximum total connections (idle + leased).
    pub max_total: usize,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    closed: watch::Sender<bool>,
}

impl PoolInner {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn release_slot(&self) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        if state.idle.len() < self.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// Connection pool handle.
#[derive(Clone)]
pub(crate) struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub(crate) fn new(config: PoolConfig) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
        };
        let (closed, _) = watch::channel(false);
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                closed,
            }),
        }
    }

    /// Leases a connection without waiting.
    ///
    /// Either an idle connection is reused or a slot is reserved for a
    /// fresh one; the dial itself is deferred to the first exchange. The
    /// admission gate must already be held, so running out of slots here
    /// indicates a sizing bug rather than load.
    pub(crate) fn lease(&self) -> Result<PooledConnection, CacheError> {
        if self.inner.is_closed() {
            return Err(CacheError::Closed);
        }

        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        if !self.try_reserve() {
            return Err(CacheError::PoolExhausted);
        }

        let conn = Connection::new(&self.inner.config);
        Ok(PooledConnection::new(self.inner.clone(), conn))
    }

    /// Signal observed by in-flight operations to abort on close.
    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.inner.closed.subscribe()
    }

    /// Closes the pool: idle connections are torn down, later leases fail,
    /// and in-flight operations observing [`Self::closed_signal`] abort.
    /// Safe to call more than once.
    pub(crate) fn close(&self) {
        // send_replace updates the value even when no receiver is live.
        self.inner.closed.send_replace(true);
        let drained: Vec<Connection> = {
            let mut state = self.inner.state.lock().expect("pool mutex poisoned");
            let count = state.idle.len();
            state.total = state.total.saturating_sub(count);
            state.idle.drain(..).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "closed idle connections");
        }
    }

    fn pop_idle(&self) -> Option<Connection> {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.idle.pop_front()
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        if state.total >= self.inner.config.max_total {
            return false;
        }
        state.total += 1;
        true
    }
}

/// RAII lease; the connection returns to the pool on drop.
pub(crate) struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
        }
    }

    /// Executes one command and returns the parsed reply.
    pub(crate) async fn exec(&mut self, args: &[&[u8]]) -> Result<Reply, CacheError> {
        match self.conn.as_mut() {
            Some(conn) => conn.exec(args).await,
            None => Err(CacheError::Closed),
        }
    }

    /// Executes a command that the caller has already RESP-encoded.
    ///
    /// Equivalent to [`Self::exec`] but the encoded bytes are owned by the
    /// caller, so the in-flight future carries no borrow with the caller's
    /// lifetime — which keeps the operation future `Send` across `.await`.
    pub(crate) async fn exec_prepared(&mut self, command: &[u8]) -> Result<Reply, CacheError> {
        match self.conn.as_mut() {
            Some(conn) => conn.exec_prepared(command).await,
            None => Err(CacheError::Closed),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        // Broken or post-close connections are discarded with their slot.
        if conn.healthy() && !self.pool.is_closed() {
            self.pool.return_connection(conn);
        } else {
            self.pool.release_slot();
        }
    }
}

/// Single backend connection with reusable buffers.
///
/// The stream is dialed lazily and dropped after any failed exchange, so
/// the next attempt on the same lease starts from a fresh dial.
struct Connection {
    addr: String,
    connect_timeout: Option<Duration>,
    stream: Option<BufReader<TcpStream>>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn new(config: &PoolConfig) -> Self {
        Connection {
            addr: config.addr.clone(),
            connect_timeout: config.connect_timeout,
            stream: None,
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        }
    }

    fn healthy(&self) -> bool {
        self.stream.is_some()
    }

    async fn exec(&mut self, args: &[&[u8]]) -> Result<Reply, CacheError> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);
        // Hand the encoded bytes to the shared exchange routine. The buffer
        // is moved out and restored so its reuse across operations is kept.
        let command = std::mem::take(&mut self.write_buf);
        let result = self.exec_prepared(&command).await;
        self.write_buf = command;
        result
    }

    async fn exec_prepared(&mut self, command: &[u8]) -> Result<Reply, CacheError> {
        // The stream is taken for the duration of the exchange and only
        // restored after a clean completion. A failed or abandoned exchange
        // leaves it empty, so the next attempt starts from a fresh dial and
        // the lease cannot return a desynchronized connection to the pool.
        let mut reader = match self.stream.take() {
            Some(reader) => reader,
            None => BufReader::new(dial(&self.addr, self.connect_timeout).await?),
        };

        let stream = reader.get_mut();
        stream.write_all(command).await?;
        stream.flush().await?;

        let reply = read_reply(&mut reader, &mut self.line_buf).await?;
        self.stream = Some(reader);
        Ok(reply)
    }
}

async fn dial(addr: &str, connect_timeout: Option<Duration>) -> Result<TcpStream, CacheError> {
    let connect = TcpStream::connect(addr);
    let stream = match connect_timeout {
        Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
            CacheError::Retriable(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))
        })??,
        None => connect.await?,
    };
    // Nagle off keeps request latency low for small payloads.
    stream.set_nodelay(true)?;
    Ok(stream)
}
