//! # Accept Loop and Canned Responder
//!
//! One task per connection; every well-framed request is answered with the
//! same canned bulk value, and a framing violation ends the connection.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::parser::parse_request;

/// The value every request is answered with.
pub const CANNED_VALUE: &[u8] = b"0123456789";

const CANNED_REPLY: &[u8] = b"$10\r\n0123456789\r\n";

/// Concurrent-connection gauge with a high-water mark.
#[derive(Default)]
struct ConnectionGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConnectionGauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fake cache backend bound to an ephemeral local port.
pub struct FakeBackend {
    addr: SocketAddr,
    gauge: Arc<ConnectionGauge>,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl FakeBackend {
    /// Binds `127.0.0.1:0` and starts serving.
    pub async fn start() -> io::Result<FakeBackend> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let gauge = Arc::new(ConnectionGauge::default());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, gauge.clone(), shutdown_rx));
        Ok(FakeBackend {
            addr,
            gauge,
            shutdown,
            accept_task,
        })
    }

    /// Address the backend is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of currently open connections.
    pub fn active_connections(&self) -> usize {
        self.gauge.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections observed.
    pub fn peak_connections(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    /// Stops the accept loop and ends in-flight connections.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    gauge: Arc<ConnectionGauge>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        // Clone for the prospective child task before the select borrows
        // `shutdown` mutably in the `wait_for` arm.
        let child_shutdown = shutdown.clone();
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => return,
            accepted = listener.accept() => {
                let Ok((stream, peer)) = accepted else {
                    return;
                };
                debug!(%peer, "accepted connection");
                tokio::spawn(handle_connection(
                    stream,
                    gauge.clone(),
                    child_shutdown,
                ));
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    gauge: Arc<ConnectionGauge>,
    mut shutdown: watch::Receiver<bool>,
) {
    gauge.enter();
    if let Err(err) = serve_requests(stream, &mut shutdown).await {
        debug!(error = %err, "connection ended");
    }
    gauge.exit();
}

async fn serve_requests(
    mut stream: TcpStream,
    shutdown: &mut watch::Receiver<bool>,
) -> io::Result<()> {
    let mut buffer = BytesMut::with_capacity(4 * 1024);
    loop {
        loop {
            match parse_request(&mut buffer) {
                Ok(Some(_request)) => stream.write_all(CANNED_REPLY).await?,
                Ok(None) => break,
                Err(err) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, err.to_string()));
                }
            }
        }

        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => return Ok(()),
            read = stream.read_buf(&mut buffer) => {
                if read? == 0 {
                    return Ok(());
                }
            }
        }
    }
}
