//! Accept loop and server lifecycle.
//!
//! The main thread accepts connections one at a time and hands each to a
//! new worker from the [`WorkerPool`]. Shutdown is requested through a
//! [`ShutdownHandle`]: it raises a flag and wakes the blocked `accept`
//! with a loopback connection; the accept loop sees the flag, leaves, and
//! runs the teardown routine.

use crate::config::Config;
use crate::connection::{self, ConnId};
use crate::pool::{JoinSummary, WorkerPool};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Cloneable handle used to ask the accept loop to stop.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    inner: Arc<ShutdownState>,
}

#[derive(Debug)]
struct ShutdownState {
    requested: AtomicBool,
    wake_addr: SocketAddr,
}

impl ShutdownHandle {
    fn new(local_addr: SocketAddr) -> Self {
        // A wildcard address is not connectable everywhere; use loopback.
        let ip = match local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };

        Self {
            inner: Arc::new(ShutdownState {
                requested: AtomicBool::new(false),
                wake_addr: SocketAddr::new(ip, local_addr.port()),
            }),
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Request shutdown and wake the accept loop.
    pub fn request(&self) {
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutdown requested");
        if let Err(e) = TcpStream::connect(self.inner.wake_addr) {
            // The loop still exits on its next accepted connection.
            warn!(error = %e, "Unable to wake the accept loop");
        }
    }
}

/// Summary of a completed teardown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub workers: JoinSummary,
}

/// Accept loop errors
#[derive(Debug)]
pub enum ServerError {
    Accept(io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Accept(e) => write!(f, "Unable to accept connection: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Accept(e) => Some(e),
        }
    }
}

/// Server instance
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    pool: WorkerPool,
    buffer_size: usize,
    shutdown: ShutdownHandle,
    next_conn: ConnId,
    teardown: Option<TeardownReport>,
}

impl Server {
    /// Create a server around an already listening socket.
    pub fn new(listener: TcpListener, config: &Config) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        Ok(Server {
            listener: Some(listener),
            local_addr,
            pool: WorkerPool::new(config.max_workers),
            buffer_size: config.buffer_size,
            shutdown: ShutdownHandle::new(local_addr),
            next_conn: 0,
            teardown: None,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for requesting shutdown from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown is requested, then tear down.
    ///
    /// An accept failure returns immediately without tearing down; the
    /// caller decides how to exit.
    pub fn run(&mut self) -> Result<TeardownReport, ServerError> {
        info!(
            address = %self.local_addr,
            max_workers = self.pool.capacity(),
            "Server listening"
        );

        while let Some(listener) = self.listener.as_ref() {
            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ServerError::Accept(e)),
            };

            if self.shutdown.is_requested() {
                debug!(peer = %peer, "Dropping connection accepted during shutdown");
                break;
            }

            self.dispatch(stream, peer);
        }

        Ok(self.teardown())
    }

    fn dispatch(&mut self, stream: TcpStream, peer: SocketAddr) {
        let conn = self.next_conn;
        self.next_conn += 1;

        let buffer_size = self.buffer_size;
        let name = format!("conn-{conn}");
        let result = self.pool.spawn(name.clone(), move || {
            connection::handle_connection(stream, conn, peer, buffer_size);
        });

        match result {
            Ok(slot) => info!(worker = %name, slot, conn, peer = %peer, "Worker connected"),
            Err(e) => error!(conn, peer = %peer, error = %e, "Failed to start worker"),
        }
    }

    /// Close the listener and join every worker.
    ///
    /// Only the first call does any work; later calls return its report.
    pub fn teardown(&mut self) -> TeardownReport {
        if let Some(report) = self.teardown {
            return report;
        }

        if self.listener.take().is_some() {
            info!("Listener closed");
        }

        info!(
            tracked = self.pool.tracked(),
            active = self.pool.active(),
            "Joining workers"
        );
        let report = TeardownReport {
            workers: self.pool.join_all(),
        };
        warn!(
            joined = report.workers.joined,
            failed = report.workers.failed,
            "Server was shut down"
        );
        warn!("Closed...");

        self.teardown = Some(report);
        report
    }
}
