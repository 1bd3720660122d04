//! Listening socket setup.
//!
//! Creates the TCP socket, enables address reuse, binds and starts
//! listening. Every failure here is fatal to the process.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener};
use tracing::info;

/// Create a blocking TCP listener bound to `addr`.
pub fn open(addr: &str, backlog: i32) -> Result<TcpListener, SetupError> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| SetupError::Address(addr.to_string(), e))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(SetupError::Socket)?;

    socket
        .set_reuse_address(true)
        .map_err(SetupError::ReuseAddress)?;
    info!("Reuse option enabled");

    socket
        .bind(&addr.into())
        .map_err(|e| SetupError::Bind(addr, e))?;
    info!(addr = %addr, "Bound listening socket");

    socket.listen(backlog).map_err(SetupError::Listen)?;
    info!(backlog, "Waiting for connections...");

    Ok(socket.into())
}

/// Listener setup errors
#[derive(Debug)]
pub enum SetupError {
    Address(String, std::net::AddrParseError),
    Socket(io::Error),
    ReuseAddress(io::Error),
    Bind(SocketAddr, io::Error),
    Listen(io::Error),
}

impl std::fmt::Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupError::Address(addr, e) => write!(f, "Invalid listen address '{}': {}", addr, e),
            SetupError::Socket(e) => write!(f, "Unable to create the socket: {}", e),
            SetupError::ReuseAddress(e) => write!(f, "Unable to set the reuse option: {}", e),
            SetupError::Bind(addr, e) => write!(f, "Unable to bind to {}: {}", addr, e),
            SetupError::Listen(e) => write!(f, "Unable to listen: {}", e),
        }
    }
}

impl std::error::Error for SetupError {}
