//! Listening socket setup shared by both runtimes.

use crate::config::Config;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr, TcpListener};

/// Errors raised while bringing the listener up.
#[derive(Debug)]
pub enum BindError {
    /// `host` is not an IP address.
    InvalidAddress(String),
    /// Socket creation, bind or listen failed (address in use, permission denied, ...).
    Io(SocketAddr, std::io::Error),
}

impl std::fmt::Display for BindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindError::InvalidAddress(host) => write!(f, "Invalid listen address '{host}'"),
            BindError::Io(addr, e) => write!(f, "Failed to bind {addr}: {e}"),
        }
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BindError::InvalidAddress(_) => None,
            BindError::Io(_, e) => Some(e),
        }
    }
}

/// Resolve the configured host and port into a socket address.
pub fn listen_addr(config: &Config) -> Result<SocketAddr, BindError> {
    let ip: IpAddr = config
        .host
        .parse()
        .map_err(|_| BindError::InvalidAddress(config.host.clone()))?;
    Ok(SocketAddr::new(ip, config.port))
}

/// Create a blocking TCP listener bound to the configured address.
///
/// SO_REUSEADDR lets a restarted server rebind while old connections sit in
/// TIME_WAIT; it does not allow two live listeners on the same address.
pub fn create_listener(config: &Config) -> Result<TcpListener, BindError> {
    let addr = listen_addr(config)?;
    bind(addr, config.backlog).map_err(|e| BindError::Io(addr, e))
}

fn bind(addr: SocketAddr, backlog: i32) -> std::io::Result<TcpListener> {
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
