//! Serial TCP echo server.
//!
//! One thread owns the listening socket and at most one connection. A
//! connection is relayed until it closes, and only then is the next one
//! accepted; later clients wait in the listen backlog.

use crate::config::Config;
use crate::listener::{create_listener, BindError};
use crate::relay::{relay, CloseReason, ConnectionError, RelaySummary};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) doesn't spin.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Echo server instance
pub struct EchoListener {
    listener: TcpListener,
    chunk_size: usize,
}

impl EchoListener {
    /// Bind and listen on the configured host and port.
    pub fn bind(config: &Config) -> Result<Self, BindError> {
        let listener = create_listener(config)?;
        Ok(Self {
            listener,
            chunk_size: config.chunk_size,
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve connections forever.
    pub fn run(&self) {
        info!(address = %self.display_addr(), "Server listening");

        loop {
            if let Err(e) = self.serve_next() {
                accept_failed(&e);
            }
        }
    }

    /// Block until the next client connects, then relay it to completion.
    ///
    /// Only accept errors are returned; anything that goes wrong on the
    /// connection itself is logged and contained.
    pub fn serve_next(&self) -> io::Result<Option<RelaySummary>> {
        let (stream, peer) = self.listener.accept()?;
        Ok(serve_connection(stream, peer, self.chunk_size))
    }

    fn display_addr(&self) -> String {
        self.local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

fn accept_failed(e: &io::Error) {
    error!(error = %e, "Failed to accept connection");
    thread::sleep(ACCEPT_BACKOFF);
}

/// Relay one accepted connection; the stream is closed when this returns.
fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    chunk_size: usize,
) -> Option<RelaySummary> {
    info!(peer = %peer, "New connection");

    match relay(&mut stream, chunk_size) {
        Ok(summary) => {
            match summary.reason {
                CloseReason::PeerClosed => {}
                CloseReason::Disconnected(kind) => {
                    debug!(peer = %peer, ?kind, "Peer disconnected abruptly");
                }
            }
            info!(
                peer = %peer,
                bytes = summary.bytes,
                chunks = summary.chunks,
                "Connection closed"
            );
            Some(summary)
        }
        Err(ConnectionError { summary, source }) => {
            warn!(
                peer = %peer,
                bytes = summary.bytes,
                error = %source,
                "Connection error"
            );
            None
        }
    }
}
