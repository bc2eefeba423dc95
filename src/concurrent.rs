//! Concurrent echo server on tokio.
//!
//! Each accepted connection is relayed in its own task. The accept loop
//! never waits on a relay, only on a free connection slot.

use crate::config::Config;
use crate::listener::create_listener;
use crate::relay::{relay_async, CloseReason};
use crate::server::ACCEPT_BACKOFF;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Server instance
pub struct Server {
    listener: TcpListener,
    chunk_size: usize,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listener. Must be called from within a tokio runtime.
    pub fn bind(config: &Config) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let std_listener = create_listener(config)?;
        std_listener.set_nonblocking(true)?;

        Ok(Server {
            listener: TcpListener::from_std(std_listener)?,
            chunk_size: config.chunk_size,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start accepting connections
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(address = %self.local_addr()?, "Server listening");

        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let chunk_size = self.chunk_size;
                    tokio::spawn(async move {
                        handle_connection(stream, peer, chunk_size).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

/// Relay a single client connection
async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, chunk_size: usize) {
    info!(peer = %peer, "New connection");

    match relay_async(&mut stream, chunk_size).await {
        Ok(summary) => {
            if let CloseReason::Disconnected(kind) = summary.reason {
                debug!(peer = %peer, ?kind, "Peer disconnected abruptly");
            }
            info!(
                peer = %peer,
                bytes = summary.bytes,
                chunks = summary.chunks,
                "Connection closed"
            );
        }
        Err(e) => {
            warn!(peer = %peer, error = %e, "Connection error");
        }
    }
}

/// Build a multi-threaded runtime and serve until the process is killed.
pub fn run(config: &Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = Server::bind(config)?;
        server.run().await
    })
}
