//! Probe client: send a payload to an echo server and read it back.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Send `payload` to `addr` and return exactly as many bytes as were echoed back.
pub fn probe<A: ToSocketAddrs>(addr: A, payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(PROBE_TIMEOUT))?;
    debug!(peer = %stream.peer_addr()?, bytes = payload.len(), "Sending probe");

    stream.write_all(payload)?;

    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed)?;
    stream.shutdown(Shutdown::Both)?;

    Ok(echoed)
}

/// Run the `probe` subcommand. Returns whether the echo matched.
pub fn run(target: &str, message: &str) -> io::Result<bool> {
    let echoed = probe(target, message.as_bytes())?;

    if echoed == message.as_bytes() {
        info!(addr = target, bytes = echoed.len(), "Echo matched");
        Ok(true)
    } else {
        warn!(
            addr = target,
            sent = message,
            received = %String::from_utf8_lossy(&echoed),
            "Echo mismatch"
        );
        Ok(false)
    }
}
