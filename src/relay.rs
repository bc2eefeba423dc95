//! Per-connection byte relay.
//!
//! No framing: each read of up to `chunk_size` bytes is written back
//! verbatim before the next read. Both the blocking (serial runtime) and
//! async (concurrent runtime) variants share the same outcome types.

use bytes::BytesMut;
use std::io::{self, ErrorKind, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Why a relay loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer shut down its write side (read returned 0).
    PeerClosed,
    /// Peer went away abruptly (reset, broken pipe, aborted).
    Disconnected(ErrorKind),
}

/// Totals for one relayed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySummary {
    pub bytes: u64,
    pub chunks: u64,
    pub reason: CloseReason,
}

impl RelaySummary {
    fn new() -> Self {
        Self {
            bytes: 0,
            chunks: 0,
            reason: CloseReason::PeerClosed,
        }
    }

    fn record(&mut self, n: usize) {
        self.bytes += n as u64;
        self.chunks += 1;
    }
}

/// An I/O failure on a connection that is not a plain disconnect.
///
/// Contained to the connection it happened on.
#[derive(Debug)]
pub struct ConnectionError {
    pub summary: RelaySummary,
    pub source: io::Error,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "connection failed after {} bytes: {}",
            self.summary.bytes, self.source
        )
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Errors that mean the peer is gone and are handled like a clean close.
pub fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected
    )
}

fn finish(mut summary: RelaySummary, err: io::Error) -> Result<RelaySummary, ConnectionError> {
    if is_disconnect(err.kind()) {
        summary.reason = CloseReason::Disconnected(err.kind());
        Ok(summary)
    } else {
        Err(ConnectionError {
            summary,
            source: err,
        })
    }
}

/// Log a received chunk before it is echoed.
fn observe(chunk: &[u8]) {
    info!(bytes = chunk.len(), data = %String::from_utf8_lossy(chunk), "Received");
}

/// Echo everything read from `stream` back into it until the peer closes.
pub fn relay<S: Read + Write>(
    stream: &mut S,
    chunk_size: usize,
) -> Result<RelaySummary, ConnectionError> {
    let mut buf = BytesMut::zeroed(chunk_size);
    let mut summary = RelaySummary::new();

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                debug!("Connection closed by peer");
                return Ok(summary);
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return finish(summary, e),
        };

        observe(&buf[..n]);

        if let Err(e) = stream.write_all(&buf[..n]) {
            return finish(summary, e);
        }
        summary.record(n);
    }
}

/// Async counterpart of [`relay`] for the concurrent runtime.
pub async fn relay_async<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    chunk_size: usize,
) -> Result<RelaySummary, ConnectionError> {
    let mut buf = BytesMut::zeroed(chunk_size);
    let mut summary = RelaySummary::new();

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                debug!("Connection closed by peer");
                return Ok(summary);
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return finish(summary, e),
        };

        observe(&buf[..n]);

        if let Err(e) = stream.write_all(&buf[..n]).await {
            return finish(summary, e);
        }
        summary.record(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory stream: scripted read results, captured writes.
    struct MockStream {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<Vec<u8>>,
        write_error: Option<ErrorKind>,
    }

    impl MockStream {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                reads: reads.into(),
                written: Vec::new(),
                write_error: None,
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                None => Ok(0),
                Some(Ok(data)) => {
                    assert!(data.len() <= buf.len(), "mock read larger than buffer");
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.write_error {
                return Err(io::Error::from(kind));
            }
            self.written.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_echo_preserves_chunking() {
        let mut stream = MockStream::new(vec![Ok(b"hello".to_vec()), Ok(b"world\n".to_vec())]);

        let summary = relay(&mut stream, 1024).unwrap();

        assert_eq!(stream.written, vec![b"hello".to_vec(), b"world\n".to_vec()]);
        assert_eq!(summary.bytes, 11);
        assert_eq!(summary.chunks, 2);
        assert_eq!(summary.reason, CloseReason::PeerClosed);
    }

    #[test]
    fn test_empty_connection() {
        let mut stream = MockStream::new(vec![]);

        let summary = relay(&mut stream, 1024).unwrap();

        assert!(stream.written.is_empty());
        assert_eq!(summary.bytes, 0);
        assert_eq!(summary.reason, CloseReason::PeerClosed);
    }

    #[test]
    fn test_binary_payload() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let mut stream = MockStream::new(vec![Ok(payload.clone())]);

        relay(&mut stream, 1024).unwrap();

        assert_eq!(stream.written, vec![payload]);
    }

    #[test]
    fn test_interrupted_read_is_retried() {
        let mut stream = MockStream::new(vec![
            Err(io::Error::from(ErrorKind::Interrupted)),
            Ok(b"again".to_vec()),
        ]);

        let summary = relay(&mut stream, 1024).unwrap();

        assert_eq!(stream.written, vec![b"again".to_vec()]);
        assert_eq!(summary.reason, CloseReason::PeerClosed);
    }

    #[test]
    fn test_reset_on_read_is_disconnect() {
        let mut stream = MockStream::new(vec![
            Ok(b"ping".to_vec()),
            Err(io::Error::from(ErrorKind::ConnectionReset)),
        ]);

        let summary = relay(&mut stream, 1024).unwrap();

        assert_eq!(summary.bytes, 4);
        assert_eq!(
            summary.reason,
            CloseReason::Disconnected(ErrorKind::ConnectionReset)
        );
    }

    #[test]
    fn test_broken_pipe_on_write_is_disconnect() {
        let mut stream = MockStream::new(vec![Ok(b"ping".to_vec())]);
        stream.write_error = Some(ErrorKind::BrokenPipe);

        let summary = relay(&mut stream, 1024).unwrap();

        assert_eq!(summary.bytes, 0);
        assert_eq!(summary.reason, CloseReason::Disconnected(ErrorKind::BrokenPipe));
    }

    #[test]
    fn test_other_error_is_connection_error() {
        let mut stream = MockStream::new(vec![
            Ok(b"abc".to_vec()),
            Err(io::Error::from(ErrorKind::PermissionDenied)),
        ]);

        let err = relay(&mut stream, 1024).unwrap_err();

        assert_eq!(err.source.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.summary.bytes, 3);
    }

    #[tokio::test]
    async fn test_async_echo() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b"hello")
            .write(b"hello")
            .read(b"\x00\xff")
            .write(b"\x00\xff")
            .build();

        let summary = relay_async(&mut stream, 1024).await.unwrap();

        assert_eq!(summary.bytes, 7);
        assert_eq!(summary.chunks, 2);
        assert_eq!(summary.reason, CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn test_async_reset_is_disconnect() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b"x")
            .write(b"x")
            .read_error(io::Error::from(ErrorKind::ConnectionReset))
            .build();

        let summary = relay_async(&mut stream, 1024).await.unwrap();

        assert_eq!(
            summary.reason,
            CloseReason::Disconnected(ErrorKind::ConnectionReset)
        );
    }

    #[tokio::test]
    async fn test_async_chunk_size_limits_reads() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b"abcdef")
            .write(b"abcd")
            .write(b"ef")
            .build();

        let summary = relay_async(&mut stream, 4).await.unwrap();

        assert_eq!(summary.bytes, 6);
        assert_eq!(summary.chunks, 2);
    }
}
