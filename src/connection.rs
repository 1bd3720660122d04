//! Per-connection worker body.
//!
//! A worker owns exactly one accepted connection: it reads a single
//! request, parses it, sends the fixed reply and closes the socket.
//! The connection is dropped exactly once, whichever step fails.

use crate::reply;
use crate::request::{self, ParseError, Request};
use bytes::BytesMut;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use tracing::{error, info};

/// Identifier assigned to each accepted connection, in accept order.
pub type ConnId = u64;

/// Read one line-terminated request into `buffer`.
///
/// Keeps receiving while each read returns data and the last byte
/// received is not `\n`. On success the buffer holds the request
/// without its final `\n` and the total number of bytes received is
/// returned. If the peer closes before sending the terminator the
/// buffer is left empty and `Ok` is returned.
pub fn read_line<R: Read>(
    reader: &mut R,
    buffer: &mut BytesMut,
    max_len: usize,
) -> io::Result<usize> {
    buffer.clear();
    buffer.resize(max_len, 0);
    let mut filled = 0;

    loop {
        if filled == max_len {
            buffer.clear();
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("request exceeds {} bytes", max_len),
            ));
        }

        let n = match reader.read(&mut buffer[filled..]) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                buffer.clear();
                return Err(e);
            }
        };

        if n == 0 {
            // Peer closed before the terminator arrived
            buffer.clear();
            return Ok(filled);
        }

        filled += n;
        if buffer[filled - 1] == b'\n' {
            buffer.truncate(filled - 1);
            return Ok(filled);
        }
    }
}

/// Errors that end a connection early
#[derive(Debug)]
pub enum ConnectionError {
    Read(io::Error),
    Parse(ParseError),
    Reply(io::Error),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Read(e) => write!(f, "Unable to read the request: {}", e),
            ConnectionError::Parse(e) => write!(f, "Unable to analyze the request: {}", e),
            ConnectionError::Reply(e) => write!(f, "Failed to send the reply: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Read(e) | ConnectionError::Reply(e) => Some(e),
            ConnectionError::Parse(e) => Some(e),
        }
    }
}

/// Read, parse and answer one request on `stream`.
///
/// Returns the parsed request once the reply was written.
pub fn serve<S: Read + Write>(
    stream: &mut S,
    conn: ConnId,
    buffer_size: usize,
) -> Result<Request, ConnectionError> {
    let mut buffer = BytesMut::with_capacity(buffer_size);
    read_line(stream, &mut buffer, buffer_size).map_err(ConnectionError::Read)?;

    let req = request::parse(&buffer).map_err(ConnectionError::Parse)?;
    info!(
        conn,
        command = %req.command,
        target = %req.target,
        host = ?req.header("host"),
        headers = req.header_count(),
        "New request"
    );

    reply::write_reply(stream).map_err(ConnectionError::Reply)?;
    Ok(req)
}

/// Worker entry point: serve the connection, then close it.
pub fn handle_connection(
    mut stream: TcpStream,
    conn: ConnId,
    peer: SocketAddr,
    buffer_size: usize,
) {
    if let Err(e) = serve(&mut stream, conn, buffer_size) {
        error!(conn, peer = %peer, error = %e, "Connection failed");
    }
    drop(stream);
    info!(conn, "Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory stream handing out pre-recorded read chunks.
    struct MockStream {
        chunks: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
    }

    impl MockStream {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| Ok(c.to_vec())).collect(),
                written: Vec::new(),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(mut chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(Ok(chunk.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_line_single_chunk() {
        let mut stream = MockStream::new(&[b"GET / HTTP/1.1\r\n"]);
        let mut buf = BytesMut::new();
        let n = read_line(&mut stream, &mut buf, 64).unwrap();
        assert_eq!(n, 16);
        assert_eq!(&buf[..], b"GET / HTTP/1.1\r");
    }

    #[test]
    fn test_read_line_accumulates_chunks() {
        let mut stream = MockStream::new(&[b"GET / ", b"HTTP/1.1\r\nHo", b"st: x\r\n\r\n"]);
        let mut buf = BytesMut::new();
        let n = read_line(&mut stream, &mut buf, 64).unwrap();
        assert_eq!(n, 27);
        assert_eq!(&buf[..], b"GET / HTTP/1.1\r\nHost: x\r\n\r");
    }

    #[test]
    fn test_read_line_eof_yields_empty() {
        let mut stream = MockStream::new(&[]);
        let mut buf = BytesMut::new();
        assert_eq!(read_line(&mut stream, &mut buf, 64).unwrap(), 0);
        assert!(buf.is_empty());

        // Partial data followed by EOF is discarded as well
        let mut stream = MockStream::new(&[b"GET / HTTP"]);
        read_line(&mut stream, &mut buf, 64).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_line_propagates_error() {
        let mut stream = MockStream {
            chunks: VecDeque::from([
                Ok(b"GET".to_vec()),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            ]),
            written: Vec::new(),
        };
        let mut buf = BytesMut::new();
        let err = read_line(&mut stream, &mut buf, 64).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_read_line_retries_interrupted() {
        let mut stream = MockStream {
            chunks: VecDeque::from([
                Err(io::Error::new(io::ErrorKind::Interrupted, "signal")),
                Ok(b"GET / HTTP/1.1\n".to_vec()),
            ]),
            written: Vec::new(),
        };
        let mut buf = BytesMut::new();
        read_line(&mut stream, &mut buf, 64).unwrap();
        assert_eq!(&buf[..], b"GET / HTTP/1.1");
    }

    #[test]
    fn test_read_line_too_long() {
        let mut stream = MockStream::new(&[b"GET /aaaaaaaaaaaaaaaa HTTP/1.1\r\n"]);
        let mut buf = BytesMut::new();
        let err = read_line(&mut stream, &mut buf, 8).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_serve_literal_request() {
        let mut stream = MockStream::new(&[b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"]);
        let req = serve(&mut stream, 1, 1024).unwrap();
        assert_eq!(req.command, "GET");
        assert_eq!(req.target, "/");
        assert_eq!(req.header_count(), 1);
        assert_eq!(stream.written, b"HTTP/1.1 200 OK\r\n\r\nHello!\r\n");
    }

    #[test]
    fn test_serve_ignores_command_and_target() {
        let mut stream = MockStream::new(&[b"DELETE /nothing/here HTTP/1.0\r\n\r\n"]);
        serve(&mut stream, 2, 1024).unwrap();
        assert_eq!(stream.written, b"HTTP/1.1 200 OK\r\n\r\nHello!\r\n");
    }

    #[test]
    fn test_serve_parse_failure_sends_nothing() {
        let mut stream = MockStream::new(&[b"GET\r\n"]);
        let err = serve(&mut stream, 3, 1024).unwrap_err();
        assert!(matches!(err, ConnectionError::Parse(_)));
        assert!(stream.written.is_empty());
    }

    #[test]
    fn test_serve_read_failure_sends_nothing() {
        let mut stream = MockStream {
            chunks: VecDeque::from([Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))]),
            written: Vec::new(),
        };
        let err = serve(&mut stream, 4, 1024).unwrap_err();
        assert!(matches!(err, ConnectionError::Read(_)));
        assert!(stream.written.is_empty());
    }

    #[test]
    fn test_serve_empty_request() {
        let mut stream = MockStream::new(&[]);
        let err = serve(&mut stream, 5, 1024).unwrap_err();
        assert!(matches!(err, ConnectionError::Parse(_)));
    }
}
