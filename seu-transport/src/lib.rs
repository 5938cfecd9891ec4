//! 4-byte big-endian length-prefixed framing over stream sockets (spec §4.A).
//!
//! Used for orchestrator<->agent and orchestrator<->plugin traffic. Blocking
//! send/recv; callers that need reconnection (the debugger channel, the
//! plugin channel) wrap a [`FramedStream`] and call [`FramedStream::rebind`]
//! on a `ConnectionLost` error.

use seu_core::error::Error;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

const LEN_HEADER_SIZE: usize = 4;

/// Sends `payload` as one frame: 4-byte big-endian length, then the bytes.
pub fn send(sock: &mut impl Write, payload: &[u8]) -> Result<(), Error> {
    let len = payload.len() as u32;
    sock.write_all(&len.to_be_bytes())
        .map_err(|source| Error::Io { source })?;
    sock.write_all(payload)
        .map_err(|source| Error::Io { source })?;
    Ok(())
}

/// Sends a UTF-8 string frame.
pub fn send_str(sock: &mut impl Write, payload: &str) -> Result<(), Error> {
    send(sock, payload.as_bytes())
}

/// Receives one frame, looping until the declared length is read.
///
/// A short read (zero bytes) or socket error while reading the length
/// header fails with `ConnectionLost`, matching spec §4.A.
pub fn recv(sock: &mut impl Read) -> Result<Vec<u8>, Error> {
    let mut header = [0u8; LEN_HEADER_SIZE];
    read_exact_or_lost(sock, &mut header)?;
    let len = u32::from_be_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    read_exact_or_lost(sock, &mut payload)?;
    Ok(payload)
}

pub fn recv_str(sock: &mut impl Read) -> Result<String, Error> {
    let bytes = recv(sock)?;
    String::from_utf8(bytes).map_err(|e| Error::ConnectionLost {
        reason: format!("non-utf8 frame payload: {}", e),
    })
}

/// Like `Read::read_exact`, but a `UnexpectedEof`/zero-length read is
/// reported as `ConnectionLost` rather than the generic io error kind,
/// and partial reads are concatenated rather than requiring one syscall.
fn read_exact_or_lost(sock: &mut impl Read, buf: &mut [u8]) -> Result<(), Error> {
    let mut read = 0;
    while read < buf.len() {
        match sock.read(&mut buf[read..]) {
            Ok(0) => {
                return Err(Error::ConnectionLost {
                    reason: "socket closed mid-frame".to_string(),
                })
            }
            Ok(n) => read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(Error::ConnectionLost {
                    reason: source.to_string(),
                })
            }
        }
    }
    Ok(())
}

/// A TCP connection that can be torn down and rebound in place, so the
/// send/receive threads owning it (spec §5) don't need to be restarted.
pub struct FramedStream {
    stream: TcpStream,
}

impl FramedStream {
    pub fn connect(addr: impl std::net::ToSocketAddrs) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr).map_err(|source| Error::Io { source })?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        stream.set_nodelay(true).ok();
        Self { stream }
    }

    /// Replaces the underlying socket, e.g. after a `reset_socket` sentinel
    /// (spec §5 "send and receive threads rebind in order").
    pub fn rebind(&mut self, addr: impl std::net::ToSocketAddrs) -> Result<(), Error> {
        self.stream = TcpStream::connect(addr).map_err(|source| Error::Io { source })?;
        self.stream.set_nodelay(true).ok();
        Ok(())
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        send(&mut self.stream, payload)
    }

    pub fn send_str(&mut self, payload: &str) -> Result<(), Error> {
        send_str(&mut self.stream, payload)
    }

    pub fn recv(&mut self) -> Result<Vec<u8>, Error> {
        recv(&mut self.stream)
    }

    pub fn recv_str(&mut self) -> Result<String, Error> {
        recv_str(&mut self.stream)
    }

    pub fn try_clone(&self) -> Result<Self, Error> {
        let stream = self.stream.try_clone().map_err(|source| Error::Io { source })?;
        Ok(Self { stream })
    }

    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<(), Error> {
        self.stream
            .set_read_timeout(timeout)
            .map_err(|source| Error::Io { source })
    }
}

/// Binds a listener and accepts exactly one connection, blocking up to
/// `timeout`. Used for the orchestrator's plugin-accept handshake (spec §4.B:
/// "the orchestrator's side accepts a TCP connection from the plugin before
/// the process begins executing guest code").
pub fn accept_one(
    listener: &TcpListener,
    timeout: std::time::Duration,
) -> Result<FramedStream, Error> {
    listener
        .set_nonblocking(false)
        .map_err(|source| Error::Io { source })?;
    let start = std::time::Instant::now();
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => return Ok(FramedStream::from_stream(stream)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(source) => return Err(Error::Io { source }),
        }
        if start.elapsed() >= timeout {
            return Err(Error::QueueTimeout {
                what: "plugin connection accept".to_string(),
            });
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn frame_round_trips_over_a_buffer() {
        let mut buf = Vec::new();
        send(&mut buf, b"hello world").unwrap();
        let mut cursor = Cursor::new(buf);
        let payload = recv(&mut cursor).unwrap();
        assert_eq!(payload, b"hello world");
    }

    #[test]
    fn frame_round_trips_arbitrary_payload_sizes() {
        for len in [0usize, 1, 255, 4096, 70_000] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut buf = Vec::new();
            send(&mut buf, &payload).unwrap();
            let mut cursor = Cursor::new(buf);
            assert_eq!(recv(&mut cursor).unwrap(), payload);
        }
    }

    #[test]
    fn short_header_read_is_connection_lost() {
        let mut cursor = Cursor::new(vec![0u8, 0u8]);
        let err = recv(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::ConnectionLost { .. }));
    }

    #[test]
    fn framed_stream_round_trips_over_real_sockets() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut server = FramedStream::from_stream(stream);
            let msg = server.recv_str().unwrap();
            server.send_str(&format!("echo:{}", msg)).unwrap();
        });
        let mut client = FramedStream::connect(addr).unwrap();
        client.send_str("ping").unwrap();
        let reply = client.recv_str().unwrap();
        assert_eq!(reply, "echo:ping");
        server.join().unwrap();
    }
}
