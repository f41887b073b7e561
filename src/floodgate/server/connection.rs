use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;

use bytes::{Buf, Bytes};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::floodgate::common::{Error, Result};
use crate::floodgate::server::transport::Transport;

/// One side of a relay session: a socket plus the write-hold state for
/// bytes accepted from the peer direction that the socket could not take
/// yet. Each session direction owns its buffers; nothing here is shared
/// across sessions.
pub struct Conn {
    transport: Transport,
    has_backlog: AtomicBool,
    backlog: Mutex<VecDeque<Bytes>>,
}

impl Conn {
    pub fn new_tcp(stream: TcpStream) -> Self {
        Self::new(Transport::new_tcp(stream))
    }

    #[cfg(unix)]
    pub fn new_unix(stream: UnixStream) -> Self {
        Self::new(Transport::new_unix(stream))
    }

    fn new(transport: Transport) -> Self {
        Conn {
            transport,
            has_backlog: AtomicBool::new(false),
            backlog: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns true if the write-hold buffer is non-empty.
    pub fn has_backlog(&self) -> bool {
        self.has_backlog.load(Relaxed)
    }

    fn set_has_backlog(&self, value: bool) {
        // Relaxed because the backlog mutex release is a barrier
        self.has_backlog.store(value, Relaxed);
    }

    pub async fn readable(&self) -> Result<()> {
        self.transport.readable().await
    }

    pub async fn writable(&self) -> Result<()> {
        self.transport.writable().await
    }

    /// Attempts to read some bytes without blocking. Ok(0) means the socket
    /// was not ready; Err(closed) means end-of-stream.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize> {
        self.transport.try_read(buf)
    }

    /// Writes all the bytes in buf to the socket without blocking, or holds
    /// the unsent tail (without copying) to send later. Takes ownership of
    /// buf in all cases. Returns the number of bytes actually written
    /// (not held).
    pub fn write_or_buffer(&self, mut buf: Bytes) -> Result<usize> {
        // We always have to acquire the mutex, even if the backlog appears
        // empty, otherwise another task could write the backlog and overlap
        // write() calls with us here. The backlog mutex must be held when
        // writing so the logical writes are atomic and ordered correctly.
        let mut bytes_written = 0;
        let mut backlog = self.backlog.lock().map_err(Error::from)?;
        if backlog.is_empty() {
            // If the backlog is empty, maybe we can write this to the socket
            bytes_written = self.transport.try_write(buf.chunk())?;
            if bytes_written < buf.remaining() {
                buf.advance(bytes_written);
            } else {
                return Ok(bytes_written);
            }
        }
        // Else the socket is not ready for writing, hold buf until it is.
        backlog.push_back(buf);
        self.set_has_backlog(true);

        Ok(bytes_written)
    }

    /// Tries to write held bytes to the socket. Call when the socket is
    /// ready for writing. Returns the number of bytes written.
    pub fn try_write_backlog(&self) -> Result<usize> {
        if !self.has_backlog() {
            return Ok(0);
        }

        let mut backlog = self.backlog.lock().map_err(Error::from)?;
        let mut write_bytes = 0;
        loop {
            if let Some(bytes) = backlog.front_mut() {
                let n = self.transport.try_write(bytes.chunk())?;
                write_bytes += n;
                if n == 0 {
                    break;
                } else if n < bytes.remaining() {
                    bytes.advance(n);
                } else {
                    // n == bytes.remaining()
                    backlog.pop_front();
                }
            } else {
                self.set_has_backlog(false);
                break;
            }
        }
        Ok(write_bytes)
    }

    pub fn shutdown_read(&self) {
        self.transport.shutdown_read();
    }

    pub fn shutdown_write(&self) {
        self.transport.shutdown_write();
    }
}

/// One step of the forwarding readiness protocol: while the sink holds
/// residual bytes the forwarder flushes those first, not reading more from
/// the source until they drain, then waits for source readability.
/// Returns when the source may be read without blocking.
pub async fn flush_or_readable(source: &Conn, sink: &Conn) -> Result<()> {
    while sink.has_backlog() {
        sink.writable().await?;
        sink.try_write_backlog()?;
    }
    source.readable().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn pair() -> (Conn, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Conn::new_tcp(server), client)
    }

    #[tokio::test]
    async fn write_or_buffer_preserves_order() {
        let (conn, mut peer) = pair().await;

        conn.writable().await.unwrap();
        conn.write_or_buffer(Bytes::from_static(b"alpha")).unwrap();
        conn.write_or_buffer(Bytes::from_static(b"beta")).unwrap();
        while conn.has_backlog() {
            conn.writable().await.unwrap();
            conn.try_write_backlog().unwrap();
        }

        let mut got = vec![0u8; 9];
        peer.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"alphabeta");
    }

    #[tokio::test]
    async fn try_read_reports_close() {
        let (conn, peer) = pair().await;
        drop(peer);

        let mut buf = [0u8; 16];
        loop {
            conn.readable().await.unwrap();
            match conn.try_read(&mut buf) {
                Ok(0) => continue, // spurious readiness
                Ok(_) => panic!("no data was written"),
                Err(e) => {
                    assert_eq!(e, Error::closed());
                    break;
                },
            }
        }
    }
}
