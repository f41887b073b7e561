use std::io;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::info;

use crate::floodgate::common::{Error, Result};

/// One non-blocking socket, TCP or unix-domain, accessed through the
/// readiness API so a single &self handle can be shared by both
/// directions of a session.
pub(crate) enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    pub fn new_tcp(stream: TcpStream) -> Self {
        Transport::Tcp(stream)
    }

    #[cfg(unix)]
    pub fn new_unix(stream: UnixStream) -> Self {
        Transport::Unix(stream)
    }

    pub async fn readable(&self) -> Result<()> {
        match self {
            Transport::Tcp(s) => s.readable().await.map_err(Error::from),
            #[cfg(unix)]
            Transport::Unix(s) => s.readable().await.map_err(Error::from),
        }
    }

    pub async fn writable(&self) -> Result<()> {
        match self {
            Transport::Tcp(s) => s.writable().await.map_err(Error::from),
            #[cfg(unix)]
            Transport::Unix(s) => s.writable().await.map_err(Error::from),
        }
    }

    /// Returns Ok(0) when the socket is not ready (WouldBlock) and
    /// Err(closed) at end-of-stream, so callers can loop on readiness
    /// without special-casing io::ErrorKind.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize> {
        let result = match self {
            Transport::Tcp(s) => s.try_read(buf),
            #[cfg(unix)]
            Transport::Unix(s) => s.try_read(buf),
        };
        match result {
            Ok(0) => {
                info!("EOF reading from socket (remote end is closed)");
                Err(Error::closed())
            },
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Returns Ok(0) when the socket is not ready (WouldBlock).
    pub fn try_write(&self, buf: &[u8]) -> Result<usize> {
        let result = match self {
            Transport::Tcp(s) => s.try_write(buf),
            #[cfg(unix)]
            Transport::Unix(s) => s.try_write(buf),
        };
        match result {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::from(e)),
        }
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> i32 {
        match self {
            Transport::Tcp(s) => s.as_raw_fd(),
            Transport::Unix(s) => s.as_raw_fd(),
        }
    }

    /// Half-close: shut down the receive side, leaving the peer's read
    /// direction operable. Errors (e.g. an already-reset socket) are ignored,
    /// the forwarder is exiting either way.
    pub fn shutdown_read(&self) {
        #[cfg(unix)]
        unsafe {
            libc::shutdown(self.raw_fd(), libc::SHUT_RD);
        }
    }

    /// Half-close: shut down the send side so the peer observes a clean
    /// end-of-stream.
    pub fn shutdown_write(&self) {
        #[cfg(unix)]
        unsafe {
            libc::shutdown(self.raw_fd(), libc::SHUT_WR);
        }
    }
}
