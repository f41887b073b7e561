#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, error};

use crate::floodgate::{Error, Result};
use crate::floodgate::config::LISTEN_BACKLOG;


pub struct Listener {
    pub address: String,
    listener: TcpListener,
}

impl Listener {
    pub fn new(address: String) -> Result<Self> {
        let addr = address.parse()?;
        let sock = TcpSocket::new_v4()?;
        #[cfg(unix)]
        sock.set_reuseaddr(true)?;
        sock.bind(addr)?;
        let listener = sock.listen(LISTEN_BACKLOG)?;
        Ok(Self {
            address,
            listener,
        })
    }

    /// The OS-assigned local address; the configured port may be 0 in tests.
    pub fn local_address(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_addr().map_err(Error::from)
    }

    pub async fn accept(&self) -> Option<TcpStream> {
        loop {
            match self.listener.accept().await {
                Ok((sock, remote_addr)) => {
                    debug!(fd = sock.as_raw_fd(), %remote_addr, server = %self.address.as_str(), "accept connection");
                    return Some(sock);
                },
                Err(e) => {
                    if cfg!(unix) && std::env::consts::OS == "linux" {
                        // Return an error only if it's not one of several known recoverable errors.
                        match e.raw_os_error().unwrap_or(0) {
                            libc::ECONNABORTED |
                            libc::EMFILE | // process file-descriptor limit
                            libc::ENFILE | // system wide file-descriptor limit
                            libc::ENOBUFS | // out of memory
                            libc::ENOMEM | // out of memory
                            libc::EPROTO | // protocol error
                            libc::EINTR => {
                                error!(%e, "accept error");
                                continue;
                            }, // interrupt
                            libc::EBADF => return None, // socket closed during shutdown
                            _ => panic!("unrecoverable error on {}: {}", self.address.as_str(), Error::from(e)),
                        }
                    }
                },
            }
        }
    }
}
