use std::sync::Arc;

use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::{info, warn};

use crate::floodgate::common::{Result, Shutdown};
use crate::floodgate::config::MongoBackend;
use crate::floodgate::mongo::filter::QuotaFilter;
use crate::floodgate::mongo::manager::SessionManager;
use crate::floodgate::server::{Conn, Listener};

/// Accepts MongoDB clients and pairs each with its own backend connection.
/// Every inbound session opens exactly one outbound socket; there is no
/// pooling or multiplexing in between.
pub struct MongoService {
    listener: Listener,
    backend: MongoBackend,
    filter: Arc<QuotaFilter>,
    manager: Arc<SessionManager>,
    stop: Arc<Shutdown>,
}

impl MongoService {
    pub fn new(
        address: String,
        backend: MongoBackend,
        filter: Arc<QuotaFilter>,
        stop: Arc<Shutdown>,
    ) -> Result<Self> {
        Ok(MongoService {
            listener: Listener::new(address)?,
            backend,
            filter,
            manager: SessionManager::new(),
            stop,
        })
    }

    /// The bound listen address; useful when the configured port was 0.
    pub fn local_address(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_address()
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub async fn run(&self) {
        info!(address = %self.listener.address.as_str(), "starting mongo proxy service");
        loop {
            let sock = tokio::select! {
                _ = self.stop.wait() => break,
                sock = self.listener.accept() => match sock {
                    Some(sock) => sock,
                    None => break,
                },
            };
            let backend = match self.dial_backend().await {
                Ok(conn) => conn,
                Err(e) => {
                    // only the client is disconnected, the proxy keeps serving
                    warn!(%e, "could not reach the backend, dropping client");
                    continue;
                },
            };
            let session = self.manager.attach(Conn::new_tcp(sock), backend, self.filter.clone());
            session.spawn();
        }
        info!("stopping mongo proxy service");
        self.manager.shutdown().await;
        self.filter.shutdown().await;
    }

    async fn dial_backend(&self) -> Result<Conn> {
        #[cfg(unix)]
        if !self.backend.socket_path.is_empty() {
            let stream = UnixStream::connect(&self.backend.socket_path).await?;
            return Ok(Conn::new_unix(stream));
        }
        let stream = TcpStream::connect(self.backend.address()).await?;
        Ok(Conn::new_tcp(stream))
    }
}
