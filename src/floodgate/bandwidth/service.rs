use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::floodgate::bandwidth::budget::DayBudget;
use crate::floodgate::common::{Error, Result, Shutdown};
use crate::floodgate::config::Tunnel;
use crate::floodgate::server::{flush_or_readable, Conn, Listener};

const RELAY_BUFFER_SIZE: usize = 64 * 1024;

/// One bandwidth-limited relay path: clients on the external port are
/// forwarded byte-for-byte to the inner port, with every forwarded chunk
/// charged against the path's daily budget.
pub struct BandwidthService {
    listener: Listener,
    inner_address: String,
    budget: Arc<DayBudget>,
    stop: Arc<Shutdown>,
}

impl BandwidthService {
    pub fn new(tunnel: &Tunnel, stop: Arc<Shutdown>) -> Result<Self> {
        Self::from_parts(tunnel.listen_address(), tunnel.inner_address(), tunnel.block_size, stop)
    }

    pub fn from_parts(
        address: String,
        inner_address: String,
        block_size: u64,
        stop: Arc<Shutdown>,
    ) -> Result<Self> {
        Ok(BandwidthService {
            listener: Listener::new(address)?,
            inner_address,
            budget: Arc::new(DayBudget::new(block_size)),
            stop,
        })
    }

    /// The bound listen address; useful when the configured port was 0.
    pub fn local_address(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_address()
    }

    pub fn budget(&self) -> &Arc<DayBudget> {
        &self.budget
    }

    pub async fn run(&self) {
        info!(
            address = %self.listener.address.as_str(),
            inner = %self.inner_address.as_str(),
            capacity = self.budget.block_size(),
            "starting bandwidth relay",
        );
        loop {
            let sock = tokio::select! {
                _ = self.stop.wait() => break,
                sock = self.listener.accept() => match sock {
                    Some(sock) => sock,
                    None => break,
                },
            };
            self.budget.roll_over_if_due();
            if self.budget.blocked() {
                info!(address = %self.listener.address.as_str(), "budget exhausted, refusing connection");
                continue;
            }
            let inner = match TcpStream::connect(&self.inner_address).await {
                Ok(inner) => inner,
                Err(e) => {
                    warn!(%e, inner = %self.inner_address.as_str(), "could not reach the inner port, dropping client");
                    continue;
                },
            };
            let client = Arc::new(Conn::new_tcp(sock));
            let inner = Arc::new(Conn::new_tcp(inner));
            tokio::spawn(pump(client.clone(), inner.clone(), self.budget.clone(), self.stop.clone()));
            tokio::spawn(pump(inner, client, self.budget.clone(), self.stop.clone()));
        }
        info!(address = %self.listener.address.as_str(), "stopping bandwidth relay");
    }
}

/// Half-duplex forwarder. Exits on end-of-stream, error, budget exhaustion
/// or shutdown, then half-closes both sockets so the opposite forwarder
/// winds down too.
async fn pump(source: Arc<Conn>, sink: Arc<Conn>, budget: Arc<DayBudget>, stop: Arc<Shutdown>) {
    if let Err(e) = pump_inner(&source, &sink, &budget, &stop).await {
        debug!(%e, "tunnel forwarder failed");
    }
    source.shutdown_read();
    sink.shutdown_write();
}

async fn pump_inner(
    source: &Conn,
    sink: &Conn,
    budget: &DayBudget,
    stop: &Shutdown,
) -> Result<()> {
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = stop.wait() => break,
            ready = flush_or_readable(source, sink) => ready?,
        }
        let nread = match source.try_read(&mut buf) {
            Ok(nread) => nread,
            Err(e) if e == Error::closed() => break,
            Err(e) => return Err(e),
        };
        if nread == 0 {
            continue; // spurious readiness
        }
        // charge the chunk before forwarding: a chunk that busts the budget
        // is dropped, not delivered
        if !budget.try_consume(nread as u64) {
            info!(passed = budget.passed(), capacity = budget.block_size(), "daily budget exhausted, closing session");
            break;
        }
        sink.write_or_buffer(Bytes::copy_from_slice(&buf[..nread]))?;
    }
    Ok(())
}
