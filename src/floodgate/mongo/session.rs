use std::sync::{Arc, Weak};
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::AcqRel;

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::debug;

use crate::floodgate::common::{Error, Result};
use crate::floodgate::mongo::buffer::{FrameBuffer, FRAME_BUFFER_SIZE};
use crate::floodgate::mongo::filter::QuotaFilter;
use crate::floodgate::mongo::manager::SessionManager;
use crate::floodgate::mongo::protocol::{Frame, Framer};
use crate::floodgate::server::{flush_or_readable, Conn};

/// One proxied client: the client-facing socket paired with its dedicated
/// backend socket and two independent forwarders, one per direction. Only
/// the client-to-backend direction is framed and filtered; backend replies
/// are relayed verbatim.
pub struct Session {
    sid: u64,
    client: Conn,
    backend: Conn,
    filter: Arc<QuotaFilter>,
    client_shutdown: Notify,
    backend_shutdown: Notify,
    live_forwarders: AtomicU32,
    /// non-owning handle used only for the mark-idle notification;
    /// the manager owns the session
    manager: Weak<SessionManager>,
}

impl Session {
    pub(crate) fn new(
        sid: u64,
        client: Conn,
        backend: Conn,
        filter: Arc<QuotaFilter>,
        manager: Weak<SessionManager>,
    ) -> Self {
        Session {
            sid,
            client,
            backend,
            filter,
            client_shutdown: Notify::new(),
            backend_shutdown: Notify::new(),
            live_forwarders: AtomicU32::new(2),
            manager,
        }
    }

    /// Re-arms a reclaimed session for a fresh socket pair. Fresh shutdown
    /// handles, a stale signal aimed at the previous tenant must not fire.
    pub(crate) fn reset(&mut self, client: Conn, backend: Conn) {
        self.client = client;
        self.backend = backend;
        self.client_shutdown = Notify::new();
        self.backend_shutdown = Notify::new();
        *self.live_forwarders.get_mut() = 2;
    }

    pub fn sid(&self) -> u64 {
        self.sid
    }

    /// Starts both forwarders. Each closes its source's read half and its
    /// sink's write half on exit, so the peer forwarder observes a clean
    /// end-of-stream and the pair winds down together.
    pub fn spawn(self: &Arc<Self>) {
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session.forward_client().await {
                debug!(sid = session.sid, %e, "client forwarder failed");
            }
            session.client.shutdown_read();
            session.backend.shutdown_write();
            debug!(sid = session.sid, "client forwarder exits");
            session.forwarder_done();
        });
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session.forward_backend().await {
                debug!(sid = session.sid, %e, "backend forwarder failed");
            }
            session.backend.shutdown_read();
            session.client.shutdown_write();
            debug!(sid = session.sid, "backend forwarder exits");
            session.forwarder_done();
        });
    }

    /// Asks both forwarders to exit at their next suspension point.
    pub fn shutdown(&self) {
        self.client_shutdown.notify_one();
        self.backend_shutdown.notify_one();
    }

    fn forwarder_done(&self) {
        if self.live_forwarders.fetch_sub(1, AcqRel) == 1 {
            if let Some(manager) = self.manager.upgrade() {
                manager.reclaim(self.sid);
            }
        }
    }

    /// Client-to-backend direction: reassemble message boundaries, consult
    /// the filter, forward. A filter denial ends the session; the client
    /// sees its connection close instead of an error reply.
    async fn forward_client(&self) -> Result<()> {
        let mut buf = FrameBuffer::new(FRAME_BUFFER_SIZE);
        let mut framer = Framer::new();
        loop {
            tokio::select! {
                _ = self.client_shutdown.notified() => break,
                ready = flush_or_readable(&self.client, &self.backend) => ready?,
            }
            let nread = match self.client.try_read(buf.cursor()) {
                Ok(nread) => nread,
                Err(e) if e == Error::closed() => break,
                Err(e) => return Err(e),
            };
            if nread == 0 {
                continue; // spurious readiness
            }
            buf.forward(nread);

            let op = match framer.observe(buf.data(), buf.capacity())? {
                // only a partial header so far, forward nothing yet
                Frame::Incomplete => continue,
                Frame::Start(op) => {
                    if self.filter.enabled() {
                        self.filter.note_dirty(op);
                    }
                    op
                },
                Frame::Continue(op) => op,
            };

            if !self.filter.pass(op) {
                debug!(sid = self.sid, %op, "session blocked by storage quota");
                break;
            }

            let chunk = Bytes::copy_from_slice(buf.data());
            let nwrite = chunk.len();
            self.backend.write_or_buffer(chunk)?;
            framer.consume(nwrite);
            buf.reset();
        }
        Ok(())
    }

    /// Backend-to-client direction: not framed, bytes are forwarded
    /// verbatim as they arrive.
    async fn forward_backend(&self) -> Result<()> {
        let mut buf = vec![0u8; FRAME_BUFFER_SIZE];
        loop {
            tokio::select! {
                _ = self.backend_shutdown.notified() => break,
                ready = flush_or_readable(&self.backend, &self.client) => ready?,
            }
            let nread = match self.backend.try_read(&mut buf) {
                Ok(nread) => nread,
                Err(e) if e == Error::closed() => break,
                Err(e) => return Err(e),
            };
            if nread == 0 {
                continue;
            }
            self.client.write_or_buffer(Bytes::copy_from_slice(&buf[..nread]))?;
        }
        Ok(())
    }
}
