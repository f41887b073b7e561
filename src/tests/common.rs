use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

use crate::floodgate::common::{Result, Shutdown};
use crate::floodgate::config::{FilterSettings, MongoBackend};
use crate::floodgate::mongo::filter::{DbStats, QuotaFilter, StatsSource};
use crate::floodgate::mongo::protocol::{MsgHeader, OpCode, HEADER_LEN};
use crate::floodgate::mongo::MongoService;

pub const MB: f64 = 1024.0 * 1024.0;

/// A backend that echoes every byte straight back to the sender.
pub async fn echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if sock.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        },
                    }
                }
            });
        }
    });
    addr
}

/// A backend that records everything received on each connection and
/// delivers the capture once the sender closes.
pub async fn capture_backend() -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut received = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => received.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = tx.send(received);
            });
        }
    });
    (addr, rx)
}

/// A complete wire message of the given total length (header included).
pub fn message(op: OpCode, total_len: usize) -> Vec<u8> {
    assert!(total_len >= HEADER_LEN);
    let mut bytes = MsgHeader::encode(total_len as i32, 1, 0, op).to_vec();
    bytes.resize(total_len, 0x42);
    bytes
}

pub fn test_backend(addr: SocketAddr, dbname: &str) -> MongoBackend {
    MongoBackend {
        host: addr.ip().to_string(),
        port: addr.port(),
        socket_path: String::new(),
        dbname: dbname.to_string(),
        user: String::new(),
        pass: String::new(),
    }
}

pub fn test_filter_settings(
    enabled: bool,
    quota_mb: u32,
    quota_files: u32,
    base_dir: &str,
) -> FilterSettings {
    FilterSettings {
        enabled,
        base_dir: base_dir.to_string(),
        quota_data_size: quota_mb,
        quota_files,
        fs_reserved_blocks: 0.05,
    }
}

/// Starts a mongo proxy on an ephemeral port. Returns the address clients
/// should dial and the running service.
pub async fn start_mongo_proxy(
    backend: SocketAddr,
    filter: Arc<QuotaFilter>,
    stop: Arc<Shutdown>,
) -> (SocketAddr, Arc<MongoService>) {
    let service = Arc::new(
        MongoService::new(
            "127.0.0.1:0".to_string(),
            test_backend(backend, "db"),
            filter,
            stop,
        )
        .expect("could not start mongo proxy"),
    );
    let addr = service.local_address().unwrap();
    let runner = service.clone();
    tokio::spawn(async move { runner.run().await });
    (addr, service)
}

/// Stats source that always reports the same sizes, optionally after a
/// delay so tests can rely on in-flight traffic beating the monitor.
pub struct StaticStats {
    stats: DbStats,
    delay: Duration,
}

impl StaticStats {
    pub fn new(stats: DbStats) -> Self {
        Self::with_delay(stats, Duration::from_millis(0))
    }

    pub fn with_delay(stats: DbStats, delay: Duration) -> Self {
        StaticStats { stats, delay }
    }
}

impl StatsSource for StaticStats {
    fn fetch(&mut self) -> BoxFuture<'_, Result<DbStats>> {
        let stats = self.stats;
        let delay = self.delay;
        Box::pin(async move {
            sleep(delay).await;
            Ok(stats)
        })
    }
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Reads until the peer closes, bounded so a stuck stream fails the test
/// instead of hanging it.
pub async fn read_until_eof(sock: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match timeout(Duration::from_secs(5), sock.read(&mut buf))
            .await
            .expect("read timed out")
        {
            Ok(0) | Err(_) => break,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
    received
}
