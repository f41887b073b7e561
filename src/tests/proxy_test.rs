use std::sync::Arc;

use test_env_log::test;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};

use crate::floodgate::common::Shutdown;
use crate::floodgate::mongo::filter::{DbStats, QuotaFilter};
use crate::floodgate::mongo::protocol::{MsgHeader, OpCode};
use crate::tests::common::{
    capture_backend, echo_backend, message, read_until_eof, start_mongo_proxy, test_backend,
    test_filter_settings, wait_until, StaticStats, MB,
};

fn disabled_filter(backend: std::net::SocketAddr) -> Arc<QuotaFilter> {
    QuotaFilter::new(
        test_filter_settings(false, 1024, 100, ""),
        test_backend(backend, "db"),
        Shutdown::new(),
    )
}

fn enabled_filter(backend: std::net::SocketAddr, quota_mb: u32) -> Arc<QuotaFilter> {
    QuotaFilter::new(
        test_filter_settings(true, quota_mb, 100, ""),
        test_backend(backend, "db"),
        Shutdown::new(),
    )
}

#[test(tokio::test)]
async fn forwards_message_split_across_segments() {
    let backend = echo_backend().await;
    let stop = Shutdown::new();
    let (addr, _service) = start_mongo_proxy(backend, disabled_filter(backend), stop.clone()).await;

    let msg = message(OpCode::INSERT, 116);
    let mut client = TcpStream::connect(addr).await.unwrap();
    // header first, the 100 byte body in a separate segment
    client.write_all(&msg[..16]).await.unwrap();
    client.flush().await.unwrap();
    sleep(Duration::from_millis(50)).await;
    client.write_all(&msg[16..]).await.unwrap();

    let mut echoed = vec![0u8; 116];
    timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(echoed, msg);

    stop.raise();
}

#[test(tokio::test)]
async fn blocked_filter_severs_writes_but_not_reads() {
    let backend = echo_backend().await;
    let filter = enabled_filter(backend, 100);
    let stop = Shutdown::new();
    let (addr, _service) = start_mongo_proxy(backend, filter.clone(), stop.clone()).await;

    filter.block();

    // a query still passes while blocked
    let query = message(OpCode::QUERY, 64);
    let mut reader = TcpStream::connect(addr).await.unwrap();
    reader.write_all(&query).await.unwrap();
    let mut echoed = vec![0u8; 64];
    timeout(Duration::from_secs(5), reader.read_exact(&mut echoed))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(echoed, query);

    // an insert gets its session closed without a byte forwarded
    let mut writer = TcpStream::connect(addr).await.unwrap();
    writer.write_all(&message(OpCode::INSERT, 48)).await.unwrap();
    assert_eq!(read_until_eof(&mut writer).await, b"");

    stop.raise();
}

#[test(tokio::test)]
async fn dirty_monitor_blocks_following_inserts() {
    let (backend, mut captured) = capture_backend().await;
    let filter = enabled_filter(backend, 100);
    // backend reports 101 MiB used against a 100 MiB quota; the probe
    // delay keeps the first insert ahead of the monitor's verdict
    filter.start(Box::new(StaticStats::with_delay(
        DbStats {
            data_size: 100.5 * MB,
            index_size: 0.5 * MB,
            ..Default::default()
        },
        Duration::from_millis(100),
    )));
    let stop = Shutdown::new();
    let (addr, _service) = start_mongo_proxy(backend, filter.clone(), stop.clone()).await;

    let first = message(OpCode::INSERT, 40);
    let mut client = TcpStream::connect(addr).await.unwrap();
    // the first insert is forwarded and wakes the monitor
    client.write_all(&first).await.unwrap();
    wait_until(|| filter.is_blocked()).await;

    // the next insert on the same session closes it without forwarding
    client.write_all(&message(OpCode::INSERT, 40)).await.unwrap();
    assert_eq!(read_until_eof(&mut client).await, b"");
    let received = timeout(Duration::from_secs(5), captured.recv())
        .await
        .expect("backend capture timed out")
        .unwrap();
    assert_eq!(received, first);

    // a fresh session carrying a read still passes
    let query = message(OpCode::QUERY, 32);
    let mut reader = TcpStream::connect(addr).await.unwrap();
    reader.write_all(&query).await.unwrap();
    drop(reader);
    let received = timeout(Duration::from_secs(5), captured.recv())
        .await
        .expect("backend capture timed out")
        .unwrap();
    assert_eq!(received, query);

    stop.raise();
    filter.shutdown().await;
}

#[test(tokio::test)]
async fn oversized_message_terminates_session() {
    let (backend, mut captured) = capture_backend().await;
    let stop = Shutdown::new();
    let (addr, _service) = start_mongo_proxy(backend, disabled_filter(backend), stop.clone()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    // a declared length just past the frame limit
    let oversized = MsgHeader::encode((64 * 1024 + 1) as i32, 1, 0, OpCode::INSERT);
    client.write_all(&oversized).await.unwrap();
    assert_eq!(read_until_eof(&mut client).await, b"");
    let received = timeout(Duration::from_secs(5), captured.recv())
        .await
        .expect("backend capture timed out")
        .unwrap();
    assert_eq!(received, b"");

    stop.raise();
}

#[test(tokio::test)]
async fn shutdown_drains_sessions_and_is_idempotent() {
    let backend = echo_backend().await;
    let stop = Shutdown::new();
    let (addr, service) = start_mongo_proxy(backend, disabled_filter(backend), stop.clone()).await;

    let msg = message(OpCode::QUERY, 32);
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&msg).await.unwrap();
    let mut echoed = vec![0u8; 32];
    timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(service.manager().active_count(), 1);

    stop.raise();
    // the session is signalled and the client sees its connection close
    assert_eq!(read_until_eof(&mut client).await, b"");
    wait_until(|| service.manager().active_count() == 0).await;

    // a second shutdown pass has nothing left to do
    service.manager().shutdown().await;
    assert_eq!(service.manager().active_count(), 0);
}

#[test(tokio::test)]
async fn idle_sessions_are_reused() {
    let backend = echo_backend().await;
    let stop = Shutdown::new();
    let (addr, service) = start_mongo_proxy(backend, disabled_filter(backend), stop.clone()).await;

    for _ in 0..3 {
        let msg = message(OpCode::QUERY, 24);
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&msg).await.unwrap();
        let mut echoed = vec![0u8; 24];
        timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
            .await
            .expect("echo timed out")
            .unwrap();
        drop(client);
        wait_until(|| service.manager().active_count() == 0).await;
    }

    stop.raise();
}
