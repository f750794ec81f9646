//! End-to-end tests over the line protocol.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edge_proxy::config::ProtocolKind;
use tokio::net::TcpStream;

mod common;
use common::{LineClient, TestProxy};

/// Backend that counts fetches per process and answers `value:<line>`,
/// sleeping `delay` first.
async fn counting_backend(delay: Duration) -> (std::net::SocketAddr, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let addr = common::start_line_backend(move |line| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            format!("value:{line}")
        }
    })
    .await;
    (addr, calls)
}

async fn proxy_for(backends: &[std::net::SocketAddr]) -> TestProxy {
    common::start_proxy(common::test_config(ProtocolKind::Line, backends)).await
}

#[tokio::test]
async fn concurrent_misses_share_one_fetch() {
    let (backend, calls) = counting_backend(Duration::from_millis(200)).await;
    let proxy = proxy_for(&[backend]).await;

    let mut clients = Vec::new();
    for _ in 0..10 {
        let addr = proxy.addr;
        clients.push(tokio::spawn(async move { common::line_request(addr, "GET shared").await }));
    }
    for client in clients {
        assert_eq!(client.await.unwrap(), "value:GET shared");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn pipelined_responses_keep_request_order() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let backend = common::start_line_backend(move |line| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            if line == "slow" {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            format!("value:{line}")
        }
    })
    .await;
    let proxy = proxy_for(&[backend]).await;

    let mut client = LineClient::new(TcpStream::connect(proxy.addr).await.unwrap());
    client.send_raw(b"slow\nfast\n").await;

    assert_eq!(client.recv().await.unwrap(), "value:slow");
    assert_eq!(client.recv().await.unwrap(), "value:fast");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn fresh_entry_is_served_from_cache_until_it_expires() {
    let (backend, calls) = counting_backend(Duration::ZERO).await;
    let mut config = common::test_config(ProtocolKind::Line, &[backend]);
    config.cache.default_ttl_secs = 1;
    let proxy = common::start_proxy(config).await;

    assert_eq!(common::line_request(proxy.addr, "k").await, "value:k");
    assert_eq!(common::line_request(proxy.addr, "k").await, "value:k");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(common::line_request(proxy.addr, "k").await, "value:k");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn least_recently_used_entry_is_evicted_at_capacity() {
    let (backend, calls) = counting_backend(Duration::ZERO).await;
    let mut config = common::test_config(ProtocolKind::Line, &[backend]);
    config.cache.capacity = 2;
    let proxy = common::start_proxy(config).await;

    for key in ["A", "B", "C"] {
        common::line_request(proxy.addr, key).await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // B and C are cached; A was evicted.
    common::line_request(proxy.addr, "C").await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    common::line_request(proxy.addr, "A").await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn failover_hides_dead_backend_and_marks_it_unhealthy() {
    let dead = common::closed_port().await;
    let (live, calls) = counting_backend(Duration::ZERO).await;
    let proxy = proxy_for(&[dead, live]).await;

    for i in 0..5 {
        let key = format!("key-{i}");
        assert_eq!(common::line_request(proxy.addr, &key).await, format!("value:{key}"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    let pool = &proxy.services.pool;
    assert!(!pool.backends()[0].is_healthy());
    assert!(pool.backends()[1].is_healthy());
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn unreachable_backend_yields_error_reply() {
    let dead = common::closed_port().await;
    let proxy = proxy_for(&[dead]).await;

    assert_eq!(common::line_request(proxy.addr, "k").await, "-ERR connect_refused");
    // Failures are not cached.
    assert!(!proxy.services.cache.as_ref().unwrap().contains(&edge_proxy::cache::CacheKey::new("k")));
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn idle_connection_is_closed() {
    let (backend, _) = counting_backend(Duration::ZERO).await;
    let mut config = common::test_config(ProtocolKind::Line, &[backend]);
    config.timeouts.idle_secs = 1;
    let proxy = common::start_proxy(config).await;

    let mut client = LineClient::new(TcpStream::connect(proxy.addr).await.unwrap());
    client.send("k").await;
    assert_eq!(client.recv().await.unwrap(), "value:k");

    // No more traffic: the proxy closes after the idle timeout.
    assert_eq!(client.recv().await, None);
    assert!(common::eventually(|| proxy.tracker.active_count() == 0).await);
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn oversized_request_is_rejected_and_closed() {
    let (backend, calls) = counting_backend(Duration::ZERO).await;
    let mut config = common::test_config(ProtocolKind::Line, &[backend]);
    config.protocol.max_request_bytes = 16;
    let proxy = common::start_proxy(config).await;

    let mut client = LineClient::new(TcpStream::connect(proxy.addr).await.unwrap());
    client.send_raw(&[b'x'; 64]).await;

    let reply = client.recv().await.unwrap();
    assert!(reply.starts_with("-ERR"), "unexpected reply {reply:?}");
    assert_eq!(client.recv().await, None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn every_accepted_connection_is_closed_exactly_once() {
    let (backend, _) = counting_backend(Duration::ZERO).await;
    let mut config = common::test_config(ProtocolKind::Line, &[backend]);
    config.timeouts.idle_secs = 1;
    config.protocol.max_request_bytes = 16;
    let proxy = common::start_proxy(config).await;

    // Idle timeout: connects and never sends.
    let mut idle = LineClient::new(TcpStream::connect(proxy.addr).await.unwrap());

    // Client EOF.
    let mut eof = LineClient::new(TcpStream::connect(proxy.addr).await.unwrap());
    eof.send("a").await;
    eof.recv().await.unwrap();
    drop(eof);

    // Protocol error.
    let mut bad = LineClient::new(TcpStream::connect(proxy.addr).await.unwrap());
    bad.send_raw(&[b'x'; 64]).await;
    bad.recv().await.unwrap();

    assert_eq!(idle.recv().await, None);

    // Forced shutdown: still open when the proxy stops.
    let mut open = LineClient::new(TcpStream::connect(proxy.addr).await.unwrap());
    open.send("b").await;
    open.recv().await.unwrap();
    proxy.shutdown.trigger();
    assert_eq!(open.recv().await, None);

    assert!(common::eventually(|| proxy.tracker.active_count() == 0).await);
    assert_eq!(proxy.tracker.accepted_count(), 4);
    assert_eq!(proxy.tracker.closed_count(), 4);
}
