//! TCP Pool Integration Tests
//!
//! These tests run the pool against real sockets:
//! - Leased connections carry bytes end to end and are reused on release
//! - A node refusing connections is excluded after its failure budget
//! - A peer that hangs up on an idle connection is detected and replaced
//! - Closing the pool closes every socket
//!
//! All servers bind `127.0.0.1:0` so tests can run in parallel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nodepool_client::{ConnectionPool, NodeHealth, PoolConfig};
use nodepool_common::transport::{Connection, TcpConnector};
use nodepool_common::{Node, PoolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Echo server that counts accepted sockets and observed EOFs.
struct TestServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    eofs: Arc<AtomicUsize>,
    hangup: broadcast::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let eofs = Arc::new(AtomicUsize::new(0));
        let (hangup, _) = broadcast::channel(4);

        let server_accepted = accepted.clone();
        let server_eofs = eofs.clone();
        let server_hangup = hangup.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                server_accepted.fetch_add(1, Ordering::SeqCst);
                let eofs = server_eofs.clone();
                let mut hangup = server_hangup.subscribe();

                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    loop {
                        tokio::select! {
                            read = stream.read(&mut buf) => match read {
                                Ok(0) | Err(_) => {
                                    eofs.fetch_add(1, Ordering::SeqCst);
                                    break;
                                }
                                Ok(n) => {
                                    if stream.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                            },
                            _ = hangup.recv() => break,
                        }
                    }
                });
            }
        });

        Self {
            addr,
            accepted,
            eofs,
            hangup,
        }
    }

    fn node(&self) -> Node {
        Node::new("127.0.0.1", self.addr)
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Drops every socket accepted so far.
    fn hang_up(&self) {
        let _ = self.hangup.send(());
    }

    async fn wait_for_eofs(&self, expected: usize) {
        for _ in 0..200 {
            if self.eofs.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "server saw {} EOFs, expected {}",
            self.eofs.load(Ordering::SeqCst),
            expected
        );
    }
}

/// An address nothing listens on.
async fn refused_node() -> Node {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Node::new("127.0.0.1", addr)
}

fn connector() -> TcpConnector {
    TcpConnector::new().with_connect_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn test_leased_connection_echoes_and_is_reused() {
    let server = TestServer::start().await;
    let pool =
        ConnectionPool::new(connector(), vec![server.node()], PoolConfig::default()).unwrap();

    let conn = pool.acquire().await.unwrap().unwrap();
    let first_id = conn.id();
    {
        let mut stream = conn.stream().await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
    pool.release(conn);

    let conn = pool.acquire().await.unwrap().unwrap();
    assert_eq!(conn.id(), first_id);
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn test_refused_node_is_excluded() {
    let server = TestServer::start().await;
    let dead = refused_node().await;
    let config = PoolConfig {
        concurrency: 4,
        retries_per_node: 1,
    };
    let pool = ConnectionPool::new(connector(), vec![dead.clone(), server.node()], config).unwrap();

    let mut attempts = 0;
    while pool.snapshot().nodes[0].health != NodeHealth::Excluded {
        attempts += 1;
        assert!(attempts < 500, "refusing node was never excluded");
        match pool.acquire().await {
            Ok(Some(conn)) => conn.close(),
            Ok(None) => panic!("permits leaked"),
            Err(e) => assert!(e.is_connection_error(), "unexpected error: {}", e),
        }
    }
    assert_eq!(pool.snapshot().nodes[0].dial_failures, 2);

    for _ in 0..10 {
        let conn = pool.acquire().await.unwrap().unwrap();
        assert_eq!(conn.node(), &server.node());
        conn.close();
    }
    assert_eq!(pool.snapshot().nodes[0].dials, 2);
    assert_eq!(pool.available_permits(), 4);
}

#[tokio::test]
async fn test_peer_hangup_on_idle_connection_is_replaced() {
    let server = TestServer::start().await;
    let pool =
        ConnectionPool::new(connector(), vec![server.node()], PoolConfig::default()).unwrap();

    let conn = pool.acquire().await.unwrap().unwrap();
    let first_id = conn.id();
    pool.release(conn);
    assert_eq!(pool.snapshot().total_idle(), 1);

    server.hang_up();
    // Give the FIN time to arrive
    tokio::time::sleep(Duration::from_millis(100)).await;

    let conn = pool.acquire().await.unwrap().unwrap();
    assert_ne!(conn.id(), first_id);
    assert_eq!(server.accepted(), 2);

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.total_active(), 1);
    assert_eq!(snapshot.total_idle(), 0);
    assert_eq!(snapshot.leased, 1);
}

#[tokio::test]
async fn test_close_shuts_every_socket() {
    let server = TestServer::start().await;
    let pool =
        ConnectionPool::new(connector(), vec![server.node()], PoolConfig::default()).unwrap();

    let mut batch = Vec::new();
    assert_eq!(pool.acquire_batch(&mut batch, 3).await.unwrap(), 3);
    let held = batch.pop().unwrap();
    pool.release_batch(&mut batch);

    pool.close();
    server.wait_for_eofs(3).await;

    assert!(!held.is_open());
    assert!(held.stream().await.is_err());
    assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
}
