use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::task::noop_waker_ref;
use tokio::io::ReadBuf;
use tokio::net::TcpStream;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::error::{PoolError, Result};
use crate::node::Node;
use crate::transport::{CloseListener, Connection, Connector};

/// Dials nodes over plain TCP using tokio.
///
/// Without a connect timeout the dial waits for the operating system to give
/// up. With one, an expired dial surfaces as `PoolError::Timeout`, which the
/// pool counts like any other dial failure.
///
/// # Example
///
/// ```no_run
/// use nodepool_common::transport::{Connector, TcpConnector};
/// use nodepool_common::Node;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = TcpConnector::new().with_connect_timeout(Duration::from_secs(2));
/// let conn = connector.connect(&Node::resolve("127.0.0.1:8080")?).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds every dial by `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }
}

impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn connect(&self, node: &Node) -> Result<TcpConnection> {
        let addr = node.socket_addr();
        let connect = TcpStream::connect(addr);

        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| PoolError::Timeout(timeout.as_millis() as u64))?,
            None => connect.await,
        }
        .map_err(|e| PoolError::Connection(format!("Failed to connect to {}: {}", node, e)))?;

        stream.set_nodelay(true)?;

        tracing::trace!(node = %node, "TCP connection established");
        Ok(TcpConnection::new(stream, addr))
    }
}

/// A pooled TCP connection.
///
/// The stream sits behind an async mutex so the lease holder can perform I/O
/// through [`stream`](Self::stream) while the pool probes liveness without
/// blocking. Peer shutdown is detected lazily: [`is_usable`](Connection::is_usable)
/// peeks the socket without consuming data, and an end-of-stream closes the
/// connection, which in turn fires the close listeners.
pub struct TcpConnection {
    stream: Mutex<Option<TcpStream>>,
    peer: SocketAddr,
    closed: AtomicBool,
    listeners: StdMutex<Vec<CloseListener>>,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            peer,
            closed: AtomicBool::new(false),
            listeners: StdMutex::new(Vec::new()),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Locks the underlying stream for I/O.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Connection` if the connection has been closed.
    /// A close that happened while another holder had the stream locked
    /// is completed here by dropping the socket.
    pub async fn stream(&self) -> Result<MappedMutexGuard<'_, TcpStream>> {
        let mut guard = self.stream.lock().await;
        if self.closed.load(Ordering::Acquire) {
            guard.take();
        }

        MutexGuard::try_map(guard, |stream| stream.as_mut())
            .map_err(|_| PoolError::Connection(format!("Connection to {} is closed", self.peer)))
    }

    fn fire_listeners(&self) {
        let listeners = {
            let mut guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for listener in listeners {
            listener();
        }
    }
}

impl Connection for TcpConnection {
    fn is_usable(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        // A held lock means the stream is in use, which implies it is alive.
        let guard = match self.stream.try_lock() {
            Ok(guard) => guard,
            Err(_) => return true,
        };
        let Some(stream) = guard.as_ref() else {
            return false;
        };

        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        let mut cx = Context::from_waker(noop_waker_ref());
        let alive = match stream.poll_peek(&mut cx, &mut buf) {
            Poll::Pending => true,
            Poll::Ready(Ok(n)) => n > 0,
            Poll::Ready(Err(_)) => false,
        };
        drop(guard);

        if !alive {
            tracing::debug!(peer = %self.peer, "Peer closed idle TCP connection");
            self.close();
        }
        alive
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // If the stream is locked, the holder drops it on its next access.
        if let Ok(mut guard) = self.stream.try_lock() {
            guard.take();
        }

        self.fire_listeners();
    }

    fn on_close(&self, listener: CloseListener) {
        let mut guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if self.closed.load(Ordering::Acquire) {
            drop(guard);
            listener();
        } else {
            guard.push(listener);
        }
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.close();
    }
}
