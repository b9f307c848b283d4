//! In-memory transport used by the unit tests.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nodepool_common::{CloseListener, Connection, Connector, Node, PoolError, Result};

#[derive(Default)]
struct MockState {
    failing: Mutex<HashSet<SocketAddr>>,
    dials: Mutex<HashMap<SocketAddr, usize>>,
    connections: Mutex<Vec<MockConnection>>,
    delay: Mutex<Option<Duration>>,
    next_id: AtomicU64,
}

/// Connector whose dials succeed instantly unless a node is marked failing.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_node(&self, node: &Node) {
        self.state.failing.lock().unwrap().insert(node.socket_addr());
    }

    pub(crate) fn heal_node(&self, node: &Node) {
        self.state.failing.lock().unwrap().remove(&node.socket_addr());
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }

    /// Dial attempts made to `node`, successful or not.
    pub(crate) fn dials(&self, node: &Node) -> usize {
        self.state
            .dials
            .lock()
            .unwrap()
            .get(&node.socket_addr())
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_dials(&self) -> usize {
        self.state.dials.lock().unwrap().values().sum()
    }

    /// Every connection this connector ever produced.
    pub(crate) fn connections(&self) -> Vec<MockConnection> {
        self.state.connections.lock().unwrap().clone()
    }

    pub(crate) fn make_connection(&self, node: &Node) -> MockConnection {
        let conn = MockConnection {
            inner: Arc::new(MockConnectionInner {
                id: self.state.next_id.fetch_add(1, Ordering::Relaxed),
                node: node.clone(),
                open: AtomicBool::new(true),
                usable: AtomicBool::new(true),
                listeners: Mutex::new(Vec::new()),
            }),
        };
        self.state.connections.lock().unwrap().push(conn.clone());
        conn
    }
}

impl Connector for MockConnector {
    type Conn = MockConnection;

    async fn connect(&self, node: &Node) -> Result<MockConnection> {
        *self
            .state
            .dials
            .lock()
            .unwrap()
            .entry(node.socket_addr())
            .or_insert(0) += 1;

        let delay = *self.state.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.state.failing.lock().unwrap().contains(&node.socket_addr()) {
            return Err(PoolError::Connection(format!("Failed to connect to {}: refused", node)));
        }
        Ok(self.make_connection(node))
    }
}

struct MockConnectionInner {
    id: u64,
    node: Node,
    open: AtomicBool,
    usable: AtomicBool,
    listeners: Mutex<Vec<CloseListener>>,
}

/// Shared handle; clones observe and drive the same connection.
#[derive(Clone)]
pub(crate) struct MockConnection {
    inner: Arc<MockConnectionInner>,
}

impl MockConnection {
    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn node(&self) -> &Node {
        &self.inner.node
    }

    pub(crate) fn set_usable(&self, usable: bool) {
        self.inner.usable.store(usable, Ordering::SeqCst);
    }
}

impl Connection for MockConnection {
    fn is_usable(&self) -> bool {
        self.is_open() && self.inner.usable.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let listeners = std::mem::take(&mut *self.inner.listeners.lock().unwrap());
        for listener in listeners {
            listener();
        }
    }

    fn on_close(&self, listener: CloseListener) {
        let mut listeners = self.inner.listeners.lock().unwrap();
        if self.is_open() {
            listeners.push(listener);
        } else {
            drop(listeners);
            listener();
        }
    }
}
