use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use nodepool_common::{Connection, Connector, Node, PoolError, Result};
use tracing::{debug, info};

use crate::admission::{AdmissionGate, PermitGuard};
use crate::config::PoolConfig;
use crate::health::HealthTracker;
use crate::registry::{ConnState, Entry, Registry};
use crate::snapshot::{NodeSnapshot, PoolSnapshot};

/// Shared state reachable from leases and close listeners.
pub(crate) struct PoolCore<C: Connection> {
    gate: AdmissionGate,
    registry: Registry<C>,
    health: HealthTracker,
}

impl<C: Connection> PoolCore<C> {
    /// Registers a dialed connection and wires its close listener.
    ///
    /// The listener is attached after registration so that a connection which
    /// is already closed is retired immediately by its own listener.
    fn register_new(
        self: &Arc<Self>,
        index: usize,
        conn: C,
        state: ConnState,
    ) -> Result<Arc<Entry<C>>> {
        let entry = match self.registry.register(index, conn, state) {
            Ok(entry) => entry,
            Err(conn) => {
                conn.close();
                return Err(PoolError::Closed);
            }
        };
        self.health.record_dial_success(&self.registry, index);

        let core = Arc::downgrade(self);
        let weak_entry = Arc::downgrade(&entry);
        entry.conn.on_close(Box::new(move || {
            if let (Some(core), Some(entry)) = (core.upgrade(), weak_entry.upgrade()) {
                core.registry.on_closed(&entry, &core.gate);
            }
        }));

        Ok(entry)
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Dereferences to the underlying transport connection. The lease goes back
/// to the pool through [`ConnectionPool::release`] or when dropped, whichever
/// comes first. A usable connection is parked for reuse; anything else is
/// closed. Either way the admission permit is returned exactly once.
pub struct PooledConnection<C: Connection> {
    entry: Arc<Entry<C>>,
    core: Weak<PoolCore<C>>,
    returned: bool,
}

impl<C: Connection> PooledConnection<C> {
    fn new(entry: Arc<Entry<C>>, core: &Arc<PoolCore<C>>) -> Self {
        Self {
            entry,
            core: Arc::downgrade(core),
            returned: false,
        }
    }

    /// The node this connection was dialed to.
    pub fn node(&self) -> &Node {
        self.entry.node()
    }

    /// Pool-assigned identifier, unique within one pool.
    pub fn id(&self) -> u64 {
        self.entry.id()
    }

    fn give_back(&mut self) {
        if self.returned {
            return;
        }
        self.returned = true;

        match self.core.upgrade() {
            Some(core) => core.registry.return_to_idle(self.entry.clone(), &core.gate),
            None => self.entry.conn.close(),
        }
    }
}

impl<C: Connection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.entry.conn
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl<C: Connection> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.entry.id())
            .field("node", &self.entry.node().to_string())
            .finish()
    }
}

/// Bounded connection pool spread over a fixed set of nodes.
///
/// # Architecture
///
/// - An admission gate caps the number of connections leased at once
/// - Idle connections are reused before anything new is dialed, scanning
///   nodes from a random start
/// - New connections go to the node with the fewest live connections; a node
///   with none wins outright, ties go to whichever a random scan meets first
/// - With `retries_per_node > 0`, a node whose dials keep failing is excluded
///   and only chosen again if every node is excluded
/// - Connections that close on their own (peer shutdown, I/O failure) are
///   reconciled by a close listener that may run on any thread
///
/// # Backpressure
///
/// `acquire` never waits for capacity. When every permit is out it returns
/// `Ok(None)` and the caller decides whether and how long to back off, for
/// example with [`nodepool_common::backoff::RetryConfig`].
///
/// # Example
///
/// ```rust,no_run
/// use nodepool_client::{ConnectionPool, PoolConfig};
/// use nodepool_common::transport::TcpConnector;
/// use nodepool_common::Node;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let nodes = vec![
///     Node::resolve("127.0.0.1:9001")?,
///     Node::resolve("127.0.0.1:9002")?,
/// ];
/// let pool = ConnectionPool::new(TcpConnector::new(), nodes, PoolConfig::default())?;
///
/// if let Some(conn) = pool.acquire().await? {
///     // Use the connection...
///     pool.release(conn);
/// }
///
/// pool.close();
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool<K: Connector> {
    connector: K,
    core: Arc<PoolCore<K::Conn>>,
    config: PoolConfig,
}

impl<K: Connector> ConnectionPool<K> {
    /// Creates a pool over `nodes`.
    ///
    /// No connection is dialed until the first [`acquire`](Self::acquire) or
    /// [`prepare`](Self::prepare).
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidArgument` if `nodes` is empty or contains
    /// duplicates, or if the configuration is invalid.
    pub fn new(connector: K, nodes: Vec<Node>, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        if nodes.is_empty() {
            return Err(PoolError::InvalidArgument(
                "node list must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(nodes.len());
        if let Some(duplicate) = nodes.iter().find(|node| !seen.insert(*node)) {
            return Err(PoolError::InvalidArgument(format!(
                "node {} listed more than once",
                duplicate
            )));
        }

        info!(
            nodes = nodes.len(),
            concurrency = config.concurrency,
            retries_per_node = config.retries_per_node,
            "Connection pool created"
        );

        Ok(Self {
            connector,
            core: Arc::new(PoolCore {
                gate: AdmissionGate::new(config.concurrency),
                registry: Registry::new(nodes),
                health: HealthTracker::new(config.retries_per_node),
            }),
            config,
        })
    }

    /// Eagerly dials `count` connections and parks them as idle.
    ///
    /// Warm-up connections hold no admission permits until leased. Meant
    /// for startup, not for steady-state use.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidArgument` if `count` is zero
    /// - `PoolError::Closed` if the pool has been closed
    /// - The first dial error; connections dialed before it stay pooled
    pub async fn prepare(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(PoolError::InvalidArgument(
                "prepare count must be greater than zero".to_string(),
            ));
        }
        self.ensure_open()?;

        for _ in 0..count {
            self.dial(ConnState::Idle).await?;
        }

        info!(count, "Connection pool warmed up");
        Ok(())
    }

    /// Leases one connection.
    ///
    /// This implements the following strategy:
    ///
    /// 1. Take an admission permit without waiting; none free means `Ok(None)`
    /// 2. Reuse a usable idle connection if any node has one
    /// 3. Otherwise dial the least-loaded node
    ///
    /// Dropping the returned future mid-dial returns the permit.
    ///
    /// # Errors
    ///
    /// - `PoolError::Closed` if the pool has been closed
    /// - The connector's error if the dial fails; the failure also counts
    ///   toward the node's exclusion budget
    pub async fn acquire(&self) -> Result<Option<PooledConnection<K::Conn>>> {
        self.ensure_open()?;

        if !self.core.gate.try_acquire_one() {
            debug!("No admission permit available");
            return Ok(None);
        }
        let mut permits = PermitGuard::new(&self.core.gate, 1);
        self.lease(&mut permits).await.map(Some)
    }

    /// Leases up to `max_count` connections, appending them to `out`.
    ///
    /// Returns how many were leased: `min(max_count, free permits)`, or `0`
    /// when the pool is saturated.
    ///
    /// # Errors
    ///
    /// On a dial failure the error is returned. Connections leased before
    /// the failure remain in `out` and permits not yet used are returned.
    pub async fn acquire_batch(
        &self,
        out: &mut Vec<PooledConnection<K::Conn>>,
        max_count: usize,
    ) -> Result<usize> {
        self.ensure_open()?;

        let taken = self.core.gate.drain_up_to(max_count);
        let mut permits = PermitGuard::new(&self.core.gate, taken);
        out.reserve(taken);
        for _ in 0..taken {
            out.push(self.lease(&mut permits).await?);
        }
        debug_assert_eq!(permits.held(), 0);
        Ok(taken)
    }

    /// Returns a leased connection to the pool.
    ///
    /// Equivalent to dropping it.
    pub fn release(&self, mut conn: PooledConnection<K::Conn>) {
        conn.give_back();
    }

    /// Returns every connection in `conns`, leaving it empty.
    pub fn release_batch(&self, conns: &mut Vec<PooledConnection<K::Conn>>) {
        for conn in conns.drain(..) {
            self.release(conn);
        }
    }

    /// Shuts the pool down.
    ///
    /// Every tracked connection is closed, leased ones included, and all
    /// per-node state is cleared. Later acquires fail with
    /// `PoolError::Closed`; later releases are accepted and ignored. Stop
    /// issuing acquires before calling this.
    pub fn close(&self) {
        if self.core.registry.is_closed() {
            return;
        }
        self.core.gate.close();
        let closed = self.core.registry.close_all();
        info!(closed, "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.core.registry.is_closed()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The configured nodes, in scan order.
    pub fn nodes(&self) -> Vec<Node> {
        self.core
            .registry
            .slots()
            .iter()
            .map(|slot| slot.node.clone())
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.core.gate.capacity()
    }

    pub fn available_permits(&self) -> usize {
        self.core.gate.available()
    }

    /// Permits currently held by leases or in-flight acquires.
    pub fn leased(&self) -> usize {
        self.core.gate.leased()
    }

    /// Captures the current per-node bookkeeping.
    pub fn snapshot(&self) -> PoolSnapshot {
        let nodes = self
            .core
            .registry
            .slots()
            .iter()
            .map(|slot| NodeSnapshot {
                node: slot.node.to_string(),
                health: slot.health(),
                active: slot.active(),
                idle: slot.idle_count(),
                consecutive_failures: slot.consecutive_failures.load(Ordering::Acquire),
                dials: slot.dials.load(Ordering::Relaxed),
                dial_failures: slot.dial_failures.load(Ordering::Relaxed),
            })
            .collect();

        PoolSnapshot {
            capacity: self.capacity(),
            available_permits: self.available_permits(),
            leased: self.leased(),
            closed: self.is_closed(),
            nodes,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        Ok(())
    }

    /// Binds one held permit to a connection, reusing an idle one if possible.
    async fn lease(&self, permits: &mut PermitGuard<'_>) -> Result<PooledConnection<K::Conn>> {
        if let Some(entry) = self.core.registry.poll_idle() {
            permits.commit_one();
            debug!(node = %entry.node(), conn_id = entry.id(), "Reusing idle connection");
            return Ok(PooledConnection::new(entry, &self.core));
        }

        let entry = self.dial(ConnState::Leased).await?;
        permits.commit_one();
        Ok(PooledConnection::new(entry, &self.core))
    }

    /// Dials the selected node and registers the result in `state`.
    async fn dial(&self, state: ConnState) -> Result<Arc<Entry<K::Conn>>> {
        let registry = &self.core.registry;
        let index = registry
            .select_target()
            .ok_or_else(|| PoolError::InvalidArgument("pool has no nodes".to_string()))?;
        let slot = registry.slot(index);
        slot.dials.fetch_add(1, Ordering::Relaxed);

        debug!(node = %slot.node, active = slot.active(), "Dialing new connection");
        match self.connector.connect(&slot.node).await {
            Ok(conn) => self.core.register_new(index, conn, state),
            Err(e) => {
                debug!(node = %slot.node, error = %e, "Dial failed");
                self.core.health.record_dial_failure(registry, index);
                Err(e)
            }
        }
    }
}
