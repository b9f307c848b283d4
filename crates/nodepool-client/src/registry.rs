use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use nodepool_common::{Connection, Node};

use crate::admission::AdmissionGate;
use crate::health::NodeHealth;
use crate::selector::{self, NodeCost};

/// Lifecycle of one pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum ConnState {
    /// Checked out by a caller; holds one admission permit
    Leased = 0,
    /// Sitting in its node's idle queue; holds no permit
    Idle = 1,
    /// Terminal; bookkeeping already done by whoever won the transition
    Closed = 2,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnState::Leased,
            1 => ConnState::Idle,
            _ => ConnState::Closed,
        }
    }
}

/// The pool's record of one live connection, tagged with its owning node.
pub(crate) struct Entry<C> {
    id: u64,
    node_index: usize,
    node: Node,
    state: AtomicU8,
    pub(crate) conn: C,
}

impl<C> Entry<C> {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    pub(crate) fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ConnState, to: ConnState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves the entry to `Closed`, returning the state it left.
    fn mark_closed(&self) -> ConnState {
        ConnState::from_u8(self.state.swap(ConnState::Closed as u8, Ordering::AcqRel))
    }
}

/// Bookkeeping for one node.
pub(crate) struct NodeSlot<C> {
    pub(crate) node: Node,
    idle: Mutex<VecDeque<Arc<Entry<C>>>>,
    all: Mutex<HashMap<u64, Arc<Entry<C>>>>,
    active: AtomicUsize,
    pub(crate) consecutive_failures: AtomicU32,
    pub(crate) excluded: AtomicBool,
    pub(crate) dials: AtomicU64,
    pub(crate) dial_failures: AtomicU64,
}

impl<C> NodeSlot<C> {
    fn new(node: Node) -> Self {
        Self {
            node,
            idle: Mutex::new(VecDeque::new()),
            all: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            consecutive_failures: AtomicU32::new(0),
            excluded: AtomicBool::new(false),
            dials: AtomicU64::new(0),
            dial_failures: AtomicU64::new(0),
        }
    }

    /// Live connections attributed to this node, leased or idle.
    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn health(&self) -> NodeHealth {
        if self.excluded.load(Ordering::Acquire) {
            NodeHealth::Excluded
        } else {
            NodeHealth::Healthy
        }
    }

    pub(crate) fn cost(&self) -> NodeCost {
        match self.health() {
            NodeHealth::Excluded => NodeCost::Excluded,
            NodeHealth::Healthy => NodeCost::Load(self.active()),
        }
    }

    pub(crate) fn idle_count(&self) -> usize {
        lock(&self.idle)
            .iter()
            .filter(|entry| entry.state() == ConnState::Idle)
            .count()
    }
}

/// Per-node idle queues and live-connection sets for the whole pool.
///
/// All methods are safe to call from any thread, including a close listener
/// fired by the transport on a runtime worker.
pub(crate) struct Registry<C> {
    slots: Vec<NodeSlot<C>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    shutdown: Mutex<()>,
}

impl<C: Connection> Registry<C> {
    pub(crate) fn new(nodes: Vec<Node>) -> Self {
        Self {
            slots: nodes.into_iter().map(NodeSlot::new).collect(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            shutdown: Mutex::new(()),
        }
    }

    pub(crate) fn slots(&self) -> &[NodeSlot<C>] {
        &self.slots
    }

    pub(crate) fn slot(&self, index: usize) -> &NodeSlot<C> {
        &self.slots[index]
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Least-loaded node, scanning from a random start.
    pub(crate) fn select_target(&self) -> Option<usize> {
        let count = self.slots.len();
        selector::select_least_loaded(count, selector::random_start(count), |i| {
            self.slots[i].cost()
        })
    }

    /// Takes a usable idle connection, scanning nodes from a random start.
    ///
    /// Entries that were closed while queued, or that fail the liveness
    /// check, are passed over. Their close listener owns their cleanup.
    pub(crate) fn poll_idle(&self) -> Option<Arc<Entry<C>>> {
        let count = self.slots.len();
        let start = selector::random_start(count);

        for offset in 0..count {
            let slot = &self.slots[(start + offset) % count];
            loop {
                // Never hold the queue lock across is_usable: the probe may
                // close the connection and re-enter retire on this thread.
                let Some(entry) = lock(&slot.idle).pop_front() else {
                    break;
                };
                if entry.state() != ConnState::Idle || !entry.conn.is_usable() {
                    continue;
                }
                if entry.transition(ConnState::Idle, ConnState::Leased) {
                    return Some(entry);
                }
            }
        }
        None
    }

    /// Records a freshly dialed connection against node `index`.
    ///
    /// Returns the connection back if the registry has been shut down.
    pub(crate) fn register(
        &self,
        index: usize,
        conn: C,
        state: ConnState,
    ) -> Result<Arc<Entry<C>>, C> {
        let slot = &self.slots[index];
        let entry = {
            // Checked under the lock close_all drains, so nothing slips in after shutdown
            let mut all = lock(&slot.all);
            if self.is_closed() {
                return Err(conn);
            }

            let entry = Arc::new(Entry {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                node_index: index,
                node: slot.node.clone(),
                state: AtomicU8::new(state as u8),
                conn,
            });
            all.insert(entry.id, entry.clone());
            slot.active.fetch_add(1, Ordering::AcqRel);
            entry
        };

        if state == ConnState::Idle {
            lock(&slot.idle).push_back(entry.clone());
        }

        tracing::debug!(
            node = %slot.node,
            conn_id = entry.id,
            active = slot.active(),
            "Registered new connection"
        );
        Ok(entry)
    }

    /// Hands a leased connection back.
    ///
    /// A usable connection goes to its node's idle queue and its permit is
    /// released. An unusable one is closed; its close listener then retires
    /// it and recovers the permit.
    pub(crate) fn return_to_idle(&self, entry: Arc<Entry<C>>, gate: &AdmissionGate) {
        if entry.state() != ConnState::Leased {
            return;
        }

        if entry.conn.is_usable() {
            // Park under the queue lock: a racing retire or close_all then
            // either sees the entry queued or makes the transition fail.
            let parked = {
                let mut idle = lock(&self.slots[entry.node_index].idle);
                if !self.is_closed() && entry.transition(ConnState::Leased, ConnState::Idle) {
                    idle.push_back(entry.clone());
                    true
                } else {
                    false
                }
            };
            if parked {
                gate.release(1);
                return;
            }
            if entry.state() != ConnState::Leased {
                return;
            }
        }

        tracing::debug!(
            node = %entry.node,
            conn_id = entry.id,
            "Closing unusable connection on release"
        );
        entry.conn.close();
    }

    /// Reconciles bookkeeping after the transport reports `entry` closed.
    ///
    /// Only the first caller to move the entry into `Closed` does any work,
    /// so this is safe against a concurrent release or shutdown.
    pub(crate) fn on_closed(&self, entry: &Entry<C>, gate: &AdmissionGate) {
        let previous = entry.mark_closed();
        if previous == ConnState::Closed {
            return;
        }

        self.retire(entry);
        if previous == ConnState::Leased {
            gate.release(1);
        }

        tracing::debug!(
            node = %entry.node,
            conn_id = entry.id,
            was = ?previous,
            "Connection closed"
        );
    }

    fn retire(&self, entry: &Entry<C>) {
        let slot = &self.slots[entry.node_index];
        {
            let mut all = lock(&slot.all);
            if all.remove(&entry.id).is_some() {
                slot.active.fetch_sub(1, Ordering::AcqRel);
            }
        }
        lock(&slot.idle).retain(|queued| queued.id != entry.id);
    }

    /// Closes every tracked connection and empties all per-node state.
    ///
    /// Callers must stop acquiring before shutting down. Connections dialed
    /// concurrently with shutdown are refused by [`register`](Self::register).
    pub(crate) fn close_all(&self) -> usize {
        let _shutdown = lock(&self.shutdown);
        self.closed.store(true, Ordering::Release);

        let mut closed = 0;
        for slot in &self.slots {
            let mut entries: Vec<Arc<Entry<C>>> = {
                let mut all = lock(&slot.all);
                slot.active.store(0, Ordering::Release);
                all.drain().map(|(_, entry)| entry).collect()
            };
            entries.extend(lock(&slot.idle).drain(..));

            for entry in entries {
                // Winning the transition here keeps the close listener a no-op
                if entry.mark_closed() != ConnState::Closed {
                    closed += 1;
                }
                if entry.conn.is_open() {
                    entry.conn.close();
                }
            }
        }
        closed
    }
}

/// Locks a registry mutex, recovering from poisoning.
///
/// Registry critical sections never leave the maps half-updated, so the data
/// behind a poisoned lock is still consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
