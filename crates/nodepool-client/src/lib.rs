//! nodepool Connection Pool
//!
//! This crate provides a bounded connection pool that spreads connections
//! over a fixed set of backend nodes.
//!
//! # Components
//!
//! - [`ConnectionPool`] - Lease, reuse and retire connections across nodes
//! - [`PooledConnection`] - A leased connection, returned on release or drop
//! - [`AdmissionGate`] - Non-blocking global ceiling on concurrent leases
//! - [`PoolConfig`] - Concurrency ceiling and per-node failure budget
//! - [`PoolSnapshot`] - Serializable view of per-node bookkeeping
//!
//! Selection favours the node with the fewest live connections. Nodes that
//! keep refusing dials can be excluded with `retries_per_node`.
//!
//! # Example
//!
//! ```no_run
//! use nodepool_client::{ConnectionPool, PoolConfig};
//! use nodepool_common::transport::TcpConnector;
//! use nodepool_common::Node;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let nodes = vec![Node::resolve("10.0.0.1:9000")?, Node::resolve("10.0.0.2:9000")?];
//! let config = PoolConfig { concurrency: 16, retries_per_node: 3 };
//! let pool = ConnectionPool::new(TcpConnector::new(), nodes, config)?;
//!
//! let mut batch = Vec::new();
//! let leased = pool.acquire_batch(&mut batch, 8).await?;
//! println!("leased {} connections", leased);
//! pool.release_batch(&mut batch);
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod config;
pub mod health;
pub mod pool;
pub mod selector;
pub mod snapshot;

mod registry;

#[cfg(test)]
mod mock;

pub use admission::AdmissionGate;
pub use config::PoolConfig;
pub use health::NodeHealth;
pub use pool::{ConnectionPool, PooledConnection};
pub use selector::NodeCost;
pub use snapshot::{NodeSnapshot, PoolSnapshot};
