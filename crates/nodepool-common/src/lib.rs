//! nodepool Common Types and Transport
//!
//! This crate provides the shared vocabulary used by the nodepool connection
//! pool and its callers.
//!
//! # Components
//!
//! - [`node`] - The [`Node`] identifier for one backend endpoint
//! - [`error`] - The [`PoolError`] taxonomy and [`Result`] alias
//! - [`transport`] - The [`Connector`]/[`Connection`] seam plus a tokio TCP implementation
//! - [`backoff`] - Caller-driven exponential backoff, never used by the pool itself
//!
//! # Example
//!
//! ```no_run
//! use nodepool_common::{Node, PoolError};
//!
//! let node = Node::resolve("127.0.0.1:9001")?;
//! println!("dialing {}", node.socket_addr());
//! # Ok::<(), PoolError>(())
//! ```

pub mod backoff;
pub mod error;
pub mod node;
pub mod transport;

pub use error::{PoolError, Result};
pub use node::Node;
pub use transport::{CloseListener, Connection, Connector};
