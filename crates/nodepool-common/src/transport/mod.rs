//! nodepool Transport Seam
//!
//! The pool never touches sockets itself. It consumes two small traits from
//! whatever networking layer sits underneath it:
//!
//! - **[`Connector`]**: asynchronously establishes a connection to a [`Node`]
//! - **[`Connection`]**: a live handle that can report liveness, be closed,
//!   and notify a listener exactly once when it reaches the closed state
//!
//! The close listener is the pool's single reconciliation point. It may be
//! invoked from any thread, including a runtime worker that is not the task
//! that called `acquire`.
//!
//! # Components
//!
//! - **[`TcpConnector`]** / **[`TcpConnection`]**: tokio TCP implementation
//!
//! # Example
//!
//! ```no_run
//! use nodepool_common::transport::{Connection, Connector, TcpConnector};
//! use nodepool_common::Node;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = TcpConnector::new();
//! let node = Node::resolve("127.0.0.1:8080")?;
//! let conn = connector.connect(&node).await?;
//! conn.on_close(Box::new(|| println!("closed")));
//! conn.close();
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use crate::error::Result;
use crate::node::Node;

pub mod tcp;

pub use tcp::{TcpConnection, TcpConnector};

/// Callback fired once when a connection becomes fully closed.
pub type CloseListener = Box<dyn FnOnce() + Send + 'static>;

/// A single network connection to one node.
pub trait Connection: Send + Sync + 'static {
    /// Whether the connection can carry another request right now.
    fn is_usable(&self) -> bool;

    /// Whether the connection has not yet been closed.
    fn is_open(&self) -> bool;

    /// Closes the connection. Idempotent.
    ///
    /// Closing fires every registered close listener.
    fn close(&self);

    /// Registers a listener fired exactly once when the connection closes,
    /// regardless of which side initiated the close.
    ///
    /// A listener registered on an already closed connection fires
    /// immediately on the calling thread.
    fn on_close(&self, listener: CloseListener);
}

/// Establishes connections to nodes.
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    /// Dials `node`. Refusal, timeout and any other transport failure are all
    /// reported as an error; the pool treats them uniformly.
    fn connect(&self, node: &Node) -> impl Future<Output = Result<Self::Conn>> + Send;
}
