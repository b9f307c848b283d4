use thiserror::Error;

/// Errors surfaced by the pool and its transport collaborators.
///
/// Running out of admission permits is deliberately absent: capacity
/// exhaustion is reported as an empty result, not as an error.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connect timeout after {0}ms")]
    Timeout(u64),

    #[error("Pool is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PoolError {
    /// Returns `true` for errors that describe a failed attempt to reach a node.
    ///
    /// The pool counts every dial error against the node regardless of this
    /// classification. Callers use it to tell transport trouble apart from
    /// misuse such as an invalid argument or a closed pool.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            PoolError::Connection(_) | PoolError::Timeout(_) | PoolError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_class_errors() {
        assert!(PoolError::Connection("refused".to_string()).is_connection_error());
        assert!(PoolError::Timeout(100).is_connection_error());
        assert!(PoolError::Io(std::io::Error::other("reset")).is_connection_error());

        assert!(!PoolError::Closed.is_connection_error());
        assert!(!PoolError::InvalidArgument("empty".to_string()).is_connection_error());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(PoolError::Timeout(250).to_string(), "Connect timeout after 250ms");
        assert_eq!(PoolError::Closed.to_string(), "Pool is closed");
    }
}
