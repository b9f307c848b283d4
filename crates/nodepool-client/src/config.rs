use nodepool_common::{PoolError, Result};
use tokio::sync::Semaphore;

/// Connection pool configuration.
///
/// # Fields
///
/// - `concurrency`: Maximum number of connections leased at the same time,
///   across all nodes
/// - `retries_per_node`: Consecutive dial failures a node may accumulate
///   before it is excluded from selection. `0` disables exclusion.
///
/// # Default Configuration
///
/// - `concurrency`: 10
/// - `retries_per_node`: 0
///
/// # Example
///
/// ```rust
/// use nodepool_client::PoolConfig;
///
/// // Up to 32 leases, exclude a node after its 4th failed dial in a row
/// let config = PoolConfig {
///     concurrency: 32,
///     retries_per_node: 3,
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Global ceiling on concurrently leased connections
    pub concurrency: usize,
    /// Consecutive dial failures tolerated per node (0 = never exclude)
    pub retries_per_node: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            retries_per_node: 0,
        }
    }
}

impl PoolConfig {
    /// Checks the configuration for values the pool cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidArgument` if `concurrency` is zero or larger
    /// than the semaphore can represent.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(PoolError::InvalidArgument(
                "concurrency must be greater than zero".to_string(),
            ));
        }
        if self.concurrency > Semaphore::MAX_PERMITS {
            return Err(PoolError::InvalidArgument(format!(
                "concurrency {} exceeds the maximum of {}",
                self.concurrency,
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }
}
