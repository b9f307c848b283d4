use std::time::Duration;

/// Configuration for caller-driven retry with exponential backoff.
///
/// The pool never retries on its own. Callers that want to ride out a full
/// pool or a flapping node wrap their `acquire` calls in a loop driven by
/// [`Backoff`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (excluding initial attempt)
    ///
    /// Total attempts = max_retries + 1
    /// Default: 3
    pub max_retries: usize,
    /// Initial backoff in milliseconds
    ///
    /// Default: 50ms
    pub initial_backoff_ms: u64,
    /// Maximum backoff in milliseconds
    ///
    /// Default: 5000ms
    pub max_backoff_ms: u64,
    /// Exponential backoff multiplier
    ///
    /// Default: 2.0
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Starts a fresh backoff sequence for this configuration.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next_ms: self.initial_backoff_ms.min(self.max_backoff_ms),
            remaining: self.max_retries,
            config: self.clone(),
        }
    }
}

/// Iterator over the delays to sleep between attempts.
///
/// Yields `max_retries` delays, growing by `backoff_multiplier` and capped at
/// `max_backoff_ms`, then ends.
///
/// # Example
///
/// ```
/// use nodepool_common::backoff::RetryConfig;
/// use std::time::Duration;
///
/// let delays: Vec<Duration> = RetryConfig::default().backoff().collect();
/// assert_eq!(delays, vec![
///     Duration::from_millis(50),
///     Duration::from_millis(100),
///     Duration::from_millis(200),
/// ]);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    next_ms: u64,
    remaining: usize,
    config: RetryConfig,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let current = self.next_ms;
        self.next_ms = std::cmp::min(
            (current as f64 * self.config.backoff_multiplier) as u64,
            self.config.max_backoff_ms,
        );
        Some(Duration::from_millis(current))
    }
}
