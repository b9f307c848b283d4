use std::sync::Arc;

use tokio::sync::{Semaphore, TryAcquireError};

/// Counting gate bounding the number of connections leased at once.
///
/// Every operation is non-blocking. Permits taken from the gate are detached
/// from the semaphore (`forget`) and later handed back through
/// [`release`](Self::release), so a permit can outlive the task that took it
/// and be returned from a close listener running on another thread.
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Takes one permit if one is free. Never waits.
    pub fn try_acquire_one(&self) -> bool {
        match self.semaphore.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => false,
        }
    }

    /// Takes as many permits as are free right now, but no more than `max_count`.
    ///
    /// Returns the number taken; `0` means no capacity at the moment.
    pub fn drain_up_to(&self, max_count: usize) -> usize {
        loop {
            let wanted = self.semaphore.available_permits().min(max_count);
            if wanted == 0 {
                return 0;
            }
            // try_acquire_many takes a u32
            let wanted = wanted.min(u32::MAX as usize);

            match self.semaphore.try_acquire_many(wanted as u32) {
                Ok(permits) => {
                    permits.forget();
                    return wanted;
                }
                // Lost a race with another acquirer; re-read what is left
                Err(TryAcquireError::NoPermits) => continue,
                Err(TryAcquireError::Closed) => return 0,
            }
        }
    }

    /// Returns `count` permits to the gate.
    pub fn release(&self, count: usize) {
        if count > 0 {
            self.semaphore.add_permits(count);
        }
    }

    /// Stops handing out permits. Releases after this point are accepted and ignored.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held outside the gate.
    pub fn leased(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

/// RAII holder for permits taken but not yet bound to a leased connection.
///
/// Dropping the guard returns whatever it still holds. A dial that fails, or
/// an acquire future that is dropped mid-dial, therefore never leaks a permit.
#[must_use = "PermitGuard returns its permits when dropped"]
pub(crate) struct PermitGuard<'a> {
    gate: &'a AdmissionGate,
    held: usize,
}

impl<'a> PermitGuard<'a> {
    pub(crate) fn new(gate: &'a AdmissionGate, held: usize) -> Self {
        Self { gate, held }
    }

    /// Hands one permit over to a lease. The lease's lifecycle returns it later.
    pub(crate) fn commit_one(&mut self) {
        debug_assert!(self.held > 0, "committed more permits than held");
        self.held = self.held.saturating_sub(1);
    }

    pub(crate) fn held(&self) -> usize {
        self.held
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        self.gate.release(self.held);
    }
}
