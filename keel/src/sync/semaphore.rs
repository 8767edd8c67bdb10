//! Counting semaphore over one porting-layer lock resource.

use crate::api::Resource;
use crate::sync::{InterruptLock, SyncError, Toggle};
use alloc::sync::Arc;
use keel_port::{LockController, LockStatus, PortLayer};

/// A counting semaphore. Owns exactly one porting-layer counting lock,
/// released when the semaphore is dropped.
pub struct Semaphore<P: PortLayer> {
    port: Arc<P>,
    handle: P::LockHandle,
    intr: InterruptLock<P>,
    fair: bool,
}

impl<P: PortLayer> Semaphore<P> {
    /// Allocates a semaphore with `permits` initial permits. The fairness
    /// flag is advisory; whatever queuing the porting layer's lock applies
    /// under contention is what callers get.
    pub fn new(port: Arc<P>, permits: u32, fair: bool) -> Result<Semaphore<P>, SyncError> {
        let handle = port
            .lock_alloc(permits)
            .ok_or(SyncError::OutOfResources)?;
        Ok(Semaphore {
            intr: InterruptLock::new(Arc::clone(&port)),
            port,
            handle,
            fair,
        })
    }

    /// Acquires one permit, blocking indefinitely until one is available.
    pub fn acquire(&self) -> Result<(), SyncError> {
        self.port.lock_acquire(self.handle)?;
        Ok(())
    }

    /// Acquires `permits` permits as one atomic step.
    ///
    /// The single acquisitions are looped inside one interrupt-disabled
    /// section, so no other thread ever observes a partially taken batch.
    /// The trade-off is that interrupts stay masked for the whole loop,
    /// including any blocking inside it; keep `permits` small on latency-
    /// sensitive systems.
    pub fn acquire_many(&self, permits: u32) -> Result<(), SyncError> {
        let mut fault = None;
        let prior = self.intr.disable();
        for _ in 0..permits {
            if let Err(err) = self.port.lock_acquire(self.handle) {
                fault.get_or_insert(err);
            }
        }
        self.intr.enable(prior);
        match fault {
            None => Ok(()),
            Some(err) => Err(err.into()),
        }
    }

    /// Releases one permit.
    pub fn release(&self) {
        self.port.lock_release(self.handle);
    }

    /// Releases `permits` permits as one atomic step, mirroring
    /// [`Semaphore::acquire_many`].
    pub fn release_many(&self, permits: u32) {
        let prior = self.intr.disable();
        for _ in 0..permits {
            self.port.lock_release(self.handle);
        }
        self.intr.enable(prior);
    }

    /// True if FIFO granting of permits was requested at construction.
    pub fn is_fair(&self) -> bool {
        self.fair
    }
}

impl<P: PortLayer> Resource for Semaphore<P> {
    fn is_blocked(&self) -> bool {
        // Anything the porting layer cannot positively report as unlocked
        // counts as blocked.
        match self.port.lock_status(self.handle) {
            LockStatus::Unlocked => false,
            LockStatus::Locked => true,
            LockStatus::Indeterminate => true,
        }
    }
}

impl<P: PortLayer> Drop for Semaphore<P> {
    fn drop(&mut self) {
        self.port.lock_free(self.handle);
    }
}
