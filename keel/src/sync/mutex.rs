//! Mutual exclusion as a capacity-1 semaphore.

use crate::api::Resource;
use crate::sync::{Semaphore, SyncError};
use alloc::sync::Arc;
use keel_port::PortLayer;

/// A mutex: one permit, no fairness guarantee.
pub struct Mutex<P: PortLayer> {
    sem: Semaphore<P>,
}

impl<P: PortLayer> Mutex<P> {
    pub fn new(port: Arc<P>) -> Result<Mutex<P>, SyncError> {
        Ok(Mutex {
            sem: Semaphore::new(port, 1, false)?,
        })
    }

    /// Locks the mutex, blocking indefinitely until it is free.
    pub fn lock(&self) -> Result<(), SyncError> {
        self.sem.acquire()
    }

    /// Unlocks the mutex.
    pub fn unlock(&self) {
        self.sem.release()
    }
}

impl<P: PortLayer> Resource for Mutex<P> {
    fn is_blocked(&self) -> bool {
        self.sem.is_blocked()
    }
}
