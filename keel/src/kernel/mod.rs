//! Kernel composition root.

pub mod interrupt;
pub mod runtime;
pub mod scheduler;

use crate::api::InterruptHandler;
use crate::kernel::interrupt::{InterruptError, InterruptVector, VectorTable};
use crate::kernel::runtime::Runtime;
use crate::kernel::scheduler::Scheduler;
use crate::sync::{InterruptLock, Mutex, Semaphore, SyncError};
use crate::time::Clock;
use alloc::sync::Arc;
use keel_port::PortLayer;

/// The kernel facade: one per porting-layer instance.
///
/// Owns the process-wide state (the interrupt vector table and the thread
/// registry) and hands out synchronization and interrupt resources through
/// fallible factories. No panic crosses this boundary; every factory
/// reports failure as a typed error.
pub struct Kernel<P: PortLayer> {
    port: Arc<P>,
    global: InterruptLock<P>,
    runtime: Arc<Runtime<P>>,
    clock: Clock<P>,
    vectors: Arc<VectorTable<P>>,
    scheduler: Scheduler<P>,
}

impl<P: PortLayer> Kernel<P> {
    /// Composes a kernel over `port`. The caller may keep its own clone of
    /// the `Arc`; the kernel neither needs nor assumes exclusive access.
    pub fn new(port: Arc<P>) -> Kernel<P> {
        let runtime = Arc::new(Runtime::new(Arc::clone(&port)));
        log::debug!("kernel up on port '{}'", P::NAME);
        Kernel {
            global: InterruptLock::new(Arc::clone(&port)),
            clock: Clock::new(Arc::clone(&port)),
            vectors: VectorTable::new(Arc::clone(&port)),
            scheduler: Scheduler::new(Arc::clone(&port), Arc::clone(&runtime)),
            runtime,
            port,
        }
    }

    pub fn scheduler(&self) -> &Scheduler<P> {
        &self.scheduler
    }

    pub fn runtime(&self) -> &Runtime<P> {
        &self.runtime
    }

    pub fn clock(&self) -> &Clock<P> {
        &self.clock
    }

    /// The global interrupt toggle.
    pub fn global_interrupt(&self) -> &InterruptLock<P> {
        &self.global
    }

    /// Creates a new mutex resource.
    pub fn create_mutex(&self) -> Result<Mutex<P>, SyncError> {
        Mutex::new(Arc::clone(&self.port))
    }

    /// Creates a new semaphore resource with `permits` initial permits.
    pub fn create_semaphore(&self, permits: u32) -> Result<Semaphore<P>, SyncError> {
        Semaphore::new(Arc::clone(&self.port), permits, false)
    }

    /// Creates a new semaphore resource, requesting FIFO permit granting
    /// under contention when `fair` is set.
    pub fn create_semaphore_fair(
        &self,
        permits: u32,
        fair: bool,
    ) -> Result<Semaphore<P>, SyncError> {
        Semaphore::new(Arc::clone(&self.port), permits, fair)
    }

    /// Claims an interrupt vector for `source` with `handler` registered on
    /// it. The vector comes back disabled.
    pub fn create_interrupt(
        &self,
        handler: impl InterruptHandler + 'static,
        source: u32,
    ) -> Result<InterruptVector<P>, InterruptError> {
        self.vectors.attach(Arc::new(handler), source)
    }
}
