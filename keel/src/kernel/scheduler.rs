//! Thread registry and scheduling entry points.
//!
//! The scheduler tracks which threads exist and resolves which one is
//! running; the actual run-queue and preemption policy live in the porting
//! layer.

use crate::api::Task;
use crate::kernel::runtime::Runtime;
use crate::sync::{InterruptLock, PreemptLock, Toggle};
use crate::thread::{SpawnError, Thread, ThreadInner};
use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use keel_port::{PortLayer, ProcessController};

/// One registry entry. Non-owning: the thread handle and the running task
/// hold the strong references.
pub(crate) struct ThreadRecord<P: PortLayer> {
    pub(crate) thread: Weak<ThreadInner<P>>,
    pub(crate) id: P::ProcId,
}

/// Registry state shared between the scheduler and its threads.
///
/// Insertion order is creation order and carries no priority meaning. The
/// spin lock keeps the vector memory-safe under the host port's real
/// threads; callers additionally wrap every mutation in an interrupt
/// critical section, which is what makes the add/remove + state-transition
/// pairs atomic units.
pub(crate) struct SchedulerShared<P: PortLayer> {
    registry: spin::Mutex<Vec<ThreadRecord<P>>>,
}

impl<P: PortLayer> SchedulerShared<P> {
    fn new() -> SchedulerShared<P> {
        SchedulerShared {
            registry: spin::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, record: ThreadRecord<P>) {
        self.registry.lock().push(record);
    }

    /// Removes the first record for the thread at `target`, by identity.
    /// No-op if absent.
    pub(crate) fn remove(&self, target: *const ThreadInner<P>) {
        let mut registry = self.registry.lock();
        if let Some(index) = registry
            .iter()
            .position(|record| core::ptr::eq(record.thread.as_ptr(), target))
        {
            registry.remove(index);
        }
    }
}

/// Thread factory and registry owner.
pub struct Scheduler<P: PortLayer> {
    port: Arc<P>,
    runtime: Arc<Runtime<P>>,
    intr: InterruptLock<P>,
    preempt: PreemptLock<P>,
    shared: Arc<SchedulerShared<P>>,
}

impl<P: PortLayer> Scheduler<P> {
    pub(crate) fn new(port: Arc<P>, runtime: Arc<Runtime<P>>) -> Scheduler<P> {
        Scheduler {
            intr: InterruptLock::new(Arc::clone(&port)),
            preempt: PreemptLock::new(Arc::clone(&port)),
            shared: Arc::new(SchedulerShared::new()),
            port,
            runtime,
        }
    }

    /// Creates a new thread that will run `task` once started. The thread
    /// comes back in [`crate::ThreadState::New`], parked on its startup
    /// gate.
    pub fn create_thread(&self, task: impl Task + 'static) -> Result<Thread<P>, SpawnError> {
        Thread::spawn(
            Box::new(task),
            Arc::clone(&self.port),
            Arc::clone(&self.shared),
        )
    }

    /// Resolves the calling context to its thread handle.
    ///
    /// Every context that reaches this call must be a started scheduler
    /// thread; a miss (including an empty registry) violates a load-bearing
    /// invariant of the facade and terminates the process.
    pub fn current_thread(&self) -> Thread<P> {
        let current = self.port.proc_current();
        let prior = self.intr.disable();
        let found = {
            let registry = self.shared.registry.lock();
            registry
                .iter()
                .find(|record| record.id == current)
                .and_then(|record| {
                    record
                        .thread
                        .upgrade()
                        .map(|inner| Thread::from_record(inner, record.id))
                })
        };
        self.intr.enable(prior);
        match found {
            Some(thread) => thread,
            None => {
                log::error!("process {:?} is not a registered thread", current);
                self.runtime.terminate(-1)
            }
        }
    }

    /// Yields the processor to the next runnable thread.
    pub fn yield_now(&self) {
        self.port.proc_yield()
    }

    /// The preemption toggle, for callers that need to suspend thread
    /// switching without masking interrupts.
    pub fn preempt(&self) -> &PreemptLock<P> {
        &self.preempt
    }

    /// Number of live registered threads.
    pub fn thread_count(&self) -> usize {
        let prior = self.intr.disable();
        let count = self.shared.registry.lock().len();
        self.intr.enable(prior);
        count
    }
}
