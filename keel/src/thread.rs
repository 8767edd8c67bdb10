//! Scheduler threads and their state machine.

use crate::api::{Resource, Task};
use crate::kernel::scheduler::{SchedulerShared, ThreadRecord};
use crate::sync::{InterruptLock, Semaphore, SyncError, Toggle};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU8, Ordering};
use keel_port::{PortError, PortLayer, ProcAttr, ProcessController};
use thiserror::Error;

/// Priority reported for every thread. The porting layer owns scheduling
/// policy; this core neither stores nor forwards priorities.
pub const NORM_PRIORITY: i32 = 0;

/// Execution state of a scheduler thread.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum ThreadState {
    /// Created: the underlying process exists and is parked on the startup
    /// gate. A thread that is never started stays parked indefinitely.
    New = 0,

    /// Started: registered with the scheduler and released to run.
    Runnable = 1,

    /// The task returned, or the thread was torn down. Terminal; a thread
    /// never leaves this state.
    Dead = 2,
}

impl ThreadState {
    fn from_u8(raw: u8) -> ThreadState {
        match raw {
            0 => ThreadState::New,
            1 => ThreadState::Runnable,
            _ => ThreadState::Dead,
        }
    }
}

/// Failure to create a thread.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The startup-gate semaphore could not be allocated.
    #[error("startup gate: {0}")]
    StartupGate(#[source] SyncError),
    /// The porting layer refused to create the process resource.
    #[error("process creation failed")]
    Process,
}

pub(crate) struct ThreadInner<P: PortLayer> {
    port: Arc<P>,
    shared: Arc<SchedulerShared<P>>,
    intr: InterruptLock<P>,
    /// Holds the new process until `start()` releases it.
    gate: Semaphore<P>,
    state: AtomicU8,
}

impl<P: PortLayer> ThreadInner<P> {
    pub(crate) fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Entry trampoline, run on the new execution context.
    fn run(self: Arc<Self>, mut task: Box<dyn Task>) {
        if self.gate.acquire().is_ok() {
            task.run();
        } else {
            log::error!("startup gate failed; thread exits without running");
        }
        // Die: the transition and the unregistration are one atomic unit.
        let prior = self.intr.disable();
        self.state.store(ThreadState::Dead as u8, Ordering::Release);
        self.shared.remove(Arc::as_ptr(&self));
        self.intr.enable(prior);
        log::trace!("thread finished");
    }
}

impl<P: PortLayer> Drop for ThreadInner<P> {
    fn drop(&mut self) {
        // Natural death already unregistered the thread; this keeps the
        // registry free of records for a thread mid-teardown.
        let prior = self.intr.disable();
        self.shared.remove(self as *const ThreadInner<P>);
        self.intr.enable(prior);
    }
}

/// Handle to a scheduler thread.
///
/// The handle and the running task share ownership of the thread; dropping
/// the handle while the task runs does not unregister or stop it.
pub struct Thread<P: PortLayer> {
    inner: Arc<ThreadInner<P>>,
    id: P::ProcId,
}

impl<P: PortLayer> Thread<P> {
    pub(crate) fn spawn(
        task: Box<dyn Task>,
        port: Arc<P>,
        shared: Arc<SchedulerShared<P>>,
    ) -> Result<Thread<P>, SpawnError> {
        let gate = Semaphore::new(Arc::clone(&port), 0, false).map_err(SpawnError::StartupGate)?;
        let inner = Arc::new(ThreadInner {
            intr: InterruptLock::new(Arc::clone(&port)),
            shared,
            gate,
            state: AtomicU8::new(ThreadState::New as u8),
            port: Arc::clone(&port),
        });
        let attr = ProcAttr {
            stack_size: task.stack_size(),
            priority: NORM_PRIORITY,
        };
        let entry_inner = Arc::clone(&inner);
        let id = port
            .proc_create(&attr, Box::new(move || entry_inner.run(task)))
            .ok_or(SpawnError::Process)?;
        log::debug!("thread {:?} created", id);
        Ok(Thread { inner, id })
    }

    pub(crate) fn from_record(inner: Arc<ThreadInner<P>>, id: P::ProcId) -> Thread<P> {
        Thread { inner, id }
    }

    /// Causes this thread to begin execution. No-op unless the thread is
    /// still [`ThreadState::New`].
    ///
    /// Registration and the `New -> Runnable` transition happen in one
    /// interrupt critical section; the startup gate is released after it so
    /// the task never runs against a half-updated registry.
    pub fn start(&self) {
        let mut released = false;
        let prior = self.inner.intr.disable();
        if self
            .inner
            .state
            .compare_exchange(
                ThreadState::New as u8,
                ThreadState::Runnable as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.inner.shared.add(ThreadRecord {
                thread: Arc::downgrade(&self.inner),
                id: self.id,
            });
            released = true;
        }
        self.inner.intr.enable(prior);
        if released {
            self.inner.gate.release();
            log::debug!("thread {:?} started", self.id);
        }
    }

    /// Waits for this thread to die.
    pub fn join(&self) -> Result<(), PortError> {
        self.inner.port.proc_join(self.id)
    }

    /// Suspends the calling context.
    ///
    /// With `millis == 0`, `nanos` is rounded down to microseconds and
    /// served by a delay that does not yield the processor. That path burns
    /// the caller's whole time quantum and is unsuitable for long waits.
    /// Any other value sleeps with millisecond granularity and yields.
    pub fn sleep(&self, millis: u64, nanos: u32) {
        if millis == 0 {
            let micros = nanos / 1000;
            self.inner.port.spin_us(micros);
        } else {
            self.inner
                .port
                .sleep_ms(millis.try_into().unwrap_or(u32::MAX));
        }
    }

    /// Blocks this thread on the given resource.
    ///
    /// Reserved extension point; currently does nothing.
    // TODO: park the thread on `resource` once the porting layer grows a
    // wait-object primitive.
    pub fn block(&self, _resource: &dyn Resource) {}

    /// Porting-layer identifier of this thread.
    pub fn id(&self) -> P::ProcId {
        self.id
    }

    pub fn priority(&self) -> i32 {
        NORM_PRIORITY
    }

    /// Accepted and ignored; the porting layer owns priorities.
    pub fn set_priority(&self, _priority: i32) {}

    pub fn status(&self) -> ThreadState {
        self.inner.state()
    }
}

impl<P: PortLayer> Clone for Thread<P> {
    fn clone(&self) -> Thread<P> {
        Thread {
            inner: Arc::clone(&self.inner),
            id: self.id,
        }
    }
}
