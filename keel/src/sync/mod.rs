//! Global critical-section toggles and the blocking synchronization
//! primitives built on the porting layer's counting lock.
//!
//! The core has two independent global toggles:
//!
//! - [`InterruptLock`]: masks all maskable interrupts.
//! - [`PreemptLock`]: masks preemptive thread switching, but allows
//!   interrupts.
//!
//! Both follow the same restore-state contract: `disable()` returns the
//! enabled state observed immediately before the call, and `enable(prior)`
//! re-enables only if `prior` was enabled. Disabling one toggle says nothing
//! about the other. Pairs must nest in strict LIFO order, each `enable` fed
//! the value of its own matching `disable`; interleaving pairs is a caller
//! error this layer does not detect. [`Toggle::with`] gets the pairing right
//! by construction.

pub mod interrupt_lock;
pub mod mutex;
pub mod preempt_lock;
pub mod semaphore;

pub use interrupt_lock::InterruptLock;
pub use mutex::Mutex;
pub use preempt_lock::PreemptLock;
pub use semaphore::Semaphore;

use keel_port::PortError;
use thiserror::Error;

/// Restore-state contract shared by the global critical-section toggles and
/// mirrored, per source, by interrupt vectors.
pub trait Toggle {
    /// Disables the guarded mechanism, returning the enabled state observed
    /// immediately before the call.
    fn disable(&self) -> bool;

    /// Restores the guarded mechanism if `prior` indicates it was enabled.
    /// A false `prior` is a no-op, never a forced disable.
    fn enable(&self, prior: bool);

    /// Runs `f` inside one disable/enable pair.
    fn with<R>(&self, f: impl FnOnce() -> R) -> R
    where
        Self: Sized,
    {
        let prior = self.disable();
        let rval = f();
        self.enable(prior);
        rval
    }
}

/// Failure of a semaphore or mutex operation.
#[derive(Error, PartialEq, Eq, Clone, Copy, Debug)]
pub enum SyncError {
    /// The porting layer had no counting-lock resource left.
    #[error("no counting-lock resource available")]
    OutOfResources,
    #[error(transparent)]
    Port(#[from] PortError),
}
