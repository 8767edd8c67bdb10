//! Contract between the keel kernel core and the platform underneath it.
//!
//! The core does not program hardware or create execution contexts itself;
//! it drives whatever host OS or bare-metal layer implements these traits.
//! Each trait covers one concern of the platform: counting locks, hardware
//! interrupt sources, lightweight processes, and the monotonic clock. A
//! backend implements them all and is used through the [`PortLayer`]
//! supertrait.
//!
//! All waits offered here are infinite; bounded waits are composed above
//! this boundary, not below it.
#![no_std]
extern crate alloc;

use alloc::boxed::Box;

/// Dispatch entry bound to one hardware vector.
///
/// The kernel core hands one of these to [`InterruptController::intr_alloc`]
/// for every vector it claims. The backend must invoke it on the interrupted
/// context whenever the source fires while unmasked and interrupts are
/// globally enabled.
pub type VectorFn = Box<dyn Fn() + Send + Sync + 'static>;

/// Process entry point. Runs once on the new execution context.
pub type ProcessFn = Box<dyn FnOnce() + Send + 'static>;

/// Creation attributes for a process resource.
#[derive(Clone, Copy, Debug)]
pub struct ProcAttr {
    /// Requested stack size in bytes.
    pub stack_size: usize,
    /// Priority hint. Backends may ignore it.
    pub priority: i32,
}

impl Default for ProcAttr {
    fn default() -> ProcAttr {
        ProcAttr {
            stack_size: 64 * 1024,
            priority: 0,
        }
    }
}

/// Observed state of a counting lock.
///
/// Backends that cannot tell report [`LockStatus::Indeterminate`]; callers
/// are expected to treat that as locked.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum LockStatus {
    Unlocked,
    Locked,
    Indeterminate,
}

/// Failure reported by a porting-layer operation.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum PortError {
    /// The backend ran out of the requested resource.
    Exhausted,
    /// The backend failed in a way it cannot recover or describe further.
    Fault,
}

impl core::fmt::Display for PortError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PortError::Exhausted => write!(f, "porting layer resource exhausted"),
            PortError::Fault => write!(f, "porting layer fault"),
        }
    }
}

impl core::error::Error for PortError {}

/// Counting-lock primitive.
///
/// One handle is one lock resource with its own permit count. A handle is
/// valid from `lock_alloc` until `lock_free` and must be freed exactly once.
pub trait LockController {
    type LockHandle: Copy + Eq + core::fmt::Debug + Send + Sync;

    /// Allocates a lock with `permits` initial permits. `None` when the
    /// backend has no lock resources left.
    fn lock_alloc(&self, permits: u32) -> Option<Self::LockHandle>;

    /// Releases the lock resource. Waiters still blocked on the handle are
    /// left to the backend; the core never frees a lock it knows to have
    /// waiters.
    fn lock_free(&self, handle: Self::LockHandle);

    /// Takes one permit, blocking the calling context indefinitely until one
    /// is available.
    fn lock_acquire(&self, handle: Self::LockHandle) -> Result<(), PortError>;

    /// Returns one permit.
    fn lock_release(&self, handle: Self::LockHandle);

    /// Reports whether an acquire would currently block.
    fn lock_status(&self, handle: Self::LockHandle) -> LockStatus;
}

/// Hardware interrupt sources and the global interrupt mask.
pub trait InterruptController {
    type IntrHandle: Copy + Eq + core::fmt::Debug + Send + Sync;

    /// Claims `source` and binds `vector` as its dispatch entry. The mask
    /// state of a freshly allocated source is backend-defined; callers that
    /// need it masked must call [`InterruptController::intr_mask`] before
    /// relying on it.
    fn intr_alloc(&self, source: u32, vector: VectorFn) -> Option<Self::IntrHandle>;

    /// Releases the source and unbinds its vector.
    fn intr_free(&self, handle: Self::IntrHandle);

    /// Raises the source's pending status, as if the hardware had fired.
    fn intr_set(&self, handle: Self::IntrHandle);

    /// Clears the source's pending status.
    fn intr_clear(&self, handle: Self::IntrHandle);

    /// Masks this source only.
    fn intr_mask(&self, handle: Self::IntrHandle) -> Result<(), PortError>;

    /// Unmasks this source only.
    fn intr_unmask(&self, handle: Self::IntrHandle);

    /// Disables all maskable interrupts, returning the enabled state
    /// observed immediately before the call.
    fn intr_disable_all(&self) -> bool;

    /// Re-enables all maskable interrupts if `prior` is true; a false
    /// `prior` leaves the current state untouched.
    fn intr_enable_all(&self, prior: bool);
}

/// Lightweight processes and the preemption switch.
pub trait ProcessController {
    type ProcId: Copy + Eq + core::fmt::Debug + Send + Sync;

    /// Creates a process that runs `entry` once scheduled. `None` when
    /// creation fails.
    fn proc_create(&self, attr: &ProcAttr, entry: ProcessFn) -> Option<Self::ProcId>;

    /// Identifier of the calling context.
    fn proc_current(&self) -> Self::ProcId;

    /// Blocks the caller until the process ends. Joining a process that has
    /// already been reaped completes immediately.
    fn proc_join(&self, id: Self::ProcId) -> Result<(), PortError>;

    /// Yields the processor to another runnable process.
    fn proc_yield(&self);

    /// Disables preemptive process switching, returning the prior enabled
    /// state. Independent of the interrupt mask.
    fn proc_switch_disable(&self) -> bool;

    /// Re-enables process switching if `prior` is true; no-op otherwise.
    fn proc_switch_enable(&self, prior: bool);

    /// Millisecond sleep. Yields the processor for the duration.
    fn sleep_ms(&self, millis: u32);

    /// Microsecond delay that does not yield the processor. Burns the
    /// caller's whole time quantum; only for short waits.
    fn spin_us(&self, micros: u32);

    /// Ends the whole process image with `status`. Does not return.
    fn terminate(&self, status: i32) -> !;
}

/// Monotonic time source.
pub trait ClockController {
    /// Nanoseconds since an arbitrary epoch fixed for the backend's
    /// lifetime. Never decreases.
    fn monotonic_ns(&self) -> u64;
}

/// A complete porting layer.
pub trait PortLayer:
    LockController + InterruptController + ProcessController + ClockController + Send + Sync + 'static
{
    const NAME: &'static str;
}
