//! The fixed-size interrupt vector table and its dispatch protocol.
//!
//! The table maps a slot index to a registered handler. Each live slot has
//! one dispatch closure bound at the porting layer; the closure captures
//! nothing but the table handle and its own fixed index. On invocation it
//! checks the slot for a handler (an empty slot is a no-op), clears the
//! slot's jumping flag, and calls the handler synchronously on the
//! interrupted context.

use crate::api::InterruptHandler;
use crate::sync::{InterruptLock, Toggle};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use keel_port::{InterruptController, PortLayer, VectorFn};
use thiserror::Error;

/// Number of hardware vectors the platform can hand out. Hard ceiling; the
/// table never grows.
pub const VECTOR_COUNT: usize = 12;

/// Failure to claim an interrupt vector.
#[derive(Error, PartialEq, Eq, Clone, Copy, Debug)]
pub enum InterruptError {
    /// All vector slots are occupied by live interrupt objects.
    #[error("no free interrupt vector")]
    NoFreeVector,
    /// The porting layer could not allocate the requested source.
    #[error("interrupt source unavailable")]
    SourceUnavailable,
    /// The freshly allocated source could not be masked.
    #[error("interrupt source mask failed")]
    MaskFailed,
}

/// The process-wide vector table. Owned by the kernel composition root;
/// one per porting-layer instance.
///
/// Handler registration lives under a single table lock so that slot claim
/// is atomic; the jumping flags are per-slot atomics so the dispatch path
/// never takes the table lock for them. Every mutation additionally runs
/// inside the global interrupt critical section.
pub struct VectorTable<P: PortLayer> {
    port: Arc<P>,
    intr: InterruptLock<P>,
    handlers: spin::Mutex<[Option<Arc<dyn InterruptHandler>>; VECTOR_COUNT]>,
    jumping: [AtomicBool; VECTOR_COUNT],
}

impl<P: PortLayer> VectorTable<P> {
    pub(crate) fn new(port: Arc<P>) -> Arc<VectorTable<P>> {
        Arc::new(VectorTable {
            intr: InterruptLock::new(Arc::clone(&port)),
            port,
            handlers: spin::Mutex::new([const { None }; VECTOR_COUNT]),
            jumping: [const { AtomicBool::new(false) }; VECTOR_COUNT],
        })
    }

    /// Claims a free slot for `source` and registers `handler` on it.
    ///
    /// The source comes back masked regardless of how the porting layer
    /// hands it out; nothing fires until the caller enables the returned
    /// vector.
    pub fn attach(
        self: &Arc<Self>,
        handler: Arc<dyn InterruptHandler>,
        source: u32,
    ) -> Result<InterruptVector<P>, InterruptError> {
        let prior = self.intr.disable();
        let result = self.attach_slot(handler, source);
        self.intr.enable(prior);
        result
    }

    fn attach_slot(
        self: &Arc<Self>,
        handler: Arc<dyn InterruptHandler>,
        source: u32,
    ) -> Result<InterruptVector<P>, InterruptError> {
        // Claim a slot first; the claim is rolled back if the porting layer
        // refuses the source. The source cannot fire before it is allocated,
        // so the early registration is never observable.
        let index = {
            let mut handlers = self.handlers.lock();
            let Some(index) = handlers.iter().position(Option::is_none) else {
                return Err(InterruptError::NoFreeVector);
            };
            handlers[index] = Some(handler);
            index
        };
        let table = Arc::clone(self);
        let vector: VectorFn = Box::new(move || table.dispatch(index));
        let Some(handle) = self.port.intr_alloc(source, vector) else {
            self.handlers.lock()[index] = None;
            return Err(InterruptError::SourceUnavailable);
        };
        // The allocation may hand the source back unmasked; mask it here so
        // only an explicit enable() makes it live.
        if self.port.intr_mask(handle).is_err() {
            self.port.intr_free(handle);
            self.handlers.lock()[index] = None;
            return Err(InterruptError::MaskFailed);
        }
        log::debug!("vector {} bound to source {}", index, source);
        Ok(InterruptVector {
            table: Arc::clone(self),
            index,
            handle,
        })
    }

    /// Dispatch entry for one slot, invoked by the porting layer on the
    /// interrupted context.
    fn dispatch(&self, index: usize) {
        let handler = self.handlers.lock()[index].clone();
        let Some(handler) = handler else {
            // Slot retired between raise and service.
            return;
        };
        self.jumping[index].store(false, Ordering::Release);
        handler.handle();
    }
}

/// One claimed hardware vector. Releases its slot and the porting-layer
/// source when dropped.
pub struct InterruptVector<P: PortLayer> {
    table: Arc<VectorTable<P>>,
    index: usize,
    handle: P::IntrHandle,
}

impl<P: PortLayer> InterruptVector<P> {
    /// Raises this vector and waits for the handler dispatch to begin.
    ///
    /// Sets the slot's jumping flag, raises the source, restores the
    /// interrupt state, then spins until the trampoline clears the flag.
    /// Caller obligations: the source must be unmasked and interrupts must
    /// be restorable on entry. Calling with interrupts durably disabled, or
    /// with the source masked, spins forever.
    pub fn jump(&self) {
        let jumping = &self.table.jumping[self.index];
        let prior = self.table.intr.disable();
        jumping.store(true, Ordering::Release);
        self.table.port.intr_set(self.handle);
        self.table.intr.enable(prior);
        while jumping.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }

    /// Raises the source's pending status.
    pub fn set(&self) {
        self.table.port.intr_set(self.handle);
    }

    /// Clears the source's pending status.
    pub fn clear(&self) {
        self.table.port.intr_clear(self.handle);
    }

    /// Masks this source, returning true if the mask took effect. Mirrors
    /// the global toggle contract, scoped to one vector.
    pub fn disable(&self) -> bool {
        self.table.port.intr_mask(self.handle).is_ok()
    }

    /// Unmasks this source if `status` is true; no-op otherwise.
    pub fn enable(&self, status: bool) {
        if status {
            self.table.port.intr_unmask(self.handle);
        }
    }

    /// Disables all maskable interrupts. Convenience access to the global
    /// toggle for handler setup code that already holds a vector.
    pub fn disable_all(&self) -> bool {
        self.table.intr.disable()
    }

    /// Restores all maskable interrupts if `prior` was enabled.
    pub fn enable_all(&self, prior: bool) {
        self.table.intr.enable(prior)
    }

    /// Index of the table slot this vector occupies.
    pub fn slot(&self) -> usize {
        self.index
    }
}

impl<P: PortLayer> Drop for InterruptVector<P> {
    fn drop(&mut self) {
        let prior = self.table.intr.disable();
        self.table.port.intr_free(self.handle);
        self.table.handlers.lock()[self.index] = None;
        self.table.jumping[self.index].store(false, Ordering::Release);
        self.table.intr.enable(prior);
        log::debug!("vector {} released", self.index);
    }
}
