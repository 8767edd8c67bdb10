//! Critical section that blocks all maskable interrupts.

use crate::sync::Toggle;
use alloc::sync::Arc;
use keel_port::{InterruptController, PortLayer};

/// The process-wide interrupt toggle. Every multi-step mutation of state
/// shared with interrupt handlers runs between [`Toggle::disable`] and
/// [`Toggle::enable`] on this lock.
pub struct InterruptLock<P: PortLayer> {
    port: Arc<P>,
}

impl<P: PortLayer> InterruptLock<P> {
    pub(crate) fn new(port: Arc<P>) -> InterruptLock<P> {
        InterruptLock { port }
    }
}

impl<P: PortLayer> Toggle for InterruptLock<P> {
    fn disable(&self) -> bool {
        self.port.intr_disable_all()
    }

    fn enable(&self, prior: bool) {
        self.port.intr_enable_all(prior)
    }
}

impl<P: PortLayer> Clone for InterruptLock<P> {
    fn clone(&self) -> InterruptLock<P> {
        InterruptLock {
            port: Arc::clone(&self.port),
        }
    }
}
