//! Critical section that prevents thread switching but allows interrupts.

use crate::sync::Toggle;
use alloc::sync::Arc;
use keel_port::{PortLayer, ProcessController};

/// The process-wide preemption toggle, independent of [`super::InterruptLock`].
/// Interrupt handlers still run while this is disabled.
pub struct PreemptLock<P: PortLayer> {
    port: Arc<P>,
}

impl<P: PortLayer> PreemptLock<P> {
    pub(crate) fn new(port: Arc<P>) -> PreemptLock<P> {
        PreemptLock { port }
    }
}

impl<P: PortLayer> Toggle for PreemptLock<P> {
    fn disable(&self) -> bool {
        self.port.proc_switch_disable()
    }

    fn enable(&self, prior: bool) {
        self.port.proc_switch_enable(prior)
    }
}

impl<P: PortLayer> Clone for PreemptLock<P> {
    fn clone(&self) -> PreemptLock<P> {
        PreemptLock {
            port: Arc::clone(&self.port),
        }
    }
}
