//! Fatal-path collaborator.

use alloc::sync::Arc;
use keel_port::{PortLayer, ProcessController};

/// Runtime control over the whole process image.
pub struct Runtime<P: PortLayer> {
    port: Arc<P>,
}

impl<P: PortLayer> Runtime<P> {
    pub(crate) fn new(port: Arc<P>) -> Runtime<P> {
        Runtime { port }
    }

    /// Ends the process with `status`. The one escalation path in the core:
    /// reserved for invariant violations the facade cannot survive.
    pub fn terminate(&self, status: i32) -> ! {
        log::error!("kernel terminating with status {}", status);
        self.port.terminate(status)
    }
}
