//! Concurrency core of a small embedded kernel facade.
//!
//! keel layers a thread scheduler, counting-semaphore and mutex primitives,
//! and a fixed-size interrupt vector table on top of a porting layer
//! ([`keel_port::PortLayer`]) that supplies the actual processes, locks,
//! interrupt sources, and clock. The core tracks which threads exist and
//! which one runs; scheduling policy itself belongs to the platform below.
//!
//! Everything is composed by [`Kernel`], the single per-process root:
//!
//! ```ignore
//! let kernel = Kernel::new(Arc::new(port));
//! let thread = kernel.scheduler().create_thread(|| work())?;
//! thread.start();
//! thread.join()?;
//! ```
#![no_std]
extern crate alloc;

pub mod api;
pub mod kernel;
pub mod sync;
pub mod thread;
pub mod time;

pub use api::{InterruptHandler, Resource, Task};
pub use kernel::interrupt::{InterruptError, InterruptVector, VECTOR_COUNT};
pub use kernel::runtime::Runtime;
pub use kernel::scheduler::Scheduler;
pub use kernel::Kernel;
pub use sync::{InterruptLock, Mutex, PreemptLock, Semaphore, SyncError, Toggle};
pub use thread::{SpawnError, Thread, ThreadState};
pub use time::{Clock, Duration, Instant};
