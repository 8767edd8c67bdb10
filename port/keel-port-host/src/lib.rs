//! Host-OS implementation of the keel porting layer.
//!
//! Everything the kernel core expects from the platform is modelled with
//! std primitives: processes are real `std::thread`s, the counting lock is
//! a mutex/condvar pair, and the interrupt controller is a dispatcher
//! thread that services pending unmasked sources only while interrupts are
//! globally enabled. The controller state a real platform keeps in
//! registers (pending bits, mask bits, the global enable) lives in one
//! mutex-guarded block here, and "disable all interrupts" waits out any
//! in-service handler before the mask takes effect, the way a single core
//! cannot be inside a handler and past `disable` at the same time.

use bit_field::BitField;
use const_env::from_env;
use keel_port::{
    ClockController, InterruptController, LockController, LockStatus, PortError, PortLayer,
    ProcAttr, ProcessController, ProcessFn, VectorFn,
};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::Instant;

/// Interrupt sources the host controller models. Bounded by the u16
/// pending/mask words.
#[from_env]
const HOST_MAX_SOURCES: usize = 16;
const _: () = assert!(HOST_MAX_SOURCES <= 16);

/// Counting-lock resources the host hands out before reporting exhaustion.
#[from_env]
const HOST_LOCK_CAPACITY: usize = 64;

thread_local! {
    static CURRENT_PROC: Cell<Option<u64>> = const { Cell::new(None) };
}

fn relock<'a, T>(
    result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    // A panicking handler or task must not wedge the whole port.
    result.unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one host counting lock.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct HostLockHandle(u32);

/// Handle to one host interrupt source.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct HostIntrHandle(u16);

struct CountingLock {
    permits: Mutex<u64>,
    cv: Condvar,
}

impl CountingLock {
    fn new(permits: u32) -> CountingLock {
        CountingLock {
            permits: Mutex::new(permits as u64),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = relock(self.permits.lock());
        while *permits == 0 {
            permits = relock(self.cv.wait(permits));
        }
        *permits -= 1;
    }

    fn release(&self) {
        let mut permits = relock(self.permits.lock());
        *permits += 1;
        self.cv.notify_one();
    }

    fn status(&self) -> LockStatus {
        if *relock(self.permits.lock()) == 0 {
            LockStatus::Locked
        } else {
            LockStatus::Unlocked
        }
    }
}

struct VectorEntry {
    vector: VectorFn,
}

struct IntrState {
    enabled: bool,
    pending: u16,
    masked: u16,
    in_service: bool,
    shutdown: bool,
    vectors: Vec<Option<Arc<VectorEntry>>>,
}

struct IntrShared {
    state: Mutex<IntrState>,
    cv: Condvar,
    dispatcher_id: OnceLock<thread::ThreadId>,
}

impl IntrShared {
    fn is_dispatcher(&self) -> bool {
        self.dispatcher_id.get() == Some(&thread::current().id())
    }
}

/// The host porting layer. One instance models one machine.
pub struct HostPort {
    locks: Mutex<Vec<Option<Arc<CountingLock>>>>,
    intr: Arc<IntrShared>,
    procs: Mutex<HashMap<u64, thread::JoinHandle<()>>>,
    next_proc: AtomicU64,
    switching: AtomicBool,
    epoch: Instant,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl HostPort {
    pub fn new() -> HostPort {
        let intr = Arc::new(IntrShared {
            state: Mutex::new(IntrState {
                enabled: true,
                pending: 0,
                masked: 0,
                in_service: false,
                shutdown: false,
                vectors: vec![None; HOST_MAX_SOURCES],
            }),
            cv: Condvar::new(),
            dispatcher_id: OnceLock::new(),
        });
        let shared = Arc::clone(&intr);
        let dispatcher = thread::Builder::new()
            .name("keel-intr-dispatch".into())
            .spawn(move || {
                let _ = shared.dispatcher_id.set(thread::current().id());
                dispatch_loop(&shared);
            })
            .ok();
        HostPort {
            locks: Mutex::new(Vec::new()),
            intr,
            procs: Mutex::new(HashMap::new()),
            next_proc: AtomicU64::new(1),
            switching: AtomicBool::new(true),
            epoch: Instant::now(),
            dispatcher: Mutex::new(dispatcher),
        }
    }

    fn lock_entry(&self, handle: HostLockHandle) -> Option<Arc<CountingLock>> {
        relock(self.locks.lock())
            .get(handle.0 as usize)
            .and_then(|slot| slot.clone())
    }

    /// Observed global interrupt enable, for tests and diagnostics.
    pub fn interrupts_enabled(&self) -> bool {
        relock(self.intr.state.lock()).enabled
    }

    /// Observed process-switching enable, for tests and diagnostics.
    pub fn switching_enabled(&self) -> bool {
        self.switching.load(Ordering::SeqCst)
    }
}

impl Default for HostPort {
    fn default() -> HostPort {
        HostPort::new()
    }
}

fn dispatch_loop(shared: &IntrShared) {
    let mut state = relock(shared.state.lock());
    loop {
        if state.shutdown {
            return;
        }
        let ready = if state.enabled && !state.in_service {
            (0..HOST_MAX_SOURCES)
                .find(|&slot| state.pending.get_bit(slot) && !state.masked.get_bit(slot))
        } else {
            None
        };
        let Some(slot) = ready else {
            state = relock(shared.cv.wait(state));
            continue;
        };
        state.pending.set_bit(slot, false);
        state.in_service = true;
        let entry = state.vectors[slot].clone();
        drop(state);
        if let Some(entry) = entry {
            log::trace!("servicing source {}", slot);
            (entry.vector)();
        }
        state = relock(shared.state.lock());
        state.in_service = false;
        shared.cv.notify_all();
    }
}

impl LockController for HostPort {
    type LockHandle = HostLockHandle;

    fn lock_alloc(&self, permits: u32) -> Option<HostLockHandle> {
        let mut locks = relock(self.locks.lock());
        let lock = Arc::new(CountingLock::new(permits));
        if let Some(index) = locks.iter().position(|slot| slot.is_none()) {
            locks[index] = Some(lock);
            return Some(HostLockHandle(index as u32));
        }
        if locks.len() < HOST_LOCK_CAPACITY {
            locks.push(Some(lock));
            return Some(HostLockHandle((locks.len() - 1) as u32));
        }
        None
    }

    fn lock_free(&self, handle: HostLockHandle) {
        let mut locks = relock(self.locks.lock());
        if let Some(slot) = locks.get_mut(handle.0 as usize) {
            *slot = None;
        }
    }

    fn lock_acquire(&self, handle: HostLockHandle) -> Result<(), PortError> {
        let lock = self.lock_entry(handle).ok_or(PortError::Fault)?;
        lock.acquire();
        Ok(())
    }

    fn lock_release(&self, handle: HostLockHandle) {
        if let Some(lock) = self.lock_entry(handle) {
            lock.release();
        }
    }

    fn lock_status(&self, handle: HostLockHandle) -> LockStatus {
        match self.lock_entry(handle) {
            Some(lock) => lock.status(),
            None => LockStatus::Indeterminate,
        }
    }
}

impl InterruptController for HostPort {
    type IntrHandle = HostIntrHandle;

    fn intr_alloc(&self, source: u32, vector: VectorFn) -> Option<HostIntrHandle> {
        let slot = source as usize;
        if slot >= HOST_MAX_SOURCES {
            return None;
        }
        let mut state = relock(self.intr.state.lock());
        if state.vectors[slot].is_some() {
            return None;
        }
        state.vectors[slot] = Some(Arc::new(VectorEntry { vector }));
        state.pending.set_bit(slot, false);
        // Fresh sources come out unmasked, like hardware that resets the
        // mask bit on allocation. Callers that want them quiet must mask.
        state.masked.set_bit(slot, false);
        Some(HostIntrHandle(slot as u16))
    }

    fn intr_free(&self, handle: HostIntrHandle) {
        let slot = handle.0 as usize;
        let mut state = relock(self.intr.state.lock());
        state.vectors[slot] = None;
        state.pending.set_bit(slot, false);
        state.masked.set_bit(slot, false);
    }

    fn intr_set(&self, handle: HostIntrHandle) {
        let slot = handle.0 as usize;
        let mut state = relock(self.intr.state.lock());
        if state.vectors[slot].is_some() {
            state.pending.set_bit(slot, true);
            self.intr.cv.notify_all();
        }
    }

    fn intr_clear(&self, handle: HostIntrHandle) {
        let slot = handle.0 as usize;
        let mut state = relock(self.intr.state.lock());
        state.pending.set_bit(slot, false);
    }

    fn intr_mask(&self, handle: HostIntrHandle) -> Result<(), PortError> {
        let slot = handle.0 as usize;
        let mut state = relock(self.intr.state.lock());
        if state.vectors[slot].is_none() {
            return Err(PortError::Fault);
        }
        state.masked.set_bit(slot, true);
        Ok(())
    }

    fn intr_unmask(&self, handle: HostIntrHandle) {
        let slot = handle.0 as usize;
        let mut state = relock(self.intr.state.lock());
        if state.vectors[slot].is_some() {
            state.masked.set_bit(slot, false);
            self.intr.cv.notify_all();
        }
    }

    fn intr_disable_all(&self) -> bool {
        let mut state = relock(self.intr.state.lock());
        // A core past `disable` cannot also be inside a handler; wait out
        // any in-service dispatch. The dispatcher itself never waits, or a
        // handler taking a critical section would deadlock the controller.
        if !self.intr.is_dispatcher() {
            while state.in_service {
                state = relock(self.intr.cv.wait(state));
            }
        }
        let prior = state.enabled;
        state.enabled = false;
        prior
    }

    fn intr_enable_all(&self, prior: bool) {
        if !prior {
            return;
        }
        let mut state = relock(self.intr.state.lock());
        state.enabled = true;
        self.intr.cv.notify_all();
    }
}

impl ProcessController for HostPort {
    type ProcId = u64;

    fn proc_create(&self, attr: &ProcAttr, entry: ProcessFn) -> Option<u64> {
        let id = self.next_proc.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new().name(format!("keel-proc-{id}"));
        if attr.stack_size > 0 {
            builder = builder.stack_size(attr.stack_size);
        }
        let handle = builder
            .spawn(move || {
                CURRENT_PROC.with(|current| current.set(Some(id)));
                entry();
            })
            .ok()?;
        relock(self.procs.lock()).insert(id, handle);
        Some(id)
    }

    fn proc_current(&self) -> u64 {
        CURRENT_PROC.with(|current| match current.get() {
            Some(id) => id,
            None => {
                // Context not created through this port; give it a stable
                // identity of its own.
                let id = self.next_proc.fetch_add(1, Ordering::Relaxed);
                current.set(Some(id));
                id
            }
        })
    }

    fn proc_join(&self, id: u64) -> Result<(), PortError> {
        let handle = relock(self.procs.lock()).remove(&id);
        match handle {
            Some(handle) => handle.join().map_err(|_| PortError::Fault),
            // Already reaped, or never ours: nothing left to wait for.
            None => Ok(()),
        }
    }

    fn proc_yield(&self) {
        thread::yield_now();
    }

    fn proc_switch_disable(&self) -> bool {
        self.switching.swap(false, Ordering::SeqCst)
    }

    fn proc_switch_enable(&self, prior: bool) {
        if prior {
            self.switching.store(true, Ordering::SeqCst);
        }
    }

    fn sleep_ms(&self, millis: u32) {
        thread::sleep(std::time::Duration::from_millis(millis as u64));
    }

    fn spin_us(&self, micros: u32) {
        let end = Instant::now() + std::time::Duration::from_micros(micros as u64);
        while Instant::now() < end {
            std::hint::spin_loop();
        }
    }

    fn terminate(&self, status: i32) -> ! {
        log::error!("host port terminating, status {}", status);
        std::process::exit(status)
    }
}

impl ClockController for HostPort {
    fn monotonic_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl PortLayer for HostPort {
    const NAME: &'static str = "host";
}

impl Drop for HostPort {
    fn drop(&mut self) {
        {
            let mut state = relock(self.intr.state.lock());
            state.shutdown = true;
            self.intr.cv.notify_all();
        }
        if let Some(handle) = relock(self.dispatcher.lock()).take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn counting_lock_blocks_at_zero_and_wakes_on_release() {
        let port = Arc::new(HostPort::new());
        let handle = port.lock_alloc(0).unwrap();
        assert_eq!(port.lock_status(handle), LockStatus::Locked);

        let waiter_port = Arc::clone(&port);
        let waiter = thread::spawn(move || waiter_port.lock_acquire(handle));
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        port.lock_release(handle);
        waiter.join().unwrap().unwrap();
        port.lock_free(handle);
        assert_eq!(port.lock_status(handle), LockStatus::Indeterminate);
    }

    #[test]
    fn pending_source_is_serviced_only_while_unmasked() {
        let port = HostPort::new();
        let fired = Arc::new(AtomicU32::new(0));
        let observer = Arc::clone(&fired);
        let handle = port
            .intr_alloc(3, Box::new(move || {
                observer.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        port.intr_mask(handle).unwrap();
        port.intr_set(handle);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        port.intr_unmask(handle);
        let deadline = Instant::now() + Duration::from_secs(2);
        while fired.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::yield_now();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        port.intr_free(handle);
    }

    #[test]
    fn global_disable_holds_dispatch_until_restored() {
        let port = HostPort::new();
        let fired = Arc::new(AtomicU32::new(0));
        let observer = Arc::clone(&fired);
        let handle = port
            .intr_alloc(0, Box::new(move || {
                observer.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        let prior = port.intr_disable_all();
        assert!(prior);
        port.intr_set(handle);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        port.intr_enable_all(prior);
        let deadline = Instant::now() + Duration::from_secs(2);
        while fired.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::yield_now();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        port.intr_free(handle);
    }

    #[test]
    fn enable_with_false_prior_does_not_enable() {
        let port = HostPort::new();
        let outer = port.intr_disable_all();
        let inner = port.intr_disable_all();
        assert!(!inner);
        port.intr_enable_all(inner);
        assert!(!port.interrupts_enabled());
        port.intr_enable_all(outer);
        assert!(port.interrupts_enabled());
    }

    #[test]
    fn created_process_reports_its_own_id() {
        let port = Arc::new(HostPort::new());
        let seen = Arc::new(Mutex::new(None));
        let seen_in_proc = Arc::clone(&seen);
        let proc_port = Arc::clone(&port);
        let id = port
            .proc_create(
                &ProcAttr::default(),
                Box::new(move || {
                    *seen_in_proc.lock().unwrap() = Some(proc_port.proc_current());
                }),
            )
            .unwrap();
        port.proc_join(id).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(id));
        // A second join has nothing left to wait for.
        port.proc_join(id).unwrap();
    }
}
