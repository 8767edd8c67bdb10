//! Semaphore and mutex behavior over the host port.

use keel::{Kernel, Resource, SyncError};
use keel_port_host::HostPort;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

fn kernel() -> (Arc<HostPort>, Kernel<HostPort>) {
    let port = Arc::new(HostPort::new());
    (Arc::clone(&port), Kernel::new(port))
}

#[test]
fn mutex_reports_blocked_only_while_locked() {
    let (_port, kernel) = kernel();
    let mutex = kernel.create_mutex().unwrap();
    assert!(!mutex.is_blocked());
    mutex.lock().unwrap();
    assert!(mutex.is_blocked());
    mutex.unlock();
    assert!(!mutex.is_blocked());
}

#[test]
fn multi_permit_round_trip_leaves_permits_unchanged() {
    let (port, kernel) = kernel();
    let sem = kernel.create_semaphore(2).unwrap();
    sem.acquire_many(2).unwrap();
    assert!(sem.is_blocked());
    sem.release_many(2);
    assert!(!sem.is_blocked());
    // The permits really came back: the same batch can be taken again.
    sem.acquire_many(2).unwrap();
    sem.release_many(2);
    // And the critical section around the batch was balanced.
    assert!(port.interrupts_enabled());
}

#[test]
fn fairness_flag_is_recorded_not_invented() {
    let (_port, kernel) = kernel();
    assert!(kernel.create_semaphore_fair(1, true).unwrap().is_fair());
    assert!(!kernel.create_semaphore(1).unwrap().is_fair());
}

#[test]
fn acquire_blocks_until_another_thread_releases() {
    let (_port, kernel) = kernel();
    let kernel = Arc::new(kernel);
    let sem = Arc::new(kernel.create_semaphore(0).unwrap());
    let got_permit = Arc::new(AtomicBool::new(false));

    let waiter_sem = Arc::clone(&sem);
    let waiter_flag = Arc::clone(&got_permit);
    let waiter = kernel
        .scheduler()
        .create_thread(move || {
            waiter_sem.acquire().unwrap();
            waiter_flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
    waiter.start();

    std::thread::sleep(Duration::from_millis(30));
    assert!(!got_permit.load(Ordering::SeqCst));

    sem.release();
    waiter.join().unwrap();
    assert!(got_permit.load(Ordering::SeqCst));
}

#[test]
fn lock_resources_run_out_and_come_back() {
    let (_port, kernel) = kernel();
    let mut held = Vec::new();
    let err = loop {
        match kernel.create_semaphore(1) {
            Ok(sem) => {
                held.push(sem);
                assert!(held.len() <= 4096, "porting layer never ran out");
            }
            Err(err) => break err,
        }
    };
    assert_eq!(err, SyncError::OutOfResources);
    // Dropping one frees its lock resource for reuse.
    held.pop();
    let sem = kernel.create_semaphore(1).unwrap();
    drop(sem);
}

#[test]
fn uptime_is_monotonic() {
    let (_port, kernel) = kernel();
    let a = kernel.clock().now();
    let begin = Instant::now();
    while begin.elapsed() < Duration::from_millis(2) {
        std::hint::spin_loop();
    }
    let b = kernel.clock().now();
    assert!(b > a);
    assert!(!kernel.clock().uptime().is_zero());
}
