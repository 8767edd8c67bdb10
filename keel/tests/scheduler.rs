//! Thread lifecycle, registry, and toggle behavior over the host port.

use keel::{Kernel, ThreadState, Toggle};
use keel_port_host::HostPort;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

fn kernel() -> (Arc<HostPort>, Arc<Kernel<HostPort>>) {
    let port = Arc::new(HostPort::new());
    let kernel = Arc::new(Kernel::new(Arc::clone(&port)));
    (port, kernel)
}

#[test]
fn state_machine_walks_new_runnable_dead() {
    let (_port, kernel) = kernel();
    let hold = Arc::new(kernel.create_semaphore(0).unwrap());
    let task_hold = Arc::clone(&hold);
    let thread = kernel
        .scheduler()
        .create_thread(move || {
            task_hold.acquire().unwrap();
        })
        .unwrap();

    assert_eq!(thread.status(), ThreadState::New);
    assert_eq!(kernel.scheduler().thread_count(), 0);

    thread.start();
    assert_eq!(thread.status(), ThreadState::Runnable);
    assert_eq!(kernel.scheduler().thread_count(), 1);

    hold.release();
    thread.join().unwrap();
    assert_eq!(thread.status(), ThreadState::Dead);
    assert_eq!(kernel.scheduler().thread_count(), 0);

    // Dead is terminal; a second start must not resurrect or re-register.
    thread.start();
    assert_eq!(thread.status(), ThreadState::Dead);
    assert_eq!(kernel.scheduler().thread_count(), 0);
}

#[test]
fn start_twice_registers_once() {
    let (_port, kernel) = kernel();
    let hold = Arc::new(kernel.create_semaphore(0).unwrap());
    let task_hold = Arc::clone(&hold);
    let thread = kernel
        .scheduler()
        .create_thread(move || {
            task_hold.acquire().unwrap();
        })
        .unwrap();
    thread.start();
    thread.start();
    assert_eq!(kernel.scheduler().thread_count(), 1);
    hold.release();
    thread.join().unwrap();
}

#[test]
fn two_started_threads_both_run_to_completion() {
    let (_port, kernel) = kernel();
    let counter = Arc::new(AtomicU32::new(0));
    let guard = Arc::new(kernel.create_mutex().unwrap());

    let mut threads = Vec::new();
    for _ in 0..2 {
        let task_counter = Arc::clone(&counter);
        let task_guard = Arc::clone(&guard);
        threads.push(
            kernel
                .scheduler()
                .create_thread(move || {
                    task_guard.lock().unwrap();
                    task_counter.fetch_add(1, Ordering::SeqCst);
                    task_guard.unlock();
                })
                .unwrap(),
        );
    }
    for thread in &threads {
        thread.start();
    }
    for thread in &threads {
        thread.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(kernel.scheduler().thread_count(), 0);
}

#[test]
fn current_thread_resolves_the_calling_thread() {
    let (_port, kernel) = kernel();
    let observed = Arc::new(AtomicU64::new(0));
    let task_kernel = Arc::clone(&kernel);
    let task_observed = Arc::clone(&observed);
    let thread = kernel
        .scheduler()
        .create_thread(move || {
            let me = task_kernel.scheduler().current_thread();
            task_observed.store(me.id(), Ordering::SeqCst);
        })
        .unwrap();
    let id = thread.id();
    thread.start();
    thread.join().unwrap();
    assert_eq!(observed.load(Ordering::SeqCst), id);
}

#[test]
fn dead_thread_is_never_resolved_again() {
    let (_port, kernel) = kernel();
    let first = kernel.scheduler().create_thread(|| {}).unwrap();
    let first_id = first.id();
    first.start();
    first.join().unwrap();
    assert_eq!(kernel.scheduler().thread_count(), 0);

    let task_kernel = Arc::clone(&kernel);
    let observed = Arc::new(AtomicU64::new(0));
    let task_observed = Arc::clone(&observed);
    let second = kernel
        .scheduler()
        .create_thread(move || {
            let me = task_kernel.scheduler().current_thread();
            task_observed.store(me.id(), Ordering::SeqCst);
        })
        .unwrap();
    let second_id = second.id();
    second.start();
    second.join().unwrap();
    assert_ne!(observed.load(Ordering::SeqCst), first_id);
    assert_eq!(observed.load(Ordering::SeqCst), second_id);
}

#[test]
fn interrupt_toggle_restores_in_lifo_order() {
    let (port, kernel) = kernel();
    let toggle = kernel.global_interrupt();
    assert!(port.interrupts_enabled());

    let outer = toggle.disable();
    let inner = toggle.disable();
    assert!(outer);
    assert!(!inner);
    toggle.enable(inner);
    assert!(!port.interrupts_enabled());
    toggle.enable(outer);
    assert!(port.interrupts_enabled());
}

#[test]
fn preempt_toggle_is_independent_of_interrupts() {
    let (port, kernel) = kernel();
    let preempt = kernel.scheduler().preempt();

    let prior = preempt.disable();
    assert!(prior);
    assert!(!port.switching_enabled());
    // Disabling thread switching says nothing about the interrupt mask.
    assert!(port.interrupts_enabled());
    preempt.enable(prior);
    assert!(port.switching_enabled());
}

#[test]
fn toggle_with_balances_around_the_closure() {
    let (port, kernel) = kernel();
    kernel.global_interrupt().with(|| {
        assert!(!port.interrupts_enabled());
    });
    assert!(port.interrupts_enabled());
}

#[test]
fn sleep_paths_suspend_for_roughly_the_requested_time() {
    let (_port, kernel) = kernel();
    let task_kernel = Arc::clone(&kernel);
    let thread = kernel
        .scheduler()
        .create_thread(move || {
            let clock = task_kernel.clock();
            let me = task_kernel.scheduler().current_thread();

            let before = clock.now();
            me.sleep(10, 0);
            assert!(clock.now().duration_since(before) >= keel::Duration::from_millis(10));

            let before = clock.now();
            me.sleep(0, 500_000);
            assert!(clock.now().duration_since(before) >= keel::Duration::from_micros(500));

            task_kernel.scheduler().yield_now();
        })
        .unwrap();
    thread.start();
    thread.join().unwrap();
}

#[test]
fn block_is_a_documented_no_op() {
    let (_port, kernel) = kernel();
    let sem = kernel.create_semaphore(1).unwrap();
    let thread = kernel.scheduler().create_thread(|| {}).unwrap();
    thread.block(&sem);
    assert_eq!(thread.status(), ThreadState::New);
    thread.start();
    thread.join().unwrap();
    // Never sleeps: priority accessors are fixed-value.
    assert_eq!(thread.priority(), 0);
    thread.set_priority(7);
    assert_eq!(thread.priority(), 0);
}

#[test]
fn handle_drop_while_running_does_not_unregister() {
    let (_port, kernel) = kernel();
    let hold = Arc::new(kernel.create_semaphore(0).unwrap());
    let task_hold = Arc::clone(&hold);
    let thread = kernel
        .scheduler()
        .create_thread(move || {
            task_hold.acquire().unwrap();
        })
        .unwrap();
    thread.start();
    let keep = thread.clone();
    drop(thread);
    assert_eq!(kernel.scheduler().thread_count(), 1);
    hold.release();
    keep.join().unwrap();
    assert_eq!(kernel.scheduler().thread_count(), 0);
}
