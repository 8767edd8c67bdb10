//! Demo: a kernel over the host port running two worker threads, a
//! semaphore handoff between them, and a synthetic interrupt.

use keel::{Kernel, Resource, Toggle};
use keel_port_host::HostPort;
use static_cell::StaticCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

static KERNEL: StaticCell<Kernel<HostPort>> = StaticCell::new();

fn main() {
    env_logger::init();

    let port = Arc::new(HostPort::new());
    let kernel: &'static Kernel<HostPort> = KERNEL.init(Kernel::new(port));

    let ticks = Arc::new(AtomicU32::new(0));
    let tick_counter = Arc::clone(&ticks);
    let timer = kernel
        .create_interrupt(
            move || {
                tick_counter.fetch_add(1, Ordering::SeqCst);
            },
            0,
        )
        .expect("interrupt vector");
    timer.enable(true);
    timer.jump();
    while ticks.load(Ordering::SeqCst) == 0 {
        std::thread::yield_now();
    }
    log::info!("synthetic interrupt serviced, ticks = {}", ticks.load(Ordering::SeqCst));

    let ready = Arc::new(kernel.create_semaphore(0).expect("semaphore"));
    let guard = Arc::new(kernel.create_mutex().expect("mutex"));
    let counter = Arc::new(AtomicU32::new(0));

    let producer_ready = Arc::clone(&ready);
    let producer_guard = Arc::clone(&guard);
    let producer_count = Arc::clone(&counter);
    let producer = kernel
        .scheduler()
        .create_thread(move || {
            for _ in 0..5 {
                let _ = producer_guard.lock();
                producer_count.fetch_add(1, Ordering::SeqCst);
                producer_guard.unlock();
                producer_ready.release();
            }
            log::info!("producer done");
        })
        .expect("producer thread");

    let consumer_ready = Arc::clone(&ready);
    let consumer = kernel
        .scheduler()
        .create_thread(move || {
            for n in 0..5u32 {
                let _ = consumer_ready.acquire();
                log::info!("consumer took permit {}", n);
            }
            let me = kernel.scheduler().current_thread();
            log::info!("consumer was thread {:?}", me.id());
        })
        .expect("consumer thread");

    producer.start();
    consumer.start();
    let _ = producer.join();
    let _ = consumer.join();

    kernel.global_interrupt().with(|| {
        // Quiet window: both workers are gone, nothing may preempt the
        // summary read.
        log::info!(
            "counter = {}, semaphore blocked = {}",
            counter.load(Ordering::SeqCst),
            ready.is_blocked()
        );
    });
    log::info!(
        "uptime: {} us, threads registered: {}",
        kernel.clock().uptime().as_micros(),
        kernel.scheduler().thread_count()
    );
}
