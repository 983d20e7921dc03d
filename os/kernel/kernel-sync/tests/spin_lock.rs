use kernel_sync::SpinLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn the_guard_releases_on_drop() {
    let table = SpinLock::new([0u8; 4]);
    {
        let mut slots = table.lock();
        slots[2] = 9;
        assert!(table.is_locked());
        assert!(table.try_lock().is_none());
    }
    assert!(!table.is_locked());
    assert_eq!(table.try_lock().map(|slots| slots[2]), Some(9));
}

#[test]
fn unwinding_releases_the_lock() {
    let ticks = SpinLock::new(0u64);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut t = ticks.lock();
        *t = 17;
        panic!("handler bug");
    }));
    assert!(outcome.is_err());
    assert!(!ticks.is_locked());
    assert_eq!(*ticks.lock(), 17);
}

#[test]
fn a_waiter_gets_the_lock_once_released() {
    let lock = Arc::new(SpinLock::new(Vec::<&str>::new()));
    let ready = Arc::new(Barrier::new(2));
    let mut first = lock.lock();
    first.push("holder");

    let waiter = {
        let lock = Arc::clone(&lock);
        let ready = Arc::clone(&ready);
        thread::spawn(move || {
            ready.wait();
            lock.lock().push("waiter");
        })
    };
    ready.wait();
    drop(first);
    waiter.join().unwrap();

    assert_eq!(lock.lock().as_slice(), &["holder", "waiter"]);
}

#[test]
fn contending_threads_never_overlap() {
    const THREADS: usize = 6;
    const ROUNDS: usize = 4_000;

    let counter = Arc::new(SpinLock::new(0usize));
    let inside = Arc::new(AtomicBool::new(false));
    let start = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let inside = Arc::clone(&inside);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..ROUNDS {
                    let mut n = counter.lock();
                    assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                    *n += 1;
                    inside.store(false, Ordering::SeqCst);
                    drop(n);
                    thread::yield_now();
                }
            })
        })
        .collect();

    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(*counter.lock(), THREADS * ROUNDS);
}

#[test]
fn boxed_trait_objects_can_be_shared() {
    trait Sink: Send {
        fn put(&mut self, byte: u8);
        fn taken(&self) -> usize;
    }
    struct Count(usize);
    impl Sink for Count {
        fn put(&mut self, _: u8) {
            self.0 += 1;
        }
        fn taken(&self) -> usize {
            self.0
        }
    }

    let sink: Arc<SpinLock<Box<dyn Sink>>> = Arc::new(SpinLock::new(Box::new(Count(0))));
    let other = Arc::clone(&sink);
    thread::spawn(move || other.lock().put(b'x')).join().unwrap();
    assert_eq!(sink.lock().taken(), 1);
}
