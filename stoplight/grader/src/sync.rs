pub mod semaphore {
    use alloc::{string::String, sync::Arc};
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use grading::boot;
    use kestrel::{
        interrupt::InterruptGuard,
        sync::Semaphore,
        thread::{self, Current, ThreadBuilder, ThreadState, WaitChannel},
        unwind::{self, Caught},
    };

    /// A semaphore cannot be destroyed while a thread sleeps on it.
    #[boot]
    pub fn destroy_with_sleeper() {
        let sema = Semaphore::new("s", 0);
        let chan = sema.channel();
        let sleeper = ThreadBuilder::new("sleeper")
            .spawn(move || {
                let guard = InterruptGuard::new();
                Current::sleep(chan);
                drop(guard);
            })
            .unwrap();
        assert!(!sema.has_waiters());
        Current::yield_now();
        assert!(sema.has_waiters());

        let outcome = unwind::catch(move || sema.destroy());
        assert_eq!(
            outcome,
            Err(Caught::Panic(String::from(
                "Semaphore `s` destroyed while threads wait on it."
            )))
        );
        assert_eq!(thread::wakeup(chan), 1);
        assert_eq!(sleeper.join(), Ok(0));
    }

    /// P on a zero semaphore blocks until somebody calls V.
    #[boot]
    pub fn sema_0() {
        let sema = Arc::new(Semaphore::new("sema_0", 0));
        let is_woken_up = Arc::new(AtomicBool::new(false));
        let count_after = Arc::new(AtomicUsize::new(usize::MAX));

        let thread = {
            let (sema, is_woken_up, count_after) =
                (sema.clone(), is_woken_up.clone(), count_after.clone());
            ThreadBuilder::new("worker")
                .spawn(move || {
                    sema.wait();
                    count_after.store(sema.count(), Ordering::SeqCst);
                    is_woken_up.store(true, Ordering::SeqCst);
                })
                .unwrap()
        };

        Current::yield_now();
        assert!(!is_woken_up.load(Ordering::SeqCst));
        assert!(matches!(
            thread::get_state_by_tid(thread.tid),
            Ok(ThreadState::Sleeping(WaitChannel::Semaphore(_)))
        ));

        sema.signal();
        assert_eq!(
            thread::get_state_by_tid(thread.tid),
            Ok(ThreadState::Runnable)
        );
        assert_eq!(thread.join(), Ok(0));

        assert!(is_woken_up.load(Ordering::SeqCst));
        assert_eq!(count_after.load(Ordering::SeqCst), 0);
        assert_eq!(sema.count(), 0);
    }

    /// With one permit, every V lets exactly one more thread through.
    #[boot]
    pub fn sema_1() {
        const COUNT: usize = 16;
        let sema = Arc::new(Semaphore::new("sema_1", 1));
        let counter = Arc::new(AtomicUsize::new(0));

        let handles = (0..COUNT)
            .map(|i| {
                let (sema, counter) = (sema.clone(), counter.clone());
                ThreadBuilder::new(alloc::format!("t{i}"))
                    .spawn(move || {
                        sema.wait();
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect::<alloc::vec::Vec<_>>();

        Current::yield_now();
        let mut expected_cnt = 1;
        assert_eq!(counter.load(Ordering::SeqCst), expected_cnt);
        while expected_cnt < COUNT {
            expected_cnt += 1;
            sema.signal();
            for _ in 0..4 {
                Current::yield_now();
            }
            assert_eq!(counter.load(Ordering::SeqCst), expected_cnt);
        }
        for handle in handles {
            assert_eq!(handle.join(), Ok(0));
        }
        assert_eq!(sema.count(), 0);
    }

    /// A semaphore initialized to N admits N threads.
    #[boot]
    pub fn n_permits() {
        const COUNT: usize = 5;
        const PERMITS: usize = 3;
        let sema = Arc::new(Semaphore::new("permits", PERMITS));
        let counter = Arc::new(AtomicUsize::new(0));

        let handles = (0..COUNT)
            .map(|i| {
                let (sema, counter) = (sema.clone(), counter.clone());
                ThreadBuilder::new(alloc::format!("support_{i}"))
                    .spawn(move || {
                        sema.wait();
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect::<alloc::vec::Vec<_>>();

        Current::yield_now();
        assert_eq!(counter.load(Ordering::SeqCst), PERMITS);
        assert_eq!(sema.count(), 0);
        for _ in PERMITS..COUNT {
            sema.signal();
        }
        for handle in handles {
            assert_eq!(handle.join(), Ok(0));
        }
        assert_eq!(counter.load(Ordering::SeqCst), COUNT);
        Arc::try_unwrap(sema).ok().unwrap().destroy();
    }
}

pub mod lock {
    use alloc::{string::String, sync::Arc, vec::Vec};
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use grading::boot;
    use kestrel::{
        Kernel, SystemConfigurationBuilder,
        sync::{Lock, Semaphore},
        thread::{self, BOOT_TID, Current, ThreadBuilder, ThreadState, WaitChannel, scheduler::RoundRobin},
        unwind::{self, Caught},
    };

    /// A blocked acquirer gets the lock once the holder releases it.
    #[boot]
    pub fn handoff() {
        let lock = Arc::new(Lock::new("L"));
        let gate = Arc::new(Semaphore::new("gate", 0));
        let acquired = Arc::new(AtomicBool::new(false));

        lock.acquire();
        assert!(lock.is_held_by_caller());
        assert_eq!(lock.holder(), Some(BOOT_TID));

        let b = {
            let (lock, gate, acquired) = (lock.clone(), gate.clone(), acquired.clone());
            ThreadBuilder::new("B")
                .spawn(move || {
                    lock.acquire();
                    assert!(lock.is_held_by_caller());
                    acquired.store(true, Ordering::SeqCst);
                    gate.wait();
                    lock.release();
                })
                .unwrap()
        };

        Current::yield_now();
        assert!(matches!(
            thread::get_state_by_tid(b.tid),
            Ok(ThreadState::Sleeping(WaitChannel::Lock(_)))
        ));
        assert!(!acquired.load(Ordering::SeqCst));

        lock.release();
        assert_eq!(lock.holder(), None);
        Current::yield_now();
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(lock.holder(), Some(b.tid));
        assert!(!lock.is_held_by_caller());

        gate.signal();
        assert_eq!(b.join(), Ok(0));
        assert_eq!(lock.holder(), None);
        Arc::try_unwrap(lock).ok().unwrap().destroy();
    }

    /// No two threads are ever inside the critical section, even when the
    /// timer preempts them there.
    #[boot(SystemConfigurationBuilder::new().set_scheduler(RoundRobin::new(1)))]
    pub fn mutual_exclusion() {
        const THREADS: usize = 6;
        const ROUNDS: usize = 20;
        let lock = Arc::new(Lock::new("counter"));
        let inside = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));

        let handles = (0..THREADS)
            .map(|i| {
                let (lock, inside, total) = (lock.clone(), inside.clone(), total.clone());
                ThreadBuilder::new(alloc::format!("worker{i}"))
                    .spawn(move || {
                        for _ in 0..ROUNDS {
                            lock.acquire();
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            Current::yield_now();
                            total.fetch_add(1, Ordering::SeqCst);
                            assert_eq!(inside.fetch_sub(1, Ordering::SeqCst), 1);
                            lock.release();
                        }
                    })
                    .unwrap()
            })
            .collect::<Vec<_>>();
        for handle in handles {
            assert_eq!(handle.join(), Ok(0));
        }
        assert_eq!(total.load(Ordering::SeqCst), THREADS * ROUNDS);
    }

    /// Releasing somebody else's lock is a kernel panic.
    pub fn release_by_non_owner() {
        let outcome = unwind::catch(|| {
            let _kernel = Kernel::bootstrap(SystemConfigurationBuilder::new().build());
            let lock = Arc::new(Lock::new("owned"));
            lock.acquire();
            let thief = {
                let lock = lock.clone();
                ThreadBuilder::new("thief")
                    .spawn(move || lock.release())
                    .unwrap()
            };
            let _ = thief.join();
        });
        assert_eq!(
            outcome,
            Err(Caught::Panic(String::from(
                "Kernel panic: thread `thief` panicked: Lock `owned` released by thread 1, but it is held by Some(0)."
            )))
        );
    }

    /// Acquiring a lock twice is a panic, not a hang.
    #[boot]
    pub fn acquire_twice() {
        let lock = Lock::new("twice");
        lock.acquire();
        let outcome = unwind::catch(|| lock.acquire());
        assert_eq!(
            outcome,
            Err(Caught::Panic(String::from(
                "Lock `twice` acquired twice by thread 0."
            )))
        );
        lock.release();
        lock.destroy();
    }

    /// A held lock cannot be destroyed.
    #[boot]
    pub fn destroy_held() {
        let lock = Lock::new("held");
        lock.acquire();
        let outcome = unwind::catch(move || lock.destroy());
        assert!(matches!(outcome, Err(Caught::Panic(_))));
    }
}

pub mod condition_variable {
    use alloc::{collections::VecDeque, string::String, sync::Arc, vec::Vec};
    use core::sync::atomic::{AtomicUsize, Ordering};
    use grading::boot;
    use kestrel::{
        SystemConfigurationBuilder,
        interrupt::InterruptGuard,
        sync::{ConditionVariable, Lock, SpinLock},
        thread::{self, Current, ThreadBuilder, scheduler::Lottery},
        unwind::{self, Caught},
    };

    /// A condition variable cannot be destroyed while a thread waits on it.
    #[boot]
    pub fn destroy_with_waiter() {
        let cv = ConditionVariable::new("cv");
        let chan = cv.channel();
        let waiter = ThreadBuilder::new("waiter")
            .spawn(move || {
                let guard = InterruptGuard::new();
                Current::sleep(chan);
                drop(guard);
            })
            .unwrap();
        Current::yield_now();
        assert!(thread::has_sleepers(chan));

        let outcome = unwind::catch(move || cv.destroy());
        assert_eq!(
            outcome,
            Err(Caught::Panic(String::from(
                "Condition variable `cv` destroyed while threads wait on it."
            )))
        );
        assert_eq!(thread::wakeup(chan), 1);
        assert_eq!(waiter.join(), Ok(0));
    }

    const MAX: usize = 2;

    struct Buffer {
        lock: Lock,
        items: SpinLock<VecDeque<usize>>,
        not_full: ConditionVariable,
        not_empty: ConditionVariable,
    }

    impl Buffer {
        fn new() -> Self {
            Self {
                lock: Lock::new("buffer"),
                items: SpinLock::new(VecDeque::new()),
                not_full: ConditionVariable::new("not_full"),
                not_empty: ConditionVariable::new("not_empty"),
            }
        }

        fn len(&self) -> usize {
            let items = self.items.lock();
            let len = items.len();
            items.unlock();
            len
        }

        fn put(&self, val: usize) {
            self.lock.acquire();
            self.not_full.wait_while(&self.lock, || self.len() == MAX);
            let mut items = self.items.lock();
            items.push_back(val);
            items.unlock();
            self.not_empty.signal(&self.lock);
            self.lock.release();
        }

        fn get(&self) -> usize {
            self.lock.acquire();
            self.not_empty.wait_while(&self.lock, || self.len() == 0);
            assert!(self.lock.is_held_by_caller());
            let mut items = self.items.lock();
            let item = items.pop_front();
            items.unlock();
            self.not_full.signal(&self.lock);
            self.lock.release();
            item.unwrap_or_else(|| panic!("woken up on an empty buffer"))
        }
    }

    fn bounded_buffer() {
        const ITEMS: usize = 10;
        let buffer = Arc::new(Buffer::new());
        let output = Arc::new(SpinLock::new(Vec::new()));

        let consumers = (0..ITEMS)
            .map(|_| {
                let (buffer, output) = (buffer.clone(), output.clone());
                ThreadBuilder::new("consumer")
                    .spawn(move || {
                        let d = buffer.get();
                        let mut guard = output.lock();
                        guard.push(d);
                        guard.unlock();
                    })
                    .unwrap()
            })
            .collect::<Vec<_>>();

        let producer = {
            let buffer = buffer.clone();
            ThreadBuilder::new("producer")
                .spawn(move || {
                    for i in 0..ITEMS {
                        buffer.put(i);
                    }
                })
                .unwrap()
        };

        for consumer in consumers {
            assert_eq!(consumer.join(), Ok(0));
        }
        assert_eq!(producer.join(), Ok(0));

        let mut output = output.lock();
        output.sort();
        assert_eq!(&*output, &(0..ITEMS).collect::<Vec<_>>());
        output.unlock();
    }

    /// Producer and consumers over a two-slot buffer.
    #[boot]
    pub fn bounded_buffer_1() {
        bounded_buffer()
    }

    /// The same under a preemptive random scheduler.
    #[boot(SystemConfigurationBuilder::new().set_scheduler(Lottery::new(7, 3)))]
    pub fn bounded_buffer_2() {
        bounded_buffer()
    }

    /// `signal` wakes at most one waiter, `broadcast` wakes them all.
    #[boot]
    pub fn signal_broadcast() {
        const WAITERS: usize = 3;
        let state = Arc::new((Lock::new("cv"), ConditionVariable::new("cv")));
        let waiting = Arc::new(AtomicUsize::new(0));
        let woken = Arc::new(AtomicUsize::new(0));

        let handles = (0..WAITERS)
            .map(|_| {
                let (state, waiting, woken) = (state.clone(), waiting.clone(), woken.clone());
                ThreadBuilder::new("waiter")
                    .spawn(move || {
                        let (lock, cv) = &*state;
                        lock.acquire();
                        waiting.fetch_add(1, Ordering::SeqCst);
                        cv.wait(lock);
                        assert!(lock.is_held_by_caller());
                        woken.fetch_add(1, Ordering::SeqCst);
                        lock.release();
                    })
                    .unwrap()
            })
            .collect::<Vec<_>>();
        while waiting.load(Ordering::SeqCst) != WAITERS {
            Current::yield_now();
        }

        let (lock, cv) = &*state;
        lock.acquire();
        cv.signal(lock);
        lock.release();
        for _ in 0..4 {
            Current::yield_now();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 1);

        lock.acquire();
        cv.broadcast(lock);
        lock.release();
        for handle in handles {
            assert_eq!(handle.join(), Ok(0));
        }
        assert_eq!(woken.load(Ordering::SeqCst), WAITERS);
    }

    /// Waiting without the lock is a panic.
    #[boot]
    pub fn wait_without_lock() {
        let lock = Lock::new("free");
        let cv = ConditionVariable::new("cv");
        let outcome = unwind::catch(|| cv.wait(&lock));
        assert!(matches!(outcome, Err(Caught::Panic(_))));
        cv.destroy();
        lock.destroy();
    }
}
