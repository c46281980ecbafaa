use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use grading::{assert_exit_code, boot};
use kestrel::{
    Kernel, KernelError, SystemConfigurationBuilder,
    fs::Vnode,
    interrupt::InterruptGuard,
    mm::AddressSpace,
    sync::Semaphore,
    thread::{
        self, BOOT_TID, Current, ThreadBuilder, ThreadState, WaitChannel,
        scheduler::RoundRobin,
    },
    unwind::{self, Caught},
};

/// A thread that returns exits with code 0.
#[boot]
pub fn fork_join() {
    let ran = Arc::new(AtomicBool::new(false));
    let handle = {
        let ran = ran.clone();
        ThreadBuilder::new("worker")
            .spawn(move || ran.store(true, Ordering::SeqCst))
            .unwrap()
    };
    assert_eq!(handle.join(), Ok(0));
    assert!(ran.load(Ordering::SeqCst));
}

/// The code given to `exit` reaches the parent.
#[assert_exit_code(3)]
#[boot]
pub fn exit_code() {
    Current::exit(3)
}

/// Exited threads are reclaimed by the next thread to run.
#[boot]
pub fn zombie_reaping() {
    const COUNT: usize = 8;
    let handles = (0..COUNT)
        .map(|i| {
            ThreadBuilder::new(alloc::format!("t{i}"))
                .spawn(move || Current::exit(i as i32))
                .unwrap()
        })
        .collect::<Vec<_>>();
    assert_eq!(thread::live_threads(), COUNT + 1);

    for (i, handle) in handles.into_iter().enumerate() {
        let tid = handle.tid;
        assert_eq!(handle.join(), Ok(i as i32));
        assert_eq!(
            thread::get_state_by_tid(tid),
            Err(KernelError::InvalidArgument),
            "A joined thread must already be reclaimed."
        );
    }
    assert_eq!(thread::live_threads(), 1);
}

/// A forked thread is runnable until it runs, and sleeps while blocked.
#[boot]
pub fn states() {
    let sema = Arc::new(Semaphore::new("gate", 0));
    let handle = {
        let sema = sema.clone();
        ThreadBuilder::new("sleeper").spawn(move || sema.wait()).unwrap()
    };
    assert_eq!(thread::get_state_by_tid(BOOT_TID), Ok(ThreadState::Running));
    assert_eq!(
        thread::get_state_by_tid(handle.tid),
        Ok(ThreadState::Runnable)
    );

    Current::yield_now();
    assert!(matches!(
        thread::get_state_by_tid(handle.tid),
        Ok(ThreadState::Sleeping(WaitChannel::Semaphore(_)))
    ));

    sema.signal();
    assert_eq!(handle.join(), Ok(0));
    assert_eq!(
        thread::get_state_by_tid(9999),
        Err(KernelError::InvalidArgument)
    );
}

/// `wakeup` and `wakeup_one` on a custom channel.
#[boot]
pub fn custom_channel() {
    let chan = WaitChannel::custom();
    let handles = (0..2)
        .map(|_| {
            ThreadBuilder::new("sleeper")
                .spawn(move || {
                    let guard = InterruptGuard::new();
                    Current::sleep(chan);
                    drop(guard);
                })
                .unwrap()
        })
        .collect::<Vec<_>>();
    assert!(!thread::has_sleepers(chan));

    Current::yield_now();
    assert!(thread::has_sleepers(chan));
    assert!(thread::wakeup_one(chan));
    assert!(thread::has_sleepers(chan));
    assert_eq!(thread::wakeup(chan), 1);
    assert!(!thread::has_sleepers(chan));
    assert_eq!(thread::wakeup(chan), 0);
    assert!(!thread::wakeup_one(chan));

    for handle in handles {
        assert_eq!(handle.join(), Ok(0));
    }
}

/// A forked thread inherits the working directory of its parent, and gives
/// it back when it exits.
#[boot]
pub fn cwd_inherited() {
    let root = Vnode::new("/root");
    Current::chdir(Some(root.clone()));
    assert_eq!(Vnode::share_count(&root), 2);

    let handle = ThreadBuilder::new("child")
        .spawn(|| {
            let cwd = Current::cwd().map(|cwd| String::from(cwd.path()));
            assert_eq!(cwd.as_deref(), Some("/root"));
        })
        .unwrap();
    assert_eq!(Vnode::share_count(&root), 3);
    assert_eq!(handle.join(), Ok(0));
    assert_eq!(Vnode::share_count(&root), 2);

    Current::chdir(None);
    assert_eq!(Vnode::share_count(&root), 1);
}

/// A fork beyond the thread limit fails and leaves nothing behind.
#[boot(SystemConfigurationBuilder::new().thread_limit(2))]
pub fn fork_rollback_thread_limit() {
    let root = Vnode::new("/");
    Current::chdir(Some(root.clone()));
    let sema = Arc::new(Semaphore::new("hold", 0));

    let held = {
        let sema = sema.clone();
        ThreadBuilder::new("held").spawn(move || sema.wait()).unwrap()
    };
    assert_eq!(Vnode::share_count(&root), 3);
    assert_eq!(thread::live_threads(), 2);

    let ran = Arc::new(AtomicBool::new(false));
    let refused = {
        let ran = ran.clone();
        ThreadBuilder::new("refused").spawn(move || ran.store(true, Ordering::SeqCst))
    };
    assert_eq!(refused.map(|h| h.tid), Err(KernelError::NoMemory));
    assert_eq!(Vnode::share_count(&root), 3);
    assert_eq!(thread::live_threads(), 2);

    sema.signal();
    assert_eq!(held.join(), Ok(0));
    assert_eq!(Vnode::share_count(&root), 2);
    assert!(!ran.load(Ordering::SeqCst));
    Current::chdir(None);
}

/// A fork that finds the process table full fails and leaves nothing
/// behind.
#[boot(SystemConfigurationBuilder::new().process_table_size(2))]
pub fn fork_rollback_table_full() {
    let root = Vnode::new("/");
    Current::chdir(Some(root.clone()));
    let sema = Arc::new(Semaphore::new("hold", 0));

    let held = {
        let sema = sema.clone();
        ThreadBuilder::new("held").spawn(move || sema.wait()).unwrap()
    };
    let payload = Arc::new(());
    let refused = {
        let payload = payload.clone();
        ThreadBuilder::new("refused").spawn(move || drop(payload))
    };
    assert_eq!(refused.map(|h| h.tid), Err(KernelError::TableFull));
    assert_eq!(Arc::strong_count(&payload), 1, "The entry must be dropped.");
    assert_eq!(Vnode::share_count(&root), 3);
    assert_eq!(thread::live_threads(), 2);

    sema.signal();
    assert_eq!(held.join(), Ok(0));

    // The slot is free again.
    let again = ThreadBuilder::new("again").spawn(|| ()).unwrap();
    assert_eq!(again.join(), Ok(0));
    Current::chdir(None);
}

/// Only the parent joins.
#[boot]
pub fn join_non_child() {
    let slot = Arc::new(kestrel::sync::SpinLock::new(None));
    let gate = Arc::new(Semaphore::new("gate", 0));
    let finished = Arc::new(AtomicBool::new(false));

    let parent = {
        let (slot, gate, finished) = (slot.clone(), gate.clone(), finished.clone());
        ThreadBuilder::new("parent")
            .spawn(move || {
                let grandchild = ThreadBuilder::new("grandchild")
                    .spawn(move || {
                        gate.wait();
                        finished.store(true, Ordering::SeqCst);
                    })
                    .unwrap();
                let mut slot = slot.lock();
                *slot = Some(grandchild);
                slot.unlock();
            })
            .unwrap()
    };
    assert_eq!(parent.join(), Ok(0));

    let mut guard = slot.lock();
    let grandchild = guard.take().unwrap();
    guard.unlock();
    assert_eq!(grandchild.join(), Err(KernelError::InvalidArgument));

    gate.signal();
    while !finished.load(Ordering::SeqCst) {
        Current::yield_now();
    }
}

struct Space {
    activations: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl AddressSpace for Space {
    fn activate(&self) {
        self.activations.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for Space {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// An attached address space is activated every time its thread is switched
/// in, and released on exit.
#[boot]
pub fn address_space() {
    let activations = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));

    let handle = {
        let (dropped_seen, done) = (dropped.clone(), done.clone());
        ThreadBuilder::new("user")
            .attach_address_space(Box::new(Space {
                activations: activations.clone(),
                dropped: dropped.clone(),
            }))
            .spawn(move || {
                Current::yield_now();
                assert!(!dropped_seen.load(Ordering::SeqCst));
                done.store(true, Ordering::SeqCst);
            })
            .unwrap()
    };
    while !done.load(Ordering::SeqCst) {
        Current::yield_now();
    }
    assert_eq!(handle.join(), Ok(0));
    assert_eq!(activations.load(Ordering::SeqCst), 2);
    assert!(dropped.load(Ordering::SeqCst));
}

/// A panic in a forked thread takes the kernel down, and resurfaces on the
/// boot thread.
pub fn kernel_panic() {
    let outcome = unwind::catch(|| {
        let _kernel = Kernel::bootstrap(SystemConfigurationBuilder::new().build());
        let sema = Arc::new(Semaphore::new("never", 0));
        let bystander = {
            let sema = sema.clone();
            ThreadBuilder::new("bystander").spawn(move || sema.wait()).unwrap()
        };
        let bomber = ThreadBuilder::new("bomber")
            .spawn(|| panic!("boom"))
            .unwrap();
        let _ = bomber.join();
        let _ = bystander.join();
    });
    assert_eq!(
        outcome,
        Err(Caught::Panic(String::from(
            "Kernel panic: thread `bomber` panicked: boom"
        )))
    );

    // The kernel is gone; a new one boots on the same cpu.
    let kernel = Kernel::bootstrap(SystemConfigurationBuilder::new().build());
    assert_eq!(kernel.live_threads(), 1);
    kernel.shutdown();
}

/// Sleeping with nothing else to run is fatal.
pub fn no_runnable_thread() {
    let outcome = unwind::catch(|| {
        let _kernel = Kernel::bootstrap(SystemConfigurationBuilder::new().build());
        let guard = InterruptGuard::new();
        Current::sleep(WaitChannel::custom());
        drop(guard);
    });
    assert_eq!(
        outcome,
        Err(Caught::Panic(String::from(
            "Scheduler: no runnable thread while switching out `<boot/menu>`."
        )))
    );
}

/// Threads interleave under a preemptive scheduler.
#[boot(SystemConfigurationBuilder::new().set_scheduler(RoundRobin::new(2)))]
pub fn preemption() {
    const COUNT: usize = 4;
    let turn = Arc::new(AtomicUsize::new(0));
    let handles = (0..COUNT)
        .map(|i| {
            let turn = turn.clone();
            ThreadBuilder::new(alloc::format!("spinner{i}"))
                .spawn(move || {
                    // Nobody yields; only the timer lets the others in.
                    while turn.load(Ordering::SeqCst) != COUNT - 1 - i {
                        drop(InterruptGuard::new());
                    }
                    turn.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        })
        .collect::<Vec<_>>();
    for handle in handles {
        assert_eq!(handle.join(), Ok(0));
    }
    assert_eq!(turn.load(Ordering::SeqCst), COUNT);
}
