//! The thread registry: every live thread of one kernel, and the transitions
//! between running, runnable, sleeping and zombie.
//!
//! The registry is a plain arena of [`Thread`]s addressed by [`Tid`]. The
//! sleeping and zombie sets are lists of tids; the runnable set belongs to the
//! [`Scheduler`]. All of it lives behind one spinlock, and the storage is
//! grown before a thread is admitted so that no transition ever allocates.
use super::{
    BOOT_TID, Current, JoinHandle, Thread, ThreadBuilder, ThreadState, Tid, WaitChannel,
    scheduler::Scheduler,
};
use crate::{
    KernelError, SystemConfiguration,
    process::{Pid, ProcessRecord, ProcessTable},
    util::random::{Lcg, RandomSource},
};
use abyss::{
    cpu::Context,
    interrupt::InterruptGuard,
    spinlock::SpinLock,
    unwind::{self, Caught},
};
use alloc::{boxed::Box, format, string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

/// The per-cpu data of a running kernel thread.
pub(crate) struct CpuLocal {
    pub(crate) kernel: Arc<KernelInner>,
    pub(crate) tid: Tid,
}

/// The per-cpu data of the running context, if it belongs to a kernel.
pub(crate) fn current() -> Option<Arc<CpuLocal>> {
    abyss::cpu::local()?.downcast::<CpuLocal>().ok()
}

/// Like [`current`], for callers that can only run inside a kernel thread.
pub(crate) fn this_cpu() -> Arc<CpuLocal> {
    current().unwrap_or_else(|| panic!("Kernel: no kernel thread runs on this cpu."))
}

/// How the running thread leaves the cpu.
#[derive(Clone, Copy)]
pub(crate) enum Transition {
    Yield,
    Sleep(WaitChannel),
    Exit(i32),
}

struct Registry {
    threads: Vec<Thread>,
    sleepers: Vec<Tid>,
    zombies: Vec<Tid>,
    numthreads: usize,
}

impl Registry {
    fn get(&self, tid: Tid) -> Option<&Thread> {
        self.threads.iter().find(|th| th.tid == tid)
    }

    fn get_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|th| th.tid == tid)
    }

    fn take(&mut self, tid: Tid) -> Option<Thread> {
        let pos = self.threads.iter().position(|th| th.tid == tid)?;
        Some(self.threads.swap_remove(pos))
    }

    /// Make room for one more thread in every list a thread can be in.
    fn reserve_one(&mut self) -> Result<(), KernelError> {
        let want = self.threads.len() + 1;
        self.threads
            .try_reserve(1)
            .map_err(|_| KernelError::NoMemory)?;
        self.sleepers
            .try_reserve(want.saturating_sub(self.sleepers.len()))
            .map_err(|_| KernelError::NoMemory)?;
        self.zombies
            .try_reserve(want.saturating_sub(self.zombies.len()))
            .map_err(|_| KernelError::NoMemory)
    }
}

/// The state of one kernel, shared by all of its threads.
pub(crate) struct KernelInner {
    scheduler: Box<dyn Scheduler>,
    registry: SpinLock<Registry>,
    pub(crate) processes: ProcessTable,
    panicked: SpinLock<Option<String>>,
    rng: SpinLock<Lcg>,
    next_tid: AtomicU64,
    thread_limit: Option<usize>,
    stack_size: usize,
    synch_probs: bool,
}

impl KernelInner {
    /// Turn the calling host thread into the boot thread of a new kernel.
    pub(crate) fn boot(config: SystemConfiguration) -> Arc<Self> {
        let SystemConfiguration {
            scheduler,
            process_table_size,
            thread_limit,
            stack_size,
            seed,
            synch_probs,
        } = config;

        let processes = ProcessTable::new(process_table_size)
            .unwrap_or_else(|e| panic!("Kernel: failed to allocate the process table: {e:?}"));
        let pid = processes
            .add(ProcessRecord::new(None))
            .unwrap_or_else(|e| panic!("Kernel: failed to admit the boot thread: {e:?}"));

        let mut registry = Registry {
            threads: Vec::new(),
            sleepers: Vec::new(),
            zombies: Vec::new(),
            numthreads: 1,
        };
        registry
            .reserve_one()
            .and_then(|_| scheduler.preallocate(1))
            .unwrap_or_else(|e| panic!("Kernel: failed to allocate the thread registry: {e:?}"));
        registry.threads.push(Thread {
            tid: BOOT_TID,
            name: String::from("<boot/menu>"),
            pid,
            context: Context::adopt_current("<boot/menu>"),
            state: ThreadState::Running,
            wchan: None,
            cwd: None,
            address_space: None,
        });

        let inner = Arc::new(Self {
            scheduler,
            registry: SpinLock::new(registry),
            processes,
            panicked: SpinLock::new(None),
            rng: SpinLock::new(Lcg::new(seed)),
            next_tid: AtomicU64::new(BOOT_TID + 1),
            thread_limit,
            stack_size,
            synch_probs,
        });
        abyss::cpu::set_local(Some(Arc::new(CpuLocal {
            kernel: inner.clone(),
            tid: BOOT_TID,
        })));
        inner.install_timer();
        inner
    }

    fn install_timer(self: &Arc<Self>) {
        let kernel = Arc::downgrade(self);
        abyss::interrupt::set_timer_handler(Some(Arc::new(move || {
            if let Some(kernel) = kernel.upgrade()
                && kernel.scheduler.timer_tick()
            {
                drop(kernel);
                Current::yield_now();
            }
        })));
    }

    /// Move `me`, the running thread, out of the cpu and run the next one.
    ///
    /// The caller holds an [`InterruptGuard`]. Unless `me` exits, this
    /// returns once `me` is picked to run again.
    pub(crate) fn switch(&self, me: Tid, transition: Transition) {
        let (state, wchan) = match transition {
            Transition::Yield => (ThreadState::Runnable, None),
            Transition::Sleep(chan) => (ThreadState::Sleeping(chan), Some(chan)),
            Transition::Exit(code) => (ThreadState::Zombie(code), None),
        };
        let exiting = matches!(transition, Transition::Exit(_));

        let mut registry = self.registry.lock();
        let Some(th) = registry.get_mut(me) else {
            registry.unlock();
            panic!("Kernel: switching out unknown thread {me}.");
        };
        th.state = state;
        th.wchan = wchan;
        match transition {
            Transition::Yield => self.scheduler.push_to_queue(me),
            Transition::Sleep(_) => registry.sleepers.push(me),
            Transition::Exit(_) => registry.zombies.push(me),
        }

        let Some(next) = self.scheduler.next_to_run() else {
            let name = registry.get(me).map(|th| th.name.clone()).unwrap_or_default();
            registry.unlock();
            panic!("Scheduler: no runnable thread while switching out `{name}`.");
        };
        if next == me {
            if let Some(th) = registry.get_mut(me) {
                th.state = ThreadState::Running;
            }
            registry.unlock();
            assert!(!exiting, "Thread came back from the dead!");
            return;
        }

        let contexts = registry
            .get(me)
            .map(|th| th.context.clone())
            .zip(registry.get_mut(next).map(|th| {
                th.state = ThreadState::Running;
                th.context.clone()
            }));
        let Some((mine, theirs)) = contexts else {
            registry.unlock();
            panic!("Scheduler: picked unknown thread {next}.");
        };
        registry.unlock();

        if exiting {
            mine.switch_final(&theirs);
        } else {
            mine.switch(&theirs);
            self.after_switch(me);
        }
    }

    /// Work done by `me` each time it gets the cpu back.
    fn after_switch(&self, me: Tid) {
        if me == BOOT_TID {
            let mut panicked = self.panicked.lock();
            let msg = panicked.take();
            panicked.unlock();
            if let Some(msg) = msg {
                panic!("Kernel panic: {msg}");
            }
        }
        self.reap_zombies();

        let registry = self.registry.lock();
        if let Some(space) = registry.get(me).and_then(|th| th.address_space.as_ref()) {
            space.activate();
        }
        registry.unlock();
    }

    fn reap_zombies(&self) {
        loop {
            let mut registry = self.registry.lock();
            let zombie = registry.zombies.pop().and_then(|tid| registry.take(tid));
            registry.unlock();
            let Some(th) = zombie else {
                break;
            };
            th.context.join();
            debug!("thread: reaped `{}` (tid {}).", th.name, th.tid);
        }
    }

    pub(crate) fn fork(
        self: &Arc<Self>,
        parent: Tid,
        builder: ThreadBuilder,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Result<JoinHandle, KernelError> {
        let ThreadBuilder {
            name,
            stack_size,
            address_space,
        } = builder;

        let registry = self.registry.lock();
        let inherited = registry
            .get(parent)
            .map(|th| (th.pid, th.cwd.clone(), registry.numthreads));
        registry.unlock();
        let Some((ppid, cwd, live)) = inherited else {
            return Err(KernelError::InvalidArgument);
        };
        if self.thread_limit.is_some_and(|limit| live >= limit) {
            return Err(KernelError::NoMemory);
        }

        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        let context = {
            let kernel = self.clone();
            Context::spawn(
                &name,
                stack_size.unwrap_or(self.stack_size),
                Box::new(move || kernel.thread_main(tid, entry)),
            )
            .map_err(|_| KernelError::NoMemory)?
        };
        let record = Arc::new(ProcessRecord::new(Some(ppid)));

        let mut registry = self.registry.lock();
        let admitted = registry
            .reserve_one()
            .and_then(|_| self.scheduler.preallocate(registry.threads.len() + 1))
            .and_then(|_| self.processes.add(record));
        let pid = match admitted {
            Ok(pid) => pid,
            Err(e) => {
                registry.unlock();
                context.cancel();
                context.join();
                drop(cwd);
                debug!("thread: fork of `{name}` failed: {e:?}.");
                return Err(e);
            }
        };
        debug!("thread: forked `{name}` (tid {tid}, pid {pid}).");
        registry.threads.push(Thread {
            tid,
            name,
            pid,
            context,
            state: ThreadState::Runnable,
            wchan: None,
            cwd,
            address_space,
        });
        registry.numthreads += 1;
        self.scheduler.push_to_queue(tid);
        registry.unlock();
        Ok(JoinHandle { tid, pid })
    }

    /// The bottom of every forked thread's host stack.
    fn thread_main(self: Arc<Self>, tid: Tid, entry: Box<dyn FnOnce() + Send>) {
        abyss::cpu::set_local(Some(Arc::new(CpuLocal {
            kernel: self.clone(),
            tid,
        })));
        self.install_timer();

        let outcome = unwind::catch(|| {
            let guard = InterruptGuard::new();
            self.after_switch(tid);
            drop(guard);
            if self.synch_probs {
                let mut rng = self.rng.lock();
                let spins = rng.below(161) + rng.below(161);
                rng.unlock();
                for _ in 0..spins {
                    Current::yield_now();
                }
            }
            entry();
        });
        let code = match outcome {
            Ok(()) => 0,
            Err(Caught::Exit(code)) => code,
            Err(Caught::Cancel) => return,
            Err(Caught::Panic(msg)) => return self.panic_from(tid, msg),
        };
        match unwind::catch(|| self.exit(tid, code)) {
            Ok(()) | Err(Caught::Cancel) => (),
            Err(Caught::Exit(_)) => self.panic_from(tid, String::from("exit called while exiting")),
            Err(Caught::Panic(msg)) => self.panic_from(tid, msg),
        }
    }

    fn exit(&self, me: Tid, code: i32) {
        let guard = InterruptGuard::new();
        let mut registry = self.registry.lock();
        let released = registry
            .get_mut(me)
            .map(|th| (th.pid, th.address_space.take(), th.cwd.take()));
        registry.numthreads -= 1;
        registry.unlock();
        let Some((pid, address_space, cwd)) = released else {
            panic!("Kernel: unknown thread {me} exits.");
        };
        drop(address_space);
        drop(cwd);

        if let Err(e) = self.processes.mark_exited(pid, code) {
            warning!("thread: exit of pid {pid} not recorded: {e:?}");
        }
        abyss::interrupt::set_timer_handler(None);
        abyss::cpu::set_local(None);
        self.switch(me, Transition::Exit(code));
        guard.consume();
    }

    /// A forked thread panicked: drop every other thread and hand the panic
    /// over to the boot thread.
    fn panic_from(&self, me: Tid, msg: String) {
        let guard = InterruptGuard::new();
        abyss::interrupt::set_timer_handler(None);
        abyss::cpu::set_local(None);

        let mut registry = self.registry.lock();
        let name = registry.get(me).map(|th| th.name.clone()).unwrap_or_default();
        let mut panicked = self.panicked.lock();
        if panicked.is_none() {
            *panicked = Some(format!("thread `{name}` panicked: {msg}"));
        }
        panicked.unlock();

        for th in registry.threads.iter() {
            if th.tid != BOOT_TID && th.tid != me {
                th.context.cancel();
            }
        }
        self.scheduler.killall();
        registry.sleepers.clear();
        let contexts = registry.get(me).map(|th| th.context.clone()).zip(
            registry.get_mut(BOOT_TID).map(|th| {
                th.state = ThreadState::Running;
                th.wchan = None;
                th.context.clone()
            }),
        );
        registry.unlock();

        if let Some((mine, boot)) = contexts {
            mine.switch_final(&boot);
        }
        guard.consume();
    }

    /// Drop every thread but the boot thread and destroy the process table.
    pub(crate) fn teardown(&self, graceful: bool) {
        abyss::interrupt::set_timer_handler(None);
        let guard = InterruptGuard::new();
        self.reap_zombies();
        loop {
            let mut registry = self.registry.lock();
            let pos = registry.threads.iter().position(|th| th.tid != BOOT_TID);
            let victim = pos.map(|pos| registry.threads.swap_remove(pos));
            registry.unlock();
            let Some(th) = victim else {
                break;
            };
            if graceful && !matches!(th.state, ThreadState::Zombie(_)) {
                warning!("sleep: Dropping thread {}", th.name);
            }
            th.context.cancel();
            th.context.join();
        }

        let mut registry = self.registry.lock();
        registry.sleepers.clear();
        registry.zombies.clear();
        registry.numthreads = 1;
        registry.unlock();
        self.scheduler.killall();
        self.processes.destroy_all();
        abyss::cpu::set_local(None);
        guard.consume();
    }

    /// Wake up to `limit` threads sleeping on `chan`, longest sleeper first.
    pub(crate) fn wakeup(&self, chan: WaitChannel, limit: usize) -> usize {
        let mut registry = self.registry.lock();
        let (mut woken, mut i) = (0, 0);
        while i < registry.sleepers.len() && woken < limit {
            let tid = registry.sleepers[i];
            match registry.get_mut(tid) {
                Some(th) if th.wchan == Some(chan) => {
                    th.state = ThreadState::Runnable;
                    th.wchan = None;
                    registry.sleepers.remove(i);
                    self.scheduler.push_to_queue(tid);
                    woken += 1;
                }
                _ => i += 1,
            }
        }
        registry.unlock();
        woken
    }

    pub(crate) fn has_sleepers(&self, chan: WaitChannel) -> bool {
        let registry = self.registry.lock();
        let found = registry
            .sleepers
            .iter()
            .any(|tid| registry.get(*tid).is_some_and(|th| th.wchan == Some(chan)));
        registry.unlock();
        found
    }

    pub(crate) fn state_of(&self, tid: Tid) -> Result<ThreadState, KernelError> {
        let registry = self.registry.lock();
        let state = registry.get(tid).map(|th| th.state);
        registry.unlock();
        state.ok_or(KernelError::InvalidArgument)
    }

    pub(crate) fn live_threads(&self) -> usize {
        let registry = self.registry.lock();
        let live = registry.numthreads;
        registry.unlock();
        live
    }

    pub(crate) fn with_thread<R>(&self, tid: Tid, f: impl FnOnce(&Thread) -> R) -> R {
        let registry = self.registry.lock();
        let r = registry.get(tid).map(f);
        registry.unlock();
        r.unwrap_or_else(|| panic!("Kernel: thread {tid} is not registered."))
    }

    pub(crate) fn with_thread_mut<R>(&self, tid: Tid, f: impl FnOnce(&mut Thread) -> R) -> R {
        let mut registry = self.registry.lock();
        let r = registry.get_mut(tid).map(f);
        registry.unlock();
        r.unwrap_or_else(|| panic!("Kernel: thread {tid} is not registered."))
    }

    /// Wait for the exit of child `pid` of thread `me` and remove its record.
    pub(crate) fn waitpid(&self, me: Tid, pid: Pid) -> Result<i32, KernelError> {
        let parent = self.with_thread(me, |th| th.pid);
        let record = self.processes.find_by_pid(pid)?;
        if record.ppid() != Some(parent) {
            return Err(KernelError::InvalidArgument);
        }
        drop(record);
        let code = self.processes.wait(pid)?;
        self.processes.remove(pid)?;
        Ok(code)
    }
}
