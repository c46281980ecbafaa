//! Process table.
//!
//! Every thread forked by the kernel is also a process: it owns a
//! [`ProcessRecord`] in the kernel's fixed-size [`ProcessTable`], keyed by a
//! [`Pid`] that is simply the index of the record's slot. The record keeps
//! the parent/child edges and the exit status, and carries a private
//! [`Semaphore`] on which other threads wait for the process to exit.
//!
//! ## Lifetime of a record
//!
//! 1. [`ProcessTable::add`] puts the record into the first free slot and links
//!    it to its parent.
//! 2. [`ProcessTable::mark_exited`] records the exit code once, turns every
//!    live child into an orphan and wakes every thread blocked in
//!    [`ProcessTable::wait`].
//! 3. [`ProcessTable::remove`] unlinks the record and frees the slot, which
//!    may then be reused for a new pid.
//!
//! Lock order: the table lock is taken before any record lock.
use crate::{
    KernelError,
    sync::{Semaphore, SpinLock},
};
use alloc::{collections::BTreeSet, sync::Arc, vec::Vec};

/// Process id.
pub type Pid = usize;

/// Default number of slots of the process table.
pub const PROCESS_TABLE_SIZE: usize = 128;

struct RecordState {
    pid: Pid,
    ppid: Option<Pid>,
    exited: bool,
    exit_code: i32,
    children: BTreeSet<Pid>,
    waiters: usize,
}

/// The bookkeeping of one process.
pub struct ProcessRecord {
    state: SpinLock<RecordState>,
    exit_sem: Semaphore,
}

impl ProcessRecord {
    /// A fresh record whose parent is `ppid` (`None` for an orphan). The pid
    /// is assigned by [`ProcessTable::add`].
    pub fn new(ppid: Option<Pid>) -> Self {
        Self {
            state: SpinLock::new(RecordState {
                pid: 0,
                ppid,
                exited: false,
                exit_code: 0,
                children: BTreeSet::new(),
                waiters: 0,
            }),
            exit_sem: Semaphore::new("exit", 0),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&RecordState) -> R) -> R {
        let state = self.state.lock();
        let r = f(&state);
        state.unlock();
        r
    }

    fn write<R>(&self, f: impl FnOnce(&mut RecordState) -> R) -> R {
        let mut state = self.state.lock();
        let r = f(&mut state);
        state.unlock();
        r
    }

    /// Process id.
    pub fn pid(&self) -> Pid {
        self.read(|st| st.pid)
    }

    /// Parent process id, or `None` for an orphan.
    pub fn ppid(&self) -> Option<Pid> {
        self.read(|st| st.ppid)
    }

    /// The exit code, once the process has exited.
    pub fn exit_code(&self) -> Option<i32> {
        self.read(|st| st.exited.then_some(st.exit_code))
    }

    /// Pids of the live children.
    pub fn children(&self) -> Vec<Pid> {
        self.read(|st| st.children.iter().copied().collect())
    }

    /// Number of live children.
    pub fn child_count(&self) -> usize {
        self.read(|st| st.children.len())
    }

    /// Number of threads blocked waiting for this process to exit.
    pub fn waiters(&self) -> usize {
        self.read(|st| st.waiters)
    }
}

/// A fixed-capacity table of process records.
pub struct ProcessTable {
    slots: SpinLock<Vec<Option<Arc<ProcessRecord>>>>,
}

impl ProcessTable {
    /// Allocate a table with `capacity` slots.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoMemory`] if the slots cannot be allocated.
    pub fn new(capacity: usize) -> Result<Self, KernelError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| KernelError::NoMemory)?;
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots: SpinLock::new(slots),
        })
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        let slots = self.slots.lock();
        let capacity = slots.len();
        slots.unlock();
        capacity
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock();
        let len = slots.iter().flatten().count();
        slots.unlock();
        len
    }

    /// Returns `true` if the table holds no record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Admit `record` into the first free slot and link it to its parent.
    /// Returns the new pid.
    ///
    /// If the parent named by the record is not in the table, the record is
    /// admitted as an orphan.
    ///
    /// # Errors
    ///
    /// [`KernelError::TableFull`] if every slot is taken.
    ///
    /// Passing an `Arc` that is already built makes this call allocation
    /// free, so it may run inside an atomic section.
    pub fn add(&self, record: impl Into<Arc<ProcessRecord>>) -> Result<Pid, KernelError> {
        let record: Arc<ProcessRecord> = record.into();
        let mut slots = self.slots.lock();
        let Some(pid) = slots.iter().position(Option::is_none) else {
            slots.unlock();
            return Err(KernelError::TableFull);
        };
        let ppid = record.write(|st| {
            st.pid = pid;
            st.ppid
        });
        slots[pid] = Some(record.clone());
        if let Some(ppid) = ppid
            && link_locked(&slots, ppid, pid).is_err()
        {
            record.write(|st| st.ppid = None);
        }
        slots.unlock();
        Ok(pid)
    }

    /// Make `child` a child of `parent`, on both sides.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoSuchProcess`] if either record is not in the table.
    pub fn link(&self, parent: Pid, child: Pid) -> Result<(), KernelError> {
        let slots = self.slots.lock();
        let r = link_locked(&slots, parent, child);
        slots.unlock();
        r
    }

    /// Look up the record of `pid`.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoSuchProcess`] if no live record has that pid.
    pub fn find_by_pid(&self, pid: Pid) -> Result<Arc<ProcessRecord>, KernelError> {
        let slots = self.slots.lock();
        let record = lookup(&slots, pid).cloned();
        slots.unlock();
        record.ok_or(KernelError::NoSuchProcess)
    }

    /// Pids of the live children of `pid`.
    pub fn children(&self, pid: Pid) -> Result<Vec<Pid>, KernelError> {
        self.find_by_pid(pid).map(|record| record.children())
    }

    /// Record that `pid` exited with `exit_code`.
    ///
    /// Every live child becomes an orphan, and every thread blocked in
    /// [`ProcessTable::wait`] on `pid` is woken exactly once.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoSuchProcess`] if no live record has that pid.
    /// - [`KernelError::InvalidArgument`] if `pid` already exited. Nothing is
    ///   changed and nobody is woken.
    pub fn mark_exited(&self, pid: Pid, exit_code: i32) -> Result<(), KernelError> {
        let slots = self.slots.lock();
        let Some(record) = lookup(&slots, pid).cloned() else {
            slots.unlock();
            return Err(KernelError::NoSuchProcess);
        };
        let exited = record.write(|st| {
            if st.exited {
                return None;
            }
            st.exited = true;
            st.exit_code = exit_code;
            Some((
                core::mem::take(&mut st.children),
                core::mem::replace(&mut st.waiters, 0),
            ))
        });
        let Some((children, waiters)) = exited else {
            slots.unlock();
            return Err(KernelError::InvalidArgument);
        };
        for child in children {
            if let Some(child) = lookup(&slots, child) {
                child.write(|st| st.ppid = None);
            }
        }
        slots.unlock();

        for _ in 0..waiters {
            record.exit_sem.signal();
        }
        Ok(())
    }

    /// Block until `pid` exits and return its exit code. Returns immediately
    /// if it already exited.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoSuchProcess`] if no live record has that pid.
    pub fn wait(&self, pid: Pid) -> Result<i32, KernelError> {
        let record = self.find_by_pid(pid)?;
        let exited = record.write(|st| {
            if st.exited {
                Some(st.exit_code)
            } else {
                st.waiters += 1;
                None
            }
        });
        if let Some(code) = exited {
            return Ok(code);
        }
        record.exit_sem.wait();
        Ok(record.read(|st| st.exit_code))
    }

    /// Remove the record of `pid` and free its slot.
    ///
    /// The record is unlinked from its parent, and its children become
    /// orphans.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoSuchProcess`] if no live record has that pid.
    /// - [`KernelError::Busy`] if threads are still waiting for `pid` to exit.
    ///
    /// # Panics
    ///
    /// Panics if a thread still sleeps on the exit notification of an exited
    /// record.
    pub fn remove(&self, pid: Pid) -> Result<(), KernelError> {
        let mut slots = self.slots.lock();
        let Some(record) = lookup(&slots, pid).cloned() else {
            slots.unlock();
            return Err(KernelError::NoSuchProcess);
        };
        let unlinked = record.write(|st| {
            if !st.exited && st.waiters > 0 {
                Err(KernelError::Busy)
            } else {
                Ok((st.ppid.take(), core::mem::take(&mut st.children)))
            }
        });
        let (ppid, children) = match unlinked {
            Ok(unlinked) => unlinked,
            Err(e) => {
                slots.unlock();
                return Err(e);
            }
        };
        if let Some(parent) = ppid.and_then(|ppid| lookup(&slots, ppid)) {
            parent.write(|st| st.children.remove(&pid));
        }
        for child in children {
            if let Some(child) = lookup(&slots, child) {
                child.write(|st| st.ppid = None);
            }
        }
        slots[pid] = None;
        slots.unlock();

        // The registry lock comes before the table lock, so the sleepers are
        // checked only now. A woken waiter may still hold the record.
        assert!(
            !record.exit_sem.has_waiters(),
            "process: pid {pid} removed while threads sleep on its exit."
        );
        if let Ok(record) = Arc::try_unwrap(record) {
            record.exit_sem.destroy();
        }
        Ok(())
    }

    /// Drop every record. Used when the kernel goes down, after every other
    /// thread is gone.
    pub(crate) fn destroy_all(&self) {
        let mut slots = self.slots.lock();
        let records = slots.iter_mut().filter_map(Option::take).collect::<Vec<_>>();
        slots.unlock();
        debug!("process: dropped {} records.", records.len());
        drop(records);
    }

    /// Print every live record.
    pub fn dump(&self) {
        let slots = self.slots.lock();
        let records = slots.iter().flatten().cloned().collect::<Vec<_>>();
        slots.unlock();
        for record in records {
            let (pid, ppid, exited, children) =
                record.read(|st| (st.pid, st.ppid, st.exited.then_some(st.exit_code), st.children.clone()));
            info!(
                "pid {:>3} ppid {:>3} exit {:?} children {:?}",
                pid,
                ppid.map_or(-1, |ppid| ppid as isize),
                exited,
                children
            );
        }
    }
}

fn lookup(slots: &[Option<Arc<ProcessRecord>>], pid: Pid) -> Option<&Arc<ProcessRecord>> {
    slots.get(pid).and_then(Option::as_ref)
}

fn link_locked(
    slots: &[Option<Arc<ProcessRecord>>],
    parent: Pid,
    child: Pid,
) -> Result<(), KernelError> {
    let (Some(parent_record), Some(child_record)) = (lookup(slots, parent), lookup(slots, child))
    else {
        return Err(KernelError::NoSuchProcess);
    };
    child_record.write(|st| st.ppid = Some(parent));
    parent_record.write(|st| st.children.insert(child));
    Ok(())
}
