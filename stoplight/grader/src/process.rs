use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};
use grading::boot;
use kestrel::{
    KernelError,
    process::{ProcessRecord, ProcessTable},
    thread::{self, Current, ThreadBuilder, ThreadState},
};

/// Pids are unique among live records, and freed slots are reused.
#[boot]
pub fn pid_uniqueness() {
    const SLOTS: usize = 8;
    let table = ProcessTable::new(SLOTS).unwrap();
    assert_eq!(table.capacity(), SLOTS);
    assert!(table.is_empty());

    let mut pids = (0..SLOTS)
        .map(|_| table.add(ProcessRecord::new(None)).unwrap())
        .collect::<Vec<_>>();
    pids.sort();
    pids.dedup();
    assert_eq!(pids.len(), SLOTS);
    assert_eq!(table.len(), SLOTS);
    assert_eq!(
        table.add(ProcessRecord::new(None)),
        Err(KernelError::TableFull)
    );

    table.mark_exited(3, 0).unwrap();
    table.remove(3).unwrap();
    assert_eq!(table.len(), SLOTS - 1);
    assert_eq!(table.add(ProcessRecord::new(None)), Ok(3));
    for pid in 0..SLOTS {
        assert_eq!(table.find_by_pid(pid).map(|r| r.pid()), Ok(pid));
    }
}

/// Lookups of pids that are not in the table.
#[boot]
pub fn no_such_process() {
    let table = ProcessTable::new(4).unwrap();
    let pid = table.add(ProcessRecord::new(None)).unwrap();
    assert!(table.find_by_pid(pid).is_ok());

    for missing in [pid + 1, 4, 100] {
        assert_eq!(
            table.find_by_pid(missing).map(|r| r.pid()),
            Err(KernelError::NoSuchProcess)
        );
        assert_eq!(table.mark_exited(missing, 0), Err(KernelError::NoSuchProcess));
        assert_eq!(table.wait(missing), Err(KernelError::NoSuchProcess));
        assert_eq!(table.remove(missing), Err(KernelError::NoSuchProcess));
        assert_eq!(table.children(missing), Err(KernelError::NoSuchProcess));
        assert_eq!(table.link(pid, missing), Err(KernelError::NoSuchProcess));
    }
}

/// A record whose parent is unknown is admitted as an orphan.
#[boot]
pub fn orphan_on_admission() {
    let table = ProcessTable::new(4).unwrap();
    let pid = table.add(ProcessRecord::new(Some(2))).unwrap();
    assert_eq!(table.find_by_pid(pid).unwrap().ppid(), None);
}

/// Exiting turns every live child into an orphan, once.
#[boot]
pub fn reparenting() {
    let table = ProcessTable::new(8).unwrap();
    let parent = table.add(ProcessRecord::new(None)).unwrap();
    let children = (0..3)
        .map(|_| table.add(ProcessRecord::new(Some(parent))).unwrap())
        .collect::<Vec<_>>();
    let adopted = table.add(ProcessRecord::new(None)).unwrap();
    table.link(parent, adopted).unwrap();

    let mut expected = children.clone();
    expected.push(adopted);
    assert_eq!(table.children(parent), Ok(expected));
    assert_eq!(table.find_by_pid(parent).unwrap().child_count(), 4);
    assert_eq!(table.find_by_pid(adopted).unwrap().ppid(), Some(parent));

    // A child that leaves early unlinks itself.
    table.mark_exited(children[0], 0).unwrap();
    table.remove(children[0]).unwrap();
    assert_eq!(table.find_by_pid(parent).unwrap().child_count(), 3);

    assert_eq!(table.mark_exited(parent, 5), Ok(()));
    assert_eq!(table.children(parent), Ok(Vec::new()));
    for child in children[1..].iter().chain([&adopted]) {
        assert_eq!(table.find_by_pid(*child).unwrap().ppid(), None);
    }
    let record = table.find_by_pid(parent).unwrap();
    assert_eq!(record.exit_code(), Some(5));

    assert_eq!(
        table.mark_exited(parent, 6),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(record.exit_code(), Some(5));
    table.dump();
}

/// Every waiter is woken exactly once, and late waiters do not block.
#[boot]
pub fn exit_notification() {
    const WAITERS: usize = 3;
    let table = Arc::new(ProcessTable::new(4).unwrap());
    let pid = table.add(ProcessRecord::new(None)).unwrap();
    let returned = Arc::new(AtomicUsize::new(0));

    let handles = (0..WAITERS)
        .map(|_| {
            let (table, returned) = (table.clone(), returned.clone());
            ThreadBuilder::new("waiter")
                .spawn(move || {
                    let code = table.wait(pid).unwrap_or(-1);
                    returned.fetch_add(1, Ordering::SeqCst);
                    Current::exit(code)
                })
                .unwrap()
        })
        .collect::<Vec<_>>();
    Current::yield_now();
    assert_eq!(table.find_by_pid(pid).unwrap().waiters(), WAITERS);
    for handle in handles.iter() {
        assert!(matches!(
            thread::get_state_by_tid(handle.tid),
            Ok(ThreadState::Sleeping(_))
        ));
    }
    assert_eq!(table.remove(pid), Err(KernelError::Busy));

    table.mark_exited(pid, 9).unwrap();
    assert_eq!(table.find_by_pid(pid).unwrap().waiters(), 0);
    assert_eq!(table.mark_exited(pid, 10), Err(KernelError::InvalidArgument));
    for handle in handles {
        assert_eq!(handle.join(), Ok(9));
    }
    assert_eq!(returned.load(Ordering::SeqCst), WAITERS);

    assert_eq!(table.wait(pid), Ok(9));
    assert_eq!(table.remove(pid), Ok(()));
    assert_eq!(table.remove(pid), Err(KernelError::NoSuchProcess));
}

/// A record admitted as an `Arc` is the record the table hands back.
#[boot]
pub fn shared_admission() {
    let table = ProcessTable::new(2).unwrap();
    let record = Arc::new(ProcessRecord::new(None));
    let pid = table.add(record.clone()).unwrap();
    assert!(Arc::ptr_eq(&table.find_by_pid(pid).unwrap(), &record));
    assert_eq!(record.pid(), pid);
    assert_eq!(Arc::strong_count(&record), 2);

    table.mark_exited(pid, 0).unwrap();
    table.remove(pid).unwrap();
    assert_eq!(Arc::strong_count(&record), 1);
}

/// A record can be removed while a woken waiter still holds it; the waiter
/// still reads the exit code.
#[boot]
pub fn remove_after_wakeup() {
    let table = Arc::new(ProcessTable::new(4).unwrap());
    let pid = table.add(ProcessRecord::new(None)).unwrap();
    let waiter = {
        let table = table.clone();
        ThreadBuilder::new("waiter")
            .spawn(move || Current::exit(table.wait(pid).unwrap_or(-1)))
            .unwrap()
    };
    Current::yield_now();
    let record = table.find_by_pid(pid).unwrap();
    assert_eq!(record.waiters(), 1);

    table.mark_exited(pid, 4).unwrap();
    // The waiter is runnable but has not run yet.
    assert_eq!(
        thread::get_state_by_tid(waiter.tid),
        Ok(ThreadState::Runnable)
    );
    drop(record);
    assert_eq!(table.remove(pid), Ok(()));
    assert_eq!(table.len(), 0);
    assert_eq!(waiter.join(), Ok(4));
}

/// Forked threads are children of their forker in the kernel's table.
#[boot]
pub fn fork_links_parent() {
    let me = Current::pid();
    let handle = ThreadBuilder::new("child")
        .spawn(move || {
            let child = ThreadBuilder::new("grandchild").spawn(|| ()).unwrap();
            assert_ne!(child.pid, Current::pid());
            assert_ne!(child.pid, me);
            assert_eq!(child.join(), Ok(0));
        })
        .unwrap();
    assert_ne!(handle.pid, me);
    assert_eq!(handle.join(), Ok(0));
}

/// Error codes in the negated errno convention.
pub fn errno() {
    for (e, errno) in [
        (KernelError::NoSuchProcess, -3isize),
        (KernelError::TableFull, -11),
        (KernelError::NoMemory, -12),
        (KernelError::Busy, -16),
        (KernelError::InvalidArgument, -22),
    ] {
        assert_eq!(e.into_usize(), errno as usize);
        assert_eq!(KernelError::try_from(errno), Ok(e));
    }
    assert!(KernelError::try_from(-1).is_err());
}
