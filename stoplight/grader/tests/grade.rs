//! Every grading case as a `cargo test` test.
//!
//! Each case boots its own kernel on the test thread, so cases run in
//! parallel without seeing each other.
use stoplight_grader::{intersection, process, random, sync, thread};

macro_rules! grade {
    ($($name:ident => $case:path),* $(,)?) => {
        $(
            #[test]
            fn $name() {
                kestrel::QUITE.store(true, core::sync::atomic::Ordering::SeqCst);
                $case();
            }
        )*
    };
}

grade! {
    lcg_reference => random::lcg_reference,
    lcg_determinism => random::lcg_determinism,
    vehicle_draws => random::vehicle_draws,
    scheduler_fifo => random::fifo,
    scheduler_round_robin => random::round_robin,
    scheduler_lottery => random::lottery,

    fork_join => thread::fork_join,
    exit_code => thread::exit_code,
    zombie_reaping => thread::zombie_reaping,
    states => thread::states,
    custom_channel => thread::custom_channel,
    cwd_inherited => thread::cwd_inherited,
    fork_rollback_thread_limit => thread::fork_rollback_thread_limit,
    fork_rollback_table_full => thread::fork_rollback_table_full,
    join_non_child => thread::join_non_child,
    address_space => thread::address_space,
    kernel_panic => thread::kernel_panic,
    no_runnable_thread => thread::no_runnable_thread,
    preemption => thread::preemption,

    pid_uniqueness => process::pid_uniqueness,
    no_such_process => process::no_such_process,
    orphan_on_admission => process::orphan_on_admission,
    reparenting => process::reparenting,
    exit_notification => process::exit_notification,
    shared_admission => process::shared_admission,
    remove_after_wakeup => process::remove_after_wakeup,
    fork_links_parent => process::fork_links_parent,
    errno => process::errno,

    sema_0 => sync::semaphore::sema_0,
    sema_1 => sync::semaphore::sema_1,
    n_permits => sync::semaphore::n_permits,
    sema_destroy_with_sleeper => sync::semaphore::destroy_with_sleeper,
    lock_handoff => sync::lock::handoff,
    lock_mutual_exclusion => sync::lock::mutual_exclusion,
    lock_release_by_non_owner => sync::lock::release_by_non_owner,
    lock_acquire_twice => sync::lock::acquire_twice,
    lock_destroy_held => sync::lock::destroy_held,
    cv_bounded_buffer_1 => sync::condition_variable::bounded_buffer_1,
    cv_bounded_buffer_2 => sync::condition_variable::bounded_buffer_2,
    cv_signal_broadcast => sync::condition_variable::signal_broadcast,
    cv_wait_without_lock => sync::condition_variable::wait_without_lock,
    cv_destroy_with_waiter => sync::condition_variable::destroy_with_waiter,

    geometry => intersection::geometry,
    passage_order => intersection::passage_order,
    left_turn => intersection::left_turn,
    no_tickets => intersection::no_tickets,
    truck_yields => intersection::truck_yields,
    ticket_fairness => intersection::ticket_fairness,
    twenty_vehicles => intersection::twenty_vehicles,
    three_lefts_two_tickets => intersection::three_lefts_two_tickets,
    three_lefts_three_tickets => intersection::three_lefts_three_tickets,
    fork_failure => intersection::fork_failure,
    stress => intersection::stress,
}
