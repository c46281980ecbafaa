// Runs the grading cases. Arguments, if any, select cases by name, e.g.
// `grader sync::semaphore::sema_0 intersection::stress`.
use stoplight_grader::{intersection, process, random, sync, thread};

fn main() {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let filter = args.iter().map(String::as_str).collect::<Vec<_>>();

    let passed = kestrel::TestDriver::start(
        [
            // Randomness and scheduling policies.
            &random::lcg_reference,
            &random::lcg_determinism,
            &random::vehicle_draws,
            &random::fifo,
            &random::round_robin,
            &random::lottery,
            // Thread lifecycle.
            &thread::fork_join,
            &thread::exit_code,
            &thread::zombie_reaping,
            &thread::states,
            &thread::custom_channel,
            &thread::cwd_inherited,
            &thread::fork_rollback_thread_limit,
            &thread::fork_rollback_table_full,
            &thread::join_non_child,
            &thread::address_space,
            &thread::kernel_panic,
            &thread::no_runnable_thread,
            &thread::preemption,
            // Process table.
            &process::pid_uniqueness,
            &process::no_such_process,
            &process::orphan_on_admission,
            &process::reparenting,
            &process::exit_notification,
            &process::shared_admission,
            &process::remove_after_wakeup,
            &process::fork_links_parent,
            &process::errno,
            // Synchronization primitives.
            &sync::semaphore::sema_0,
            &sync::semaphore::sema_1,
            &sync::semaphore::n_permits,
            &sync::semaphore::destroy_with_sleeper,
            &sync::lock::handoff,
            &sync::lock::mutual_exclusion,
            &sync::lock::release_by_non_owner,
            &sync::lock::acquire_twice,
            &sync::lock::destroy_held,
            &sync::condition_variable::bounded_buffer_1,
            &sync::condition_variable::bounded_buffer_2,
            &sync::condition_variable::signal_broadcast,
            &sync::condition_variable::wait_without_lock,
            &sync::condition_variable::destroy_with_waiter,
            // Intersection.
            &intersection::geometry,
            &intersection::passage_order,
            &intersection::left_turn,
            &intersection::no_tickets,
            &intersection::truck_yields,
            &intersection::ticket_fairness,
            &intersection::twenty_vehicles,
            &intersection::three_lefts_two_tickets,
            &intersection::three_lefts_three_tickets,
            &intersection::fork_failure,
            &intersection::stress,
        ],
        &filter,
    );
    if !passed {
        std::process::exit(1);
    }
}
