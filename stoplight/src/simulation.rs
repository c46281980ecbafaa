//! Vehicle simulation.
//!
//! The driver runs on a kernel thread (usually the boot thread). It spawns
//! one kernel thread per vehicle, waits for all of them to make it through
//! the junction, and reports the turn counts.
//!
//! Vehicles are drawn by the driver before they are spawned, so a seeded
//! run always offers the same vehicles in the same order. Whether the
//! interleaving repeats as well depends on the kernel's scheduler.
use crate::{
    Lane, Turn, Vehicle, VehicleKind,
    intersection::{Event, Intersection},
};
use alloc::{sync::Arc, vec::Vec};
use kestrel::{
    KernelError, info, println,
    thread::{Current, JoinHandle, ThreadBuilder},
    util::random::RandomSource,
};

/// Knobs of one run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Number of random vehicles. Ignored when `script` is not empty.
    pub vehicles: usize,
    /// Left-turn admission tickets.
    pub left_tickets: usize,
    /// Yields while inside each connector.
    pub dwell_yields: usize,
    /// Yields the driver spends waiting before it gives up.
    pub step_budget: usize,
    /// Vehicles to run instead of random ones, in spawn order.
    pub script: Vec<(Lane, Turn, VehicleKind)>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            vehicles: 20,
            left_tickets: 2,
            dwell_yields: 0,
            step_budget: 100_000,
            script: Vec::new(),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct Report {
    /// Right turns executed.
    pub right: usize,
    /// Left turns executed.
    pub left: usize,
    /// Cycles recorded by the wait-for monitor.
    pub cycles: Vec<Vec<usize>>,
    /// How often each admission ticket was granted.
    pub grants: Vec<u64>,
    /// The junction's journal.
    pub events: Vec<Event>,
}

/// Why a run did not complete.
#[derive(Debug, PartialEq, Eq)]
pub enum SimulationError {
    /// A vehicle thread could not be created.
    Fork(KernelError),
    /// A vehicle thread could not be joined.
    Join(KernelError),
    /// The step budget ran out before every vehicle was through.
    Stalled {
        /// Vehicles through by then.
        completed: usize,
        /// Vehicles spawned.
        expected: usize,
        /// Cycles recorded by the wait-for monitor.
        cycles: Vec<Vec<usize>>,
    },
}

/// Run one simulation on the current kernel, drawing vehicles from `rng`.
///
/// On [`SimulationError::Stalled`] the vehicles still inside are left where
/// they are; shutting the kernel down drops them.
pub fn run(
    config: &SimulationConfig,
    rng: &mut dyn RandomSource,
) -> Result<Report, SimulationError> {
    let vehicles = if config.script.is_empty() {
        (0..config.vehicles)
            .map(|number| Vehicle::random(number, rng))
            .collect::<Vec<_>>()
    } else {
        config
            .script
            .iter()
            .enumerate()
            .map(|(number, &(lane, turn, kind))| Vehicle {
                number,
                lane,
                turn,
                kind,
            })
            .collect()
    };
    let expected = vehicles.len();
    let intersection = Arc::new(Intersection::new(config.left_tickets, config.dwell_yields));

    let mut handles: Vec<JoinHandle> = Vec::with_capacity(expected);
    for vehicle in vehicles {
        let intersection = intersection.clone();
        let handle = ThreadBuilder::new("approachintersection thread")
            .spawn(move || intersection.approach(vehicle))
            .map_err(SimulationError::Fork)?;
        handles.push(handle);
    }

    let mut steps = 0;
    while intersection.completed() < expected {
        if steps == config.step_budget {
            return Err(SimulationError::Stalled {
                completed: intersection.completed(),
                expected,
                cycles: intersection.cycles(),
            });
        }
        Current::yield_now();
        steps += 1;
    }
    for handle in handles {
        handle.join().map_err(SimulationError::Join)?;
    }

    let report = Report {
        right: intersection.rights(),
        left: intersection.lefts(),
        cycles: intersection.cycles(),
        grants: intersection.grants(),
        events: intersection.journal(),
    };
    println!("Right turns executed: {}", report.right);
    println!("Left turns executed: {}", report.left);
    info!(
        "Stoplight: {} vehicles in {} yields, tickets granted {:?}.",
        expected, steps, report.grants
    );

    match Arc::try_unwrap(intersection) {
        Ok(intersection) => intersection.destroy(),
        Err(_) => panic!("Stoplight: a vehicle still references the intersection."),
    }
    Ok(report)
}
