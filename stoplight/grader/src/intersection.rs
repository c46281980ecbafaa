use alloc::{string::String, sync::Arc, vec, vec::Vec};
use grading::boot;
use kestrel::{
    Kernel, SystemConfigurationBuilder,
    thread::{
        Current, ThreadBuilder,
        scheduler::{Lottery, RoundRobin},
    },
    util::random::Lcg,
};
use stoplight::{
    Connector, Lane, Turn, Vehicle, VehicleKind,
    intersection::{Event, Intersection},
    passage::{Passage, Resource, Step},
    simulation::{self, SimulationConfig, SimulationError},
};

fn lock_trace(events: &[Event], vehicle: usize) -> Vec<Step> {
    events
        .iter()
        .filter_map(|event| match *event {
            Event::Acquired { vehicle: v, resource } if v == vehicle => Some(Step::Acquire(resource)),
            Event::Released { vehicle: v, resource } if v == vehicle => Some(Step::Release(resource)),
            _ => None,
        })
        .collect()
}

/// Lanes, turns and connectors fit together.
pub fn geometry() {
    for lane in Lane::ALL {
        assert_eq!(lane.destination(Turn::Right), lane.advance(1));
        assert_eq!(lane.destination(Turn::Left), lane.advance(2));
        assert_eq!(lane.advance(3), lane);
    }
    let left = Vehicle {
        number: 0,
        lane: Lane::A,
        turn: Turn::Left,
        kind: VehicleKind::Car,
    };
    assert_eq!(left.destination(), Lane::C);
    assert_eq!(left.route().as_slice(), &[Connector::AB, Connector::BC]);

    let right = Vehicle {
        number: 1,
        lane: Lane::C,
        turn: Turn::Right,
        kind: VehicleKind::Truck,
    };
    assert_eq!(right.destination(), Lane::A);
    assert_eq!(right.route().as_slice(), &[Connector::CA]);
}

/// The plan of a left turn, and what happens on a deviation.
pub fn passage_order() {
    let vehicle = Vehicle {
        number: 4,
        lane: Lane::B,
        turn: Turn::Left,
        kind: VehicleKind::Car,
    };
    let mut passage = Passage::new(&vehicle, Some(1));
    assert_eq!(
        passage.plan(),
        &[
            Step::Acquire(Resource::Ticket(1)),
            Step::Acquire(Resource::Crossing(Connector::BC)),
            Step::Acquire(Resource::Print(Connector::BC)),
            Step::Acquire(Resource::Crossing(Connector::CA)),
            Step::Acquire(Resource::Print(Connector::CA)),
            Step::Release(Resource::Crossing(Connector::BC)),
            Step::Release(Resource::Print(Connector::BC)),
            Step::Release(Resource::Crossing(Connector::CA)),
            Step::Release(Resource::Print(Connector::CA)),
            Step::Release(Resource::Ticket(1)),
        ]
    );

    passage.step(Step::Acquire(Resource::Ticket(1)));
    let outcome = kestrel::unwind::catch(move || {
        passage.step(Step::Acquire(Resource::Crossing(Connector::CA)));
    });
    assert!(matches!(outcome, Err(kestrel::unwind::Caught::Panic(_))));
}

/// A left turn from A goes through AB then BC hand over hand, and exits at
/// C.
#[boot]
pub fn left_turn() {
    let intersection = Intersection::new(2, 0);
    let vehicle = Vehicle {
        number: 0,
        lane: Lane::A,
        turn: Turn::Left,
        kind: VehicleKind::Car,
    };
    intersection.approach(vehicle);
    assert_eq!((intersection.rights(), intersection.lefts()), (0, 1));
    assert_eq!(intersection.completed(), 1);

    let events = intersection.journal();
    assert_eq!(
        lock_trace(&events, 0),
        Passage::new(&vehicle, Some(0)).plan()
    );
    let entered = events
        .iter()
        .filter_map(|event| match *event {
            Event::Entered { connector, .. } => Some(connector),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(entered, vec![Connector::AB, Connector::BC]);
    assert_eq!(
        events.last(),
        Some(&Event::Released {
            vehicle: 0,
            resource: Resource::Ticket(0)
        })
    );
    assert!(events.contains(&Event::Exited {
        vehicle: 0,
        lane: Lane::C
    }));
    intersection.destroy();
}

/// Without admission tickets a left turn is refused outright, while right
/// turns still go through.
#[boot]
pub fn no_tickets() {
    let intersection = Intersection::new(0, 0);
    let outcome = kestrel::unwind::catch(|| {
        intersection.approach(Vehicle {
            number: 0,
            lane: Lane::C,
            turn: Turn::Left,
            kind: VehicleKind::Car,
        })
    });
    assert_eq!(
        outcome,
        Err(kestrel::unwind::Caught::Panic(String::from(
            "Intersection: no admission ticket to wait for."
        )))
    );
    assert_eq!(intersection.lefts(), 0);

    intersection.approach(Vehicle {
        number: 1,
        lane: Lane::A,
        turn: Turn::Right,
        kind: VehicleKind::Truck,
    });
    assert_eq!((intersection.rights(), intersection.completed()), (1, 1));
    intersection.destroy();
}

/// A truck does not enter while cars wait in its lane.
#[boot]
pub fn truck_yields() {
    let intersection = Arc::new(Intersection::new(2, 0));
    for _ in 0..3 {
        intersection.announce_car(Lane::B);
    }
    let truck = Vehicle {
        number: 7,
        lane: Lane::B,
        turn: Turn::Right,
        kind: VehicleKind::Truck,
    };
    let handle = {
        let intersection = intersection.clone();
        ThreadBuilder::new("truck")
            .spawn(move || intersection.approach(truck))
            .unwrap()
    };

    let entered = |intersection: &Arc<Intersection>| {
        intersection
            .journal()
            .iter()
            .any(|event| matches!(event, Event::Entered { vehicle: 7, .. }))
    };
    for waiting in (1..=3).rev() {
        for _ in 0..5 {
            Current::yield_now();
        }
        assert_eq!(intersection.waiting_cars(Lane::B), waiting);
        assert!(!entered(&intersection));
        intersection.car_departs(Lane::B);
    }
    assert_eq!(handle.join(), Ok(0));

    let events = intersection.journal();
    assert!(events.contains(&Event::TruckYielded {
        vehicle: 7,
        waiting_cars: 3
    }));
    let proceeds = events
        .iter()
        .position(|event| *event == Event::TruckProceeds { vehicle: 7, waiting_cars: 0 });
    let enters = events
        .iter()
        .position(|event| matches!(event, Event::Entered { vehicle: 7, connector: Connector::BC }));
    assert!(proceeds.is_some() && proceeds < enters);
    assert_eq!(intersection.rights(), 1);

    match Arc::try_unwrap(intersection) {
        Ok(intersection) => intersection.destroy(),
        Err(_) => panic!("the truck still holds the intersection"),
    }
}

/// Left-turn tickets are handed out round robin.
#[boot]
pub fn ticket_fairness() {
    let intersection = Intersection::new(2, 0);
    for (number, lane) in [Lane::A, Lane::B, Lane::C, Lane::A, Lane::B].into_iter().enumerate() {
        intersection.approach(Vehicle {
            number,
            lane,
            turn: Turn::Left,
            kind: VehicleKind::Car,
        });
    }
    assert_eq!(intersection.grants(), vec![3, 2]);
    let tickets = intersection
        .journal()
        .iter()
        .filter_map(|event| match *event {
            Event::Acquired {
                resource: Resource::Ticket(t),
                ..
            } => Some(t),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(tickets, vec![0, 1, 0, 1, 0]);
    intersection.destroy();
}

/// Twenty random vehicles all make it through.
#[boot]
pub fn twenty_vehicles() {
    let report = simulation::run(&SimulationConfig::default(), &mut Lcg::new(20)).unwrap();
    assert_eq!(report.right + report.left, 20);
    assert!(report.cycles.is_empty());
}

fn check_report(report: &simulation::Report, vehicles: usize) {
    assert_eq!(report.right + report.left, vehicles);
    assert!(report.cycles.is_empty(), "deadlock cycle: {:?}", report.cycles);

    let max = report.grants.iter().max().copied().unwrap_or(0);
    let min = report.grants.iter().min().copied().unwrap_or(0);
    assert!(max - min <= 1, "unfair tickets: {:?}", report.grants);
    assert_eq!(report.grants.iter().sum::<u64>(), report.left as u64);

    for event in report.events.iter() {
        let Event::Arrived(vehicle) = *event else {
            continue;
        };
        assert_eq!(
            lock_trace(&report.events, vehicle.number),
            Passage::new(&vehicle, first_ticket(&report.events, vehicle.number)).plan()
        );
        if vehicle.kind == VehicleKind::Truck {
            let proceeds = report.events.iter().position(|e| {
                *e == Event::TruckProceeds {
                    vehicle: vehicle.number,
                    waiting_cars: 0,
                }
            });
            let enters = report.events.iter().position(
                |e| matches!(e, Event::Entered { vehicle: v, .. } if *v == vehicle.number),
            );
            assert!(proceeds.is_some() && proceeds < enters);
        }
    }
}

fn first_ticket(events: &[Event], vehicle: usize) -> Option<usize> {
    events.iter().find_map(|event| match *event {
        Event::Acquired {
            vehicle: v,
            resource: Resource::Ticket(t),
        } if v == vehicle => Some(t),
        _ => None,
    })
}

/// Many seeded runs under preemptive schedulers never deadlock.
pub fn stress() {
    const VEHICLES: usize = 24;
    for seed in 0..12u64 {
        let builder = SystemConfigurationBuilder::new()
            .seed(seed)
            .synch_probs(seed % 3 == 0);
        let builder = if seed % 2 == 0 {
            builder.set_scheduler(Lottery::new(seed, 3))
        } else {
            builder.set_scheduler(RoundRobin::new(1 + seed as usize % 4))
        };
        let kernel = Kernel::bootstrap(builder.build());
        let config = SimulationConfig {
            vehicles: VEHICLES,
            dwell_yields: (seed % 4) as usize,
            ..SimulationConfig::default()
        };
        let report = simulation::run(&config, &mut Lcg::new(seed)).unwrap();
        check_report(&report, VEHICLES);
        kernel.shutdown();
    }
}

fn three_lefts() -> Vec<(Lane, Turn, VehicleKind)> {
    Lane::ALL
        .into_iter()
        .map(|lane| (lane, Turn::Left, VehicleKind::Car))
        .collect()
}

/// Three simultaneous left turns with two tickets.
#[boot]
pub fn three_lefts_two_tickets() {
    let config = SimulationConfig {
        dwell_yields: 10,
        script: three_lefts(),
        ..SimulationConfig::default()
    };
    let report = simulation::run(&config, &mut Lcg::new(0)).unwrap();
    check_report(&report, 3);
    assert_eq!(report.left, 3);
}

/// With a third ticket, three left turns close the cycle AB → BC → CA.
#[boot]
pub fn three_lefts_three_tickets() {
    let config = SimulationConfig {
        left_tickets: 3,
        dwell_yields: 10,
        step_budget: 1000,
        script: three_lefts(),
        ..SimulationConfig::default()
    };
    match simulation::run(&config, &mut Lcg::new(0)) {
        Err(SimulationError::Stalled {
            completed,
            expected,
            cycles,
        }) => {
            assert_eq!((completed, expected), (0, 3));
            assert_eq!(cycles.len(), 1);
            let mut cycle = cycles[0].clone();
            cycle.sort();
            assert_eq!(cycle, vec![0, 1, 2]);
        }
        other => panic!("expected a deadlock, got {other:?}"),
    }
}

/// A fork failure aborts the run.
#[boot(SystemConfigurationBuilder::new().process_table_size(4))]
pub fn fork_failure() {
    let config = SimulationConfig {
        vehicles: 5,
        ..SimulationConfig::default()
    };
    let outcome = simulation::run(&config, &mut Lcg::new(1)).map(|report| report.right);
    assert_eq!(
        outcome,
        Err(SimulationError::Fork(kestrel::KernelError::TableFull))
    );
}
