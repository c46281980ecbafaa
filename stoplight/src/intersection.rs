//! The intersection controller.
//!
//! ## Locks
//!
//! Each connector has a crossing [`Lock`], held while a vehicle occupies it,
//! and a print [`Lock`] that keeps the status lines of one vehicle on that
//! connector together. Left-turners additionally hold one of the admission
//! tickets for their whole passage.
//!
//! The acquisition order is fixed (see [`passage`](crate::passage)) and
//! checked on every operation.
//!
//! ## Tickets
//!
//! A left-turner takes the ticket that has been granted the fewest times so
//! far (ties go to the lowest ticket), then blocks until that ticket is free.
//! With two tickets at most two vehicles traverse hand over hand at once, so
//! the wait-for graph over the three connectors can never close.
//!
//! ## Trucks
//!
//! A car counts itself waiting in its lane on arrival and uncounts itself
//! right before it starts taking connectors. A truck polls its lane's count,
//! yielding the cpu between checks, and goes only once it reads zero.
use crate::{
    Connector, Lane, NUMROUTES, Turn, Vehicle, VehicleKind,
    monitor::WaitForMonitor,
    passage::{Passage, Resource, Step},
};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use kestrel::{
    println,
    sync::{Lock, SpinLock},
    thread::Current,
};

/// Something that happened in the junction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A vehicle showed up.
    Arrived(Vehicle),
    /// A truck found cars waiting in its lane and started yielding.
    TruckYielded {
        /// The truck.
        vehicle: usize,
        /// Cars counted waiting at that check.
        waiting_cars: usize,
    },
    /// A truck is done yielding.
    TruckProceeds {
        /// The truck.
        vehicle: usize,
        /// Cars counted waiting at its last check.
        waiting_cars: usize,
    },
    /// A vehicle got a lock.
    Acquired {
        /// The vehicle.
        vehicle: usize,
        /// The lock.
        resource: Resource,
    },
    /// A vehicle is about to let go of a lock.
    Released {
        /// The vehicle.
        vehicle: usize,
        /// The lock.
        resource: Resource,
    },
    /// A vehicle drove onto a connector.
    Entered {
        /// The vehicle.
        vehicle: usize,
        /// The connector.
        connector: Connector,
    },
    /// A vehicle left the junction.
    Exited {
        /// The vehicle.
        vehicle: usize,
        /// Its exit lane.
        lane: Lane,
    },
}

/// The junction: its locks, tickets and counters.
pub struct Intersection {
    crossing: [Lock; NUMROUTES],
    print: [Lock; NUMROUTES],
    tickets: Vec<Lock>,
    grants: SpinLock<Vec<u64>>,
    waiting_cars: [AtomicUsize; NUMROUTES],
    rights: AtomicUsize,
    lefts: AtomicUsize,
    completed: AtomicUsize,
    dwell_yields: usize,
    monitor: WaitForMonitor,
    journal: SpinLock<Vec<Event>>,
}

impl Intersection {
    /// A junction with `left_tickets` admission tickets, where every vehicle
    /// yields the cpu `dwell_yields` times on each connector.
    ///
    /// Anything but two tickets is for experiments: with zero tickets every
    /// left turn panics, three or more make deadlock possible.
    pub fn new(left_tickets: usize, dwell_yields: usize) -> Self {
        Self {
            crossing: [Lock::new("AB"), Lock::new("BC"), Lock::new("CA")],
            print: [
                Lock::new("printAB"),
                Lock::new("printBC"),
                Lock::new("printCA"),
            ],
            tickets: (0..left_tickets)
                .map(|i| Lock::new(alloc::format!("left{}", i + 1)))
                .collect(),
            grants: SpinLock::new(alloc::vec![0; left_tickets]),
            waiting_cars: [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)],
            rights: AtomicUsize::new(0),
            lefts: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            dwell_yields,
            monitor: WaitForMonitor::new(),
            journal: SpinLock::new(Vec::new()),
        }
    }

    /// Drive `vehicle` through the junction.
    pub fn approach(&self, vehicle: Vehicle) {
        println!(
            "{} {} waiting at Route {} wants to turn {} to Route {}.",
            vehicle.kind,
            vehicle.number,
            vehicle.lane,
            vehicle.turn,
            vehicle.destination()
        );
        self.record(Event::Arrived(vehicle));

        match vehicle.kind {
            VehicleKind::Car => self.announce_car(vehicle.lane),
            VehicleKind::Truck => self.yield_to_cars(&vehicle),
        }
        match vehicle.turn {
            Turn::Right => {
                self.turn_right(&vehicle);
                self.rights.fetch_add(1, Ordering::SeqCst);
            }
            Turn::Left => {
                self.turn_left(&vehicle);
                self.lefts.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Count one more car waiting in `lane`.
    pub fn announce_car(&self, lane: Lane) {
        self.waiting_cars[lane.index()].fetch_add(1, Ordering::SeqCst);
    }

    /// Count one car less waiting in `lane`.
    pub fn car_departs(&self, lane: Lane) {
        let _ = self.waiting_cars[lane.index()].fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |n| n.checked_sub(1),
        );
    }

    /// Cars currently counted waiting in `lane`.
    pub fn waiting_cars(&self, lane: Lane) -> usize {
        self.waiting_cars[lane.index()].load(Ordering::SeqCst)
    }

    fn yield_to_cars(&self, truck: &Vehicle) {
        let mut yielded = false;
        loop {
            let waiting_cars = self.waiting_cars(truck.lane);
            if waiting_cars == 0 {
                self.record(Event::TruckProceeds {
                    vehicle: truck.number,
                    waiting_cars,
                });
                return;
            }
            if !yielded {
                self.record(Event::TruckYielded {
                    vehicle: truck.number,
                    waiting_cars,
                });
                yielded = true;
            }
            Current::yield_now();
        }
    }

    fn turn_right(&self, vehicle: &Vehicle) {
        let connector = vehicle.lane.outgoing();
        let mut passage = Passage::new(vehicle, None);
        if vehicle.kind == VehicleKind::Car {
            self.car_departs(vehicle.lane);
        }

        self.take(vehicle, &mut passage, Resource::Crossing(connector));
        self.take(vehicle, &mut passage, Resource::Print(connector));
        println!("{:<5} {:<2} is entering {}.", vehicle.kind, vehicle.number, connector);
        self.record(Event::Entered {
            vehicle: vehicle.number,
            connector,
        });
        self.dwell();
        self.give(vehicle, &mut passage, Resource::Crossing(connector));
        println!(
            "{:<5} {:<2} is leaving {} and exited at Route {}.",
            vehicle.kind,
            vehicle.number,
            connector,
            vehicle.destination()
        );
        self.record(Event::Exited {
            vehicle: vehicle.number,
            lane: vehicle.destination(),
        });
        self.give(vehicle, &mut passage, Resource::Print(connector));
        passage.finish();
    }

    fn turn_left(&self, vehicle: &Vehicle) {
        let (first, second) = (vehicle.lane.outgoing(), vehicle.lane.advance(1).outgoing());
        let ticket = self.pick_ticket();
        let mut passage = Passage::new(vehicle, Some(ticket));

        self.take(vehicle, &mut passage, Resource::Ticket(ticket));
        if vehicle.kind == VehicleKind::Car {
            self.car_departs(vehicle.lane);
        }
        self.take(vehicle, &mut passage, Resource::Crossing(first));
        self.take(vehicle, &mut passage, Resource::Print(first));
        println!(
            "{:<5} {:<2} is entering {} and waiting for {}.",
            vehicle.kind, vehicle.number, first, second
        );
        self.record(Event::Entered {
            vehicle: vehicle.number,
            connector: first,
        });
        self.dwell();

        self.take(vehicle, &mut passage, Resource::Crossing(second));
        self.take(vehicle, &mut passage, Resource::Print(second));
        self.give(vehicle, &mut passage, Resource::Crossing(first));
        println!(
            "{:<5} {:<2} is entering {} from {}.",
            vehicle.kind, vehicle.number, second, first
        );
        self.record(Event::Entered {
            vehicle: vehicle.number,
            connector: second,
        });
        self.give(vehicle, &mut passage, Resource::Print(first));
        self.dwell();

        self.give(vehicle, &mut passage, Resource::Crossing(second));
        println!(
            "{:<5} {:<2} is leaving {} and exited at Route {}.",
            vehicle.kind,
            vehicle.number,
            second,
            vehicle.destination()
        );
        self.record(Event::Exited {
            vehicle: vehicle.number,
            lane: vehicle.destination(),
        });
        self.give(vehicle, &mut passage, Resource::Print(second));
        self.give(vehicle, &mut passage, Resource::Ticket(ticket));
        passage.finish();
    }

    /// The ticket granted the fewest times so far, lowest first on a tie.
    fn pick_ticket(&self) -> usize {
        let mut grants = self.grants.lock();
        let ticket = grants
            .iter()
            .enumerate()
            .min_by_key(|(i, granted)| (**granted, *i))
            .map(|(i, _)| i);
        if let Some(i) = ticket {
            grants[i] += 1;
        }
        grants.unlock();
        ticket.unwrap_or_else(|| panic!("Intersection: no admission ticket to wait for."))
    }

    fn lock_of(&self, resource: Resource) -> &Lock {
        match resource {
            Resource::Ticket(i) => &self.tickets[i],
            Resource::Crossing(c) => &self.crossing[c.index()],
            Resource::Print(c) => &self.print[c.index()],
        }
    }

    fn take(&self, vehicle: &Vehicle, passage: &mut Passage, resource: Resource) {
        passage.step(Step::Acquire(resource));
        if let Resource::Crossing(connector) = resource {
            self.monitor.waiting_for(vehicle.number, connector);
            self.lock_of(resource).acquire();
            self.monitor.acquired(vehicle.number, connector);
        } else {
            self.lock_of(resource).acquire();
        }
        self.record(Event::Acquired {
            vehicle: vehicle.number,
            resource,
        });
    }

    fn give(&self, vehicle: &Vehicle, passage: &mut Passage, resource: Resource) {
        passage.step(Step::Release(resource));
        self.record(Event::Released {
            vehicle: vehicle.number,
            resource,
        });
        if let Resource::Crossing(connector) = resource {
            self.monitor.released(vehicle.number, connector);
        }
        self.lock_of(resource).release();
    }

    fn dwell(&self) {
        for _ in 0..self.dwell_yields {
            Current::yield_now();
        }
    }

    fn record(&self, event: Event) {
        let mut journal = self.journal.lock();
        journal.push(event);
        journal.unlock();
    }

    /// Right turns completed.
    pub fn rights(&self) -> usize {
        self.rights.load(Ordering::SeqCst)
    }

    /// Left turns completed.
    pub fn lefts(&self) -> usize {
        self.lefts.load(Ordering::SeqCst)
    }

    /// Vehicles that made it through.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// How often each ticket has been granted.
    pub fn grants(&self) -> Vec<u64> {
        let grants = self.grants.lock();
        let v = grants.clone();
        grants.unlock();
        v
    }

    /// Deadlock cycles seen by the wait-for monitor.
    pub fn cycles(&self) -> Vec<Vec<usize>> {
        self.monitor.cycles()
    }

    /// Everything that happened so far, in order.
    pub fn journal(&self) -> Vec<Event> {
        let journal = self.journal.lock();
        let v = journal.clone();
        journal.unlock();
        v
    }

    /// Tear the junction down.
    ///
    /// # Panics
    ///
    /// Panics if a vehicle is still inside.
    pub fn destroy(self) {
        let Self {
            crossing,
            print,
            tickets,
            ..
        } = self;
        for lock in crossing.into_iter().chain(print).chain(tickets) {
            lock.destroy();
        }
    }
}
