//! The lock order of one vehicle's passage.
//!
//! Every vehicle carries a [`Passage`]: the exact sequence of acquisitions
//! and releases it must perform, computed up front from its route. Each
//! lock operation is checked against the next step of that plan, and any
//! deviation is a programming error that panics on the spot.
//!
//! A left turn must follow
//!
//! 1. admission ticket,
//! 2. first connector, then its print lock,
//! 3. second connector, then its print lock,
//! 4. release the first pair,
//! 5. release the second pair,
//! 6. release the ticket.
//!
//! A right turn is steps 2 and 4 alone.
use crate::{Connector, Vehicle};
use arrayvec::ArrayVec;
use bitflags::bitflags;

/// A lock of the junction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    /// A left-turn admission ticket.
    Ticket(usize),
    /// The crossing lock of a connector.
    Crossing(Connector),
    /// The print lock of a connector.
    Print(Connector),
}

/// One step of a passage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Take the resource.
    Acquire(Resource),
    /// Give it back.
    Release(Resource),
}

bitflags! {
    /// The locks a vehicle holds.
    pub struct Held: u8 {
        /// Any admission ticket.
        const TICKET = 1 << 0;
        /// Crossing lock of AB.
        const CROSS_AB = 1 << 1;
        /// Crossing lock of BC.
        const CROSS_BC = 1 << 2;
        /// Crossing lock of CA.
        const CROSS_CA = 1 << 3;
        /// Print lock of AB.
        const PRINT_AB = 1 << 4;
        /// Print lock of BC.
        const PRINT_BC = 1 << 5;
        /// Print lock of CA.
        const PRINT_CA = 1 << 6;
    }
}

impl From<Resource> for Held {
    fn from(resource: Resource) -> Self {
        match resource {
            Resource::Ticket(_) => Held::TICKET,
            Resource::Crossing(Connector::AB) => Held::CROSS_AB,
            Resource::Crossing(Connector::BC) => Held::CROSS_BC,
            Resource::Crossing(Connector::CA) => Held::CROSS_CA,
            Resource::Print(Connector::AB) => Held::PRINT_AB,
            Resource::Print(Connector::BC) => Held::PRINT_BC,
            Resource::Print(Connector::CA) => Held::PRINT_CA,
        }
    }
}

/// The longest plan, a left turn.
const MAX_STEPS: usize = 10;

/// The lock-order checker of one vehicle.
pub struct Passage {
    vehicle: usize,
    plan: ArrayVec<Step, MAX_STEPS>,
    next: usize,
    held: Held,
}

impl Passage {
    /// The plan of `vehicle`, admitted with `ticket` if it turns left.
    pub fn new(vehicle: &Vehicle, ticket: Option<usize>) -> Self {
        let mut plan = ArrayVec::new();
        let route = vehicle.route();
        if let Some(ticket) = ticket {
            plan.push(Step::Acquire(Resource::Ticket(ticket)));
        }
        for connector in route.iter() {
            plan.push(Step::Acquire(Resource::Crossing(*connector)));
            plan.push(Step::Acquire(Resource::Print(*connector)));
        }
        for connector in route.iter() {
            plan.push(Step::Release(Resource::Crossing(*connector)));
            plan.push(Step::Release(Resource::Print(*connector)));
        }
        if let Some(ticket) = ticket {
            plan.push(Step::Release(Resource::Ticket(ticket)));
        }
        Self {
            vehicle: vehicle.number,
            plan,
            next: 0,
            held: Held::empty(),
        }
    }

    /// The whole plan.
    pub fn plan(&self) -> &[Step] {
        &self.plan
    }

    /// The locks currently held.
    pub fn held(&self) -> Held {
        self.held
    }

    /// Check `step` against the plan and record it.
    ///
    /// # Panics
    ///
    /// Panics if `step` is not the next step of the plan.
    pub fn step(&mut self, step: Step) {
        let expected = self.plan.get(self.next).copied();
        if expected != Some(step) {
            panic!(
                "Vehicle {}: lock order violation: expected {:?}, got {:?} (holding {:?}).",
                self.vehicle, expected, step, self.held
            );
        }
        match step {
            Step::Acquire(resource) => self.held.insert(resource.into()),
            Step::Release(resource) => self.held.remove(resource.into()),
        }
        self.next += 1;
    }

    /// Check that the passage is complete and nothing is held anymore.
    pub fn finish(self) {
        assert!(
            self.next == self.plan.len() && self.held.is_empty(),
            "Vehicle {}: left the junction after {} of {} steps, holding {:?}.",
            self.vehicle,
            self.next,
            self.plan.len(),
            self.held
        );
    }
}
