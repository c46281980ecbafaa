//! # Stoplight: a deadlock-free three-way intersection.
//!
//! Three approach lanes A, B and C feed a triangular one-way junction made
//! of three connectors:
//!
//! ```text
//!            A
//!          /   ^
//!      AB /     \ CA
//!        v       \
//!       B -----> C
//!           BC
//! ```
//!
//! A vehicle turning right from lane X crosses the single connector leaving
//! X and exits at the next lane. A vehicle turning left crosses two
//! connectors, hand over hand: it takes the second connector before letting
//! go of the first, so it is never unprotected inside the junction.
//!
//! Three left-turners, one per lane, each holding their first connector and
//! waiting for the next one would close a cycle AB → BC → CA → AB. The
//! [`Intersection`] prevents it by admitting at most two left-turners at a
//! time with admission tickets. Trucks yield to the cars waiting in their
//! lane.
//!
//! Every vehicle is a kernel thread; see [`simulation::run`].
//!
//! [`Intersection`]: intersection::Intersection
#![no_std]
#![deny(missing_docs)]

extern crate alloc;

pub mod intersection;
pub mod monitor;
pub mod passage;
pub mod simulation;

use arrayvec::ArrayVec;
use core::fmt;
use kestrel::util::random::RandomSource;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Number of approach lanes, and of connectors.
pub const NUMROUTES: usize = 3;

/// An approach lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum Lane {
    /// Route A.
    A = 0,
    /// Route B.
    B = 1,
    /// Route C.
    C = 2,
}

impl Lane {
    /// All lanes, in order.
    pub const ALL: [Lane; NUMROUTES] = [Lane::A, Lane::B, Lane::C];

    /// Position of this lane in [`Lane::ALL`].
    pub fn index(self) -> usize {
        u32::from(self) as usize
    }

    /// The lane `steps` positions further around the junction.
    pub fn advance(self, steps: usize) -> Lane {
        Lane::ALL[(self.index() + steps) % NUMROUTES]
    }

    /// Where a vehicle from this lane exits after `turn`.
    pub fn destination(self, turn: Turn) -> Lane {
        match turn {
            Turn::Right => self.advance(1),
            Turn::Left => self.advance(2),
        }
    }

    /// The connector leaving this lane.
    pub fn outgoing(self) -> Connector {
        match self {
            Lane::A => Connector::AB,
            Lane::B => Connector::BC,
            Lane::C => Connector::CA,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Lane::A => 'A',
            Lane::B => 'B',
            Lane::C => 'C',
        };
        write!(f, "{letter}")
    }
}

/// A turn direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum Turn {
    /// One connector.
    Right = 0,
    /// Two connectors.
    Left = 1,
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Turn::Right => "Right",
            Turn::Left => "Left",
        })
    }
}

/// A vehicle class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum VehicleKind {
    /// Has priority over trucks of the same lane.
    Car = 0,
    /// Waits until no car waits in its lane.
    Truck = 1,
}

impl fmt::Display for VehicleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VehicleKind::Car => "Car",
            VehicleKind::Truck => "Truck",
        })
    }
}

/// A one-way road segment inside the junction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum Connector {
    /// From A to B.
    AB = 0,
    /// From B to C.
    BC = 1,
    /// From C to A.
    CA = 2,
}

impl Connector {
    /// Position of this connector in the junction's tables.
    pub fn index(self) -> usize {
        u32::from(self) as usize
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Connector::AB => "AB",
            Connector::BC => "BC",
            Connector::CA => "CA",
        })
    }
}

/// A vehicle about to approach the junction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vehicle {
    /// Number of this vehicle in its run.
    pub number: usize,
    /// The lane it arrives on.
    pub lane: Lane,
    /// Where it turns.
    pub turn: Turn,
    /// Its class.
    pub kind: VehicleKind,
}

impl Vehicle {
    /// Draw a vehicle with uniformly random lane, turn and class.
    pub fn random(number: usize, rng: &mut dyn RandomSource) -> Self {
        Self {
            number,
            lane: draw(rng, NUMROUTES as u32),
            turn: draw(rng, 2),
            kind: draw(rng, 2),
        }
    }

    /// The exit lane.
    pub fn destination(&self) -> Lane {
        self.lane.destination(self.turn)
    }

    /// The connectors crossed, in order.
    pub fn route(&self) -> ArrayVec<Connector, 2> {
        let mut route = ArrayVec::new();
        route.push(self.lane.outgoing());
        if self.turn == Turn::Left {
            route.push(self.lane.advance(1).outgoing());
        }
        route
    }
}

fn draw<T: TryFromPrimitive<Primitive = u32>>(rng: &mut dyn RandomSource, variants: u32) -> T {
    match T::try_from_primitive(rng.below(variants)) {
        Ok(v) => v,
        Err(_) => unreachable!("a draw below {variants} is always a variant"),
    }
}
