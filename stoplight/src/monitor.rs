//! Wait-for graph over the connector locks.
//!
//! Before blocking on a connector, a vehicle registers the edge "I wait for
//! this connector". The monitor then walks waiter → holder → the connector
//! that holder waits for → its holder ..., and records a cycle if the walk
//! comes back to the registering vehicle. A recorded cycle is a deadlock.
use crate::{Connector, NUMROUTES};
use alloc::{collections::BTreeMap, vec::Vec};
use kestrel::sync::SpinLock;

struct Graph {
    holders: [Option<usize>; NUMROUTES],
    waiting: BTreeMap<usize, Connector>,
    cycles: Vec<Vec<usize>>,
}

/// The wait-for graph of one intersection.
pub struct WaitForMonitor {
    graph: SpinLock<Graph>,
}

impl Default for WaitForMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitForMonitor {
    /// An empty graph.
    pub fn new() -> Self {
        Self {
            graph: SpinLock::new(Graph {
                holders: [None; NUMROUTES],
                waiting: BTreeMap::new(),
                cycles: Vec::new(),
            }),
        }
    }

    /// `vehicle` is about to block on `connector`.
    pub fn waiting_for(&self, vehicle: usize, connector: Connector) {
        let mut graph = self.graph.lock();
        graph.waiting.insert(vehicle, connector);

        let mut chain = Vec::from([vehicle]);
        let mut wanted = connector;
        while let Some(holder) = graph.holders[wanted.index()] {
            if holder == vehicle {
                graph.cycles.push(chain);
                break;
            }
            if chain.contains(&holder) {
                break;
            }
            chain.push(holder);
            match graph.waiting.get(&holder) {
                Some(next) => wanted = *next,
                None => break,
            }
        }
        graph.unlock();
    }

    /// `vehicle` got `connector`.
    pub fn acquired(&self, vehicle: usize, connector: Connector) {
        let mut graph = self.graph.lock();
        graph.waiting.remove(&vehicle);
        graph.holders[connector.index()] = Some(vehicle);
        graph.unlock();
    }

    /// `vehicle` let go of `connector`.
    pub fn released(&self, vehicle: usize, connector: Connector) {
        let mut graph = self.graph.lock();
        if graph.holders[connector.index()] == Some(vehicle) {
            graph.holders[connector.index()] = None;
        }
        graph.unlock();
    }

    /// Every cycle seen so far, as the vehicles on it starting with the one
    /// that closed it.
    pub fn cycles(&self) -> Vec<Vec<usize>> {
        let graph = self.graph.lock();
        let cycles = graph.cycles.clone();
        graph.unlock();
        cycles
    }
}
