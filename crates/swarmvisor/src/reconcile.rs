//! # Reconciler
//!
//! Turns the gap between the desired topology and the running processes into
//! a schedule of spawns and stops.
//!
//! For each service, `diff = desired - running`. A positive diff schedules that
//! many spawns, a negative one that many stops; operation `i` of a service runs
//! `i` stagger units after the reconciliation. Operations already scheduled but
//! not yet carried out count as done, so back-to-back reconciliations do not
//! overshoot.
//!
//! ## Invariants
//! - One direction per service per reconciliation.
//! - With nothing in flight, exactly `|desired - running|` operations are scheduled.

use std::collections::HashMap;
use std::time::Duration;

use crate::topology::Topology;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Spawn,
    Stop,
}

/// One operation due `delay` after the reconciliation that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scheduled {
    pub service: String,
    pub op: Op,
    pub delay: Duration,
}

/// Schedules the operations that close the gap for every service in `topology`.
pub fn plan(topology: &Topology, running: impl Fn(&str) -> usize, stagger: Duration) -> Vec<Scheduled> {
    let mut schedule = Vec::new();
    for (service, &desired) in &topology.services {
        let diff = desired as i64 - running(service) as i64;
        let op = if diff > 0 { Op::Spawn } else { Op::Stop };
        for i in 0..diff.unsigned_abs() {
            schedule.push(Scheduled {
                service: service.clone(),
                op,
                delay: stagger * i as u32,
            });
        }
    }
    schedule
}

/// [`plan`] plus bookkeeping of operations that have not fired yet.
#[derive(Debug)]
pub struct Reconciler {
    stagger: Duration,
    in_flight: HashMap<String, i64>,
}

impl Reconciler {
    pub fn new(stagger: Duration) -> Self {
        Self {
            stagger,
            in_flight: HashMap::new(),
        }
    }

    /// Plans against `running` adjusted by what is already scheduled.
    pub fn reconcile(&mut self, topology: &Topology, running: impl Fn(&str) -> usize) -> Vec<Scheduled> {
        let in_flight = &self.in_flight;
        let schedule = plan(
            topology,
            |service| {
                let pending = in_flight.get(service).copied().unwrap_or(0);
                (running(service) as i64 + pending).max(0) as usize
            },
            self.stagger,
        );

        for scheduled in &schedule {
            *self.in_flight.entry(scheduled.service.clone()).or_insert(0) += delta(scheduled.op);
        }
        schedule
    }

    /// Marks a scheduled operation as carried out.
    pub fn settle(&mut self, scheduled: &Scheduled) {
        if let Some(pending) = self.in_flight.get_mut(&scheduled.service) {
            *pending -= delta(scheduled.op);
            if *pending == 0 {
                self.in_flight.remove(&scheduled.service);
            }
        }
    }

    /// Net operations still waiting to fire for `service`.
    pub fn in_flight(&self, service: &str) -> i64 {
        self.in_flight.get(service).copied().unwrap_or(0)
    }
}

fn delta(op: Op) -> i64 {
    match op {
        Op::Spawn => 1,
        Op::Stop => -1,
    }
}
