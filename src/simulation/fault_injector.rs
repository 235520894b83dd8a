//! Scheduled fault injection
//!
//! A [`FaultPlan`] lists faults by entity name; the orchestrator resolves it
//! into a [`FaultInjector`] process that sleeps until each planned time and
//! interrupts the target.

use super::clock::SimTime;
use super::error::SimulationResult;
use super::scheduler::{Process, ProcessContext, ProcessId, Step, Wake};
use crate::types::{EntityId, DEFAULT_FAULT_CAUSE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::any::Any;
use std::time::Duration;
use tracing::{info, warn};

/// Minimum spacing between two random faults on the same device
pub const RANDOM_FAULT_SPACING: Duration = Duration::from_secs(5);

/// One fault, by entity name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedFault {
    /// Entity to interrupt
    pub entity: EntityId,
    /// When to interrupt it
    pub at: SimTime,
    /// Interrupt cause
    pub cause: String,
}

/// Faults to inject during a run, ordered by time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FaultPlan {
    faults: Vec<PlannedFault>,
}

impl FaultPlan {
    /// Empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fault, keeping insertion order among equal times
    pub fn add(&mut self, entity: EntityId, at: SimTime, cause: impl Into<String>) {
        let index = self.faults.partition_point(|f| f.at <= at);
        self.faults.insert(index, PlannedFault { entity, at, cause: cause.into() });
    }

    /// Merge another plan into this one
    pub fn extend(&mut self, other: FaultPlan) {
        for fault in other.faults {
            self.add(fault.entity, fault.at, fault.cause);
        }
    }

    /// `count` FAULT interrupts on random devices at random times in `(0, horizon)`
    ///
    /// Faults on the same device are kept [`RANDOM_FAULT_SPACING`] apart so the
    /// device has time to recover; when the horizon is too short the plan may
    /// hold fewer than `count` faults. A seed makes the plan reproducible.
    pub fn random(devices: &[EntityId], horizon: Duration, count: usize, seed: Option<u64>) -> Self {
        let mut plan = Self::new();
        let horizon_ms = horizon.as_millis() as u64;
        if devices.is_empty() || count == 0 || horizon_ms <= 1 {
            return plan;
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let spacing = RANDOM_FAULT_SPACING.as_millis() as u64;
        let max_attempts = count * 20;

        let mut attempts = 0;
        while plan.len() < count && attempts < max_attempts {
            attempts += 1;
            let device = &devices[rng.gen_range(0..devices.len())];
            let at = SimTime::from_millis(rng.gen_range(1..horizon_ms));
            let crowded = plan
                .faults
                .iter()
                .any(|f| &f.entity == device && f.at.as_millis().abs_diff(at.as_millis()) < spacing);
            if !crowded {
                plan.add(device.clone(), at, DEFAULT_FAULT_CAUSE);
            }
        }
        if plan.len() < count {
            warn!(requested = count, planned = plan.len(), "Could not place all random faults");
        }
        plan
    }

    /// Planned faults in firing order
    pub fn faults(&self) -> &[PlannedFault] {
        &self.faults
    }

    /// Number of planned faults
    pub fn len(&self) -> usize {
        self.faults.len()
    }

    /// Whether nothing is planned
    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Injection {
    target: ProcessId,
    at: SimTime,
    cause: String,
}

/// Process that delivers planned interrupts
#[derive(Debug, Default)]
pub struct FaultInjector {
    plan: Vec<Injection>,
    next: usize,
    delivered: usize,
}

impl FaultInjector {
    /// Injector with nothing planned
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan an interrupt of `target` at `at`
    pub fn inject(&mut self, target: ProcessId, at: SimTime, cause: impl Into<String>) -> &mut Self {
        let index = self.next + self.plan[self.next..].partition_point(|i| i.at <= at);
        self.plan.insert(index, Injection { target, at, cause: cause.into() });
        self
    }

    /// Interrupts delivered so far
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Interrupts still waiting for their time
    pub fn remaining(&self) -> usize {
        self.plan.len() - self.next
    }

    fn next_wait(&self, now: SimTime) -> Step {
        match self.plan.get(self.next) {
            Some(injection) => Step::Wait(injection.at - now),
            None => Step::Finish,
        }
    }
}

impl Process for FaultInjector {
    fn name(&self) -> &str {
        "fault-injector"
    }

    fn resume(&mut self, ctx: &mut ProcessContext<'_>, wake: Wake) -> SimulationResult<Step> {
        if let Wake::Interrupt(interrupt) = wake {
            warn!(cause = %interrupt.cause, "Fault injector ignores interrupts");
            return Ok(self.next_wait(ctx.now()));
        }

        let now = ctx.now();
        while let Some(injection) = self.plan.get(self.next).filter(|i| i.at <= now) {
            ctx.interrupt(injection.target, injection.cause.clone())?;
            info!(target_process = %injection.target, cause = %injection.cause, at = %now, "Fault injected");
            self.next += 1;
            self.delivered += 1;
        }
        Ok(self.next_wait(now))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    #[test]
    fn test_plan_keeps_time_order() {
        let mut plan = FaultPlan::new();
        plan.add(id("dev1"), SimTime::from_millis(3000), "FAULT");
        plan.add(id("dev0"), SimTime::from_millis(1000), "FAULT");
        plan.add(id("dev2"), SimTime::from_millis(3000), "FAULT");

        let order: Vec<_> = plan.faults().iter().map(|f| f.entity.as_str()).collect();
        assert_eq!(order, vec!["dev0", "dev1", "dev2"]);
    }

    #[test]
    fn test_random_plan_is_reproducible_and_in_range() {
        let devices = vec![id("dev0"), id("dev1"), id("dev2")];
        let horizon = Duration::from_secs(60);
        let a = FaultPlan::random(&devices, horizon, 5, Some(42));
        let b = FaultPlan::random(&devices, horizon, 5, Some(42));

        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        for fault in a.faults() {
            assert!(fault.at > SimTime::ZERO && fault.at < SimTime::from(horizon));
            assert_eq!(fault.cause, DEFAULT_FAULT_CAUSE);
        }
    }

    #[test]
    fn test_random_plan_spaces_faults_per_device() {
        let devices = vec![id("dev0")];
        let plan = FaultPlan::random(&devices, Duration::from_secs(12), 10, Some(7));
        assert!(plan.len() <= 3);
        for pair in plan.faults().windows(2) {
            assert!(pair[1].at - pair[0].at >= RANDOM_FAULT_SPACING);
        }
    }

    #[test]
    fn test_random_plan_without_devices_is_empty() {
        assert!(FaultPlan::random(&[], Duration::from_secs(10), 3, Some(1)).is_empty());
    }
}
