//! Sensor state injection for streetlight runs
//!
//! Each period the [`StateInjector`] moves the shared ambient light one step
//! along a dusk-to-dawn ramp and raises `activity_detected` on the streetlights
//! that currently see activity. Activity enters at the first light and shifts
//! one light down the street per period.

use super::clock::SimTime;
use super::error::SimulationResult;
use super::scheduler::{Process, ProcessContext, ProcessId, Step, Wake};
use crate::entity::{AmbientLight, ACTIVITY_DETECTED};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::time::Duration;
use tracing::{debug, warn};

/// Ambient levels rising from 0 to 1 in `steps` values, then falling back
pub fn ambient_ramp(steps: usize) -> Vec<f64> {
    let rising: Vec<f64> = match steps {
        0 => Vec::new(),
        1 => vec![0.0],
        n => (0..n).map(|i| i as f64 / (n - 1) as f64).collect(),
    };
    rising.iter().copied().chain(rising.iter().rev().copied()).collect()
}

/// Process that drives ambient light and activity
#[derive(Debug)]
pub struct StateInjector {
    period: Duration,
    ambient: AmbientLight,
    levels: Vec<f64>,
    streetlights: Vec<ProcessId>,
    activity_probability: f64,
    activity: Vec<bool>,
    rng: StdRng,
    step: usize,
    activities_injected: usize,
}

impl StateInjector {
    /// Injector for `streetlights`, ordered along the street
    pub fn new(
        period: Duration,
        ambient: AmbientLight,
        levels: Vec<f64>,
        streetlights: Vec<ProcessId>,
        activity_probability: f64,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let activity = vec![false; streetlights.len()];
        Self {
            period,
            ambient,
            levels,
            streetlights,
            activity_probability: activity_probability.clamp(0.0, 1.0),
            activity,
            rng,
            step: 0,
            activities_injected: 0,
        }
    }

    /// `activity_detected` interrupts delivered so far
    pub fn activities_injected(&self) -> usize {
        self.activities_injected
    }

    /// Which streetlights saw activity in the latest step
    pub fn activity(&self) -> &[bool] {
        &self.activity
    }

    fn inject(&mut self, ctx: &mut ProcessContext<'_>, now: SimTime) -> SimulationResult<()> {
        if !self.levels.is_empty() {
            let level = self.levels[self.step % self.levels.len()];
            self.ambient.set(level);
            debug!(at = %now, ambient = level, "Ambient light injected");
        }
        self.step += 1;

        if self.activity.is_empty() {
            return Ok(());
        }
        let seen = self.rng.gen_bool(self.activity_probability);
        self.activity.pop();
        self.activity.insert(0, seen);
        for (pid, active) in self.streetlights.iter().zip(&self.activity) {
            if *active {
                ctx.interrupt(*pid, ACTIVITY_DETECTED)?;
                self.activities_injected += 1;
                debug!(target_process = %pid, at = %now, "Activity injected");
            }
        }
        Ok(())
    }
}

impl Process for StateInjector {
    fn name(&self) -> &str {
        "state-injector"
    }

    fn resume(&mut self, ctx: &mut ProcessContext<'_>, wake: Wake) -> SimulationResult<Step> {
        if let Wake::Interrupt(interrupt) = wake {
            warn!(cause = %interrupt.cause, "State injector ignores interrupts");
            return Ok(Step::Wait(self.period));
        }
        let now = ctx.now();
        self.inject(ctx, now)?;
        Ok(Step::Wait(self.period))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
