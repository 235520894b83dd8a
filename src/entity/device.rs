//! Device behavior
//!
//! A device publishes one sensor reading per tick while NORMAL. A `FAULT`
//! interrupt moves it to FAULT, where it stays silent and waits for a
//! `RESUME` command on its configure stream.
//!
//! What a reading contains depends on the [`DeviceProfile`]. Streetlights also
//! accept the activity interrupts; those leave the tick schedule unchanged.

use super::streetlight::{Streetlight, StreetlightStatistics, ACTIVITY_DETECTED, ACTIVITY_IN_NEIGHBOURHOOD};
use crate::messaging::{Command, Inbox, Message, Outbox};
use crate::simulation::{Process, ProcessContext, SimTime, SimulationError, SimulationResult, Step, Wake};
use crate::types::{EntityId, EntityState, DEFAULT_FAULT_CAUSE};
use serde::Serialize;
use std::any::Any;
use std::time::Duration;
use tracing::{debug, info, warn, Span};

/// Default device tick period
pub const DEFAULT_DEVICE_PERIOD: Duration = Duration::from_secs(1);

/// Totals reported by a device at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatistics {
    /// Device id
    pub id: EntityId,
    /// State when the run ended
    pub final_state: EntityState,
    /// Sensor readings accepted by the publish interface
    pub readings_published: u64,
    /// Fault reports accepted by the publish interface
    pub fault_reports: u64,
    /// Messages the publish interface refused
    pub publish_dropped: u64,
    /// Faults entered
    pub faults: u64,
    /// Returns to NORMAL
    pub resumes: u64,
    /// Commands drained from the configure stream
    pub commands_received: u64,
    /// Logical seconds spent in FAULT
    pub seconds_in_fault: f64,
    /// LED and activity totals of a streetlight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streetlight: Option<StreetlightStatistics>,
}

/// What a device senses and publishes
#[derive(Debug, Clone, Default)]
pub enum DeviceProfile {
    /// Publishes its running publish count as `sensor_value`
    #[default]
    Counter,
    /// Publishes ambient light, LED level and activity
    Streetlight(Streetlight),
}

/// Periodic sensor with a NORMAL/FAULT state machine
#[derive(Debug)]
pub struct DeviceBehavior {
    id: EntityId,
    period: Duration,
    state: EntityState,
    outbox: Box<dyn Outbox>,
    commands: Box<dyn Inbox>,
    span: Span,
    profile: DeviceProfile,
    next_tick: SimTime,
    sequence: u64,
    readings_published: u64,
    fault_reports: u64,
    publish_dropped: u64,
    commands_received: u64,
    transitions: Vec<(SimTime, EntityState)>,
    ended_at: Option<SimTime>,
    ended: bool,
}

impl DeviceBehavior {
    /// Device ticking every `period`, publishing to `outbox` and reading `commands`
    pub fn new(
        id: EntityId,
        period: Duration,
        outbox: Box<dyn Outbox>,
        commands: Box<dyn Inbox>,
        span: Span,
    ) -> Self {
        Self {
            id,
            period,
            state: EntityState::Normal,
            outbox,
            commands,
            span,
            profile: DeviceProfile::Counter,
            next_tick: SimTime::ZERO,
            sequence: 0,
            readings_published: 0,
            fault_reports: 0,
            publish_dropped: 0,
            commands_received: 0,
            transitions: Vec::new(),
            ended_at: None,
            ended: false,
        }
    }

    /// Replace what the device senses
    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Device id
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// Streetlight state, for streetlight devices
    pub fn streetlight(&self) -> Option<&Streetlight> {
        match &self.profile {
            DeviceProfile::Streetlight(light) => Some(light),
            DeviceProfile::Counter => None,
        }
    }

    /// Current state
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Sensor readings accepted by the publish interface
    pub fn published_count(&self) -> u64 {
        self.readings_published
    }

    /// Fault reports accepted by the publish interface
    pub fn fault_reports(&self) -> u64 {
        self.fault_reports
    }

    /// Every state change with its logical time, starting with NORMAL at start
    pub fn transitions(&self) -> &[(SimTime, EntityState)] {
        &self.transitions
    }

    /// State the device was in at `at`
    pub fn state_at(&self, at: SimTime) -> EntityState {
        self.transitions
            .iter()
            .take_while(|(t, _)| *t <= at)
            .last()
            .map(|(_, state)| *state)
            .unwrap_or(EntityState::Normal)
    }

    fn enter(&mut self, now: SimTime, state: EntityState) {
        self.state = state;
        self.transitions.push((now, state));
    }

    fn publish(&mut self, message: Message) -> bool {
        let accepted = self.outbox.publish(message);
        if !accepted {
            self.publish_dropped += 1;
        }
        accepted
    }

    /// Drain the configure stream; true if a RESUME was among the commands
    fn drain_commands(&mut self) -> bool {
        let mut resume = false;
        for inbound in self.commands.drain() {
            match inbound.message {
                Message::Command { command, .. } => {
                    self.commands_received += 1;
                    match command {
                        Command::Resume => resume = true,
                        Command::Other(other) => debug!(from = %inbound.from, command = %other, "Unhandled command"),
                    }
                }
                other => warn!(from = %inbound.from, kind = other.kind(), "Non-command message on configure stream"),
            }
        }
        resume
    }

    fn tick(&mut self, now: SimTime) {
        match self.state {
            EntityState::Normal => {
                let reading = match &mut self.profile {
                    DeviceProfile::Counter => Message::sensor_reading(&self.id, self.sequence as f64),
                    DeviceProfile::Streetlight(light) => {
                        light.on_tick(now);
                        light.reading(&self.id, false)
                    }
                };
                self.sequence += 1;
                if self.publish(reading) {
                    self.readings_published += 1;
                } else {
                    warn!(sequence = self.sequence, "Sensor reading dropped");
                }
                if self.drain_commands() {
                    debug!("RESUME ignored while NORMAL");
                }
            }
            EntityState::Fault => {
                if self.drain_commands() {
                    self.enter(now, EntityState::Normal);
                    info!(at = %now, "Resumed after fault");
                }
            }
        }
    }

    fn on_interrupt(&mut self, now: SimTime, cause: &str) -> SimulationResult<()> {
        if cause != DEFAULT_FAULT_CAUSE || self.state == EntityState::Fault {
            return Err(SimulationError::invalid_transition(self.id.as_str(), self.state, cause));
        }
        self.enter(now, EntityState::Fault);
        info!(at = %now, "Entered FAULT");
        if let DeviceProfile::Streetlight(light) = &mut self.profile {
            light.switch_off(now);
        }
        if self.publish(Message::fault_status(&self.id)) {
            self.fault_reports += 1;
        } else {
            warn!("Fault report dropped");
        }
        // Commands queued before the fault cannot be answers to it
        if self.drain_commands() {
            debug!("Discarded RESUME sent before the fault");
        }
        Ok(())
    }

    /// Brighten on activity and, for the light's own sensor, alert the neighbours
    ///
    /// Activity is ignored in FAULT. Devices without a streetlight profile
    /// cannot handle it.
    fn on_activity(&mut self, ctx: &mut ProcessContext<'_>, now: SimTime, cause: &str) -> SimulationResult<()> {
        let DeviceProfile::Streetlight(light) = &mut self.profile else {
            return Err(SimulationError::invalid_transition(self.id.as_str(), self.state, cause));
        };
        if self.state == EntityState::Fault {
            debug!(cause, "Activity ignored while in FAULT");
            return Ok(());
        }

        let own_sensor = cause == ACTIVITY_DETECTED;
        if !light.on_activity(now, own_sensor) || !own_sensor {
            return Ok(());
        }
        let mut alerted = 0;
        for neighbour in light.neighbours() {
            match ctx.find(neighbour.as_str()) {
                Some(pid) => {
                    ctx.interrupt(pid, ACTIVITY_IN_NEIGHBOURHOOD)?;
                    alerted += 1;
                }
                None => warn!(%neighbour, "Neighbouring streetlight is not running"),
            }
        }
        light.alerted(alerted);
        debug!(at = %now, alerted, "Activity detected");

        let reading = light.reading(&self.id, true);
        if self.publish(reading) {
            self.readings_published += 1;
        } else {
            warn!("Activity reading dropped");
        }
        Ok(())
    }

    /// Wait for the next periodic tick; a tick displaced by the interrupt runs now
    fn wait_for_tick(&mut self, now: SimTime) -> Step {
        if self.next_tick <= now {
            self.tick(now);
            self.next_tick = now + self.period;
        }
        Step::Wait(self.next_tick - now)
    }

    /// Totals for the run statistics
    pub fn statistics(&self) -> DeviceStatistics {
        let end = self.ended_at.or_else(|| self.transitions.last().map(|(t, _)| *t)).unwrap_or(SimTime::ZERO);
        let mut in_fault = Duration::ZERO;
        let mut fault_since = None;
        for (at, state) in &self.transitions {
            match (state, fault_since) {
                (EntityState::Fault, None) => fault_since = Some(*at),
                (EntityState::Normal, Some(since)) => {
                    in_fault += *at - since;
                    fault_since = None;
                }
                _ => {}
            }
        }
        if let Some(since) = fault_since {
            in_fault += end - since;
        }

        DeviceStatistics {
            id: self.id.clone(),
            final_state: self.state,
            readings_published: self.readings_published,
            fault_reports: self.fault_reports,
            publish_dropped: self.publish_dropped,
            faults: self.transitions.iter().filter(|(_, s)| *s == EntityState::Fault).count() as u64,
            resumes: self.transitions.iter().skip(1).filter(|(_, s)| *s == EntityState::Normal).count() as u64,
            commands_received: self.commands_received,
            seconds_in_fault: in_fault.as_secs_f64(),
            streetlight: self.streetlight().map(Streetlight::statistics),
        }
    }

    /// Record the logical end of the run for fault-time accounting
    pub fn mark_end(&mut self, at: SimTime) {
        self.ended_at = Some(at);
    }
}

impl Process for DeviceBehavior {
    fn name(&self) -> &str {
        self.id.as_str()
    }

    fn resume(&mut self, ctx: &mut ProcessContext<'_>, wake: Wake) -> SimulationResult<Step> {
        let _guard = self.span.clone().entered();
        let now = ctx.now();
        match wake {
            Wake::Start => {
                self.transitions.push((now, EntityState::Normal));
                debug!(period_ms = self.period.as_millis() as u64, "Device started");
                self.tick(now);
            }
            Wake::Timeout => self.tick(now),
            Wake::Interrupt(interrupt) => match interrupt.cause.as_str() {
                ACTIVITY_DETECTED | ACTIVITY_IN_NEIGHBOURHOOD => {
                    self.on_activity(ctx, now, &interrupt.cause)?;
                    return Ok(self.wait_for_tick(now));
                }
                cause => self.on_interrupt(now, cause)?,
            },
        }
        self.next_tick = now + self.period;
        Ok(Step::Wait(self.period))
    }

    fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        let _guard = self.span.clone().entered();
        self.outbox.stop();
        self.commands.stop();
        info!(
            state = %self.state,
            readings = self.readings_published,
            fault_reports = self.fault_reports,
            dropped = self.publish_dropped,
            "Device finished"
        );
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
    use crate::messaging::{LocalInbox, LocalOutbox};
    use crate::simulation::{Clock, Scheduler};

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    fn device(outbox: &LocalOutbox, inbox: &LocalInbox) -> DeviceBehavior {
        DeviceBehavior::new(
            id("dev0"),
            DEFAULT_DEVICE_PERIOD,
            Box::new(outbox.clone()),
            Box::new(inbox.clone()),
            Span::none(),
        )
    }

    #[test]
    fn test_sensor_values_count_up() {
        let outbox = LocalOutbox::new();
        let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
        let pid = scheduler.add(device(&outbox, &LocalInbox::new()));
        scheduler.run_until(SimTime::from_millis(3000)).unwrap();

        let values: Vec<f64> = outbox
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::SensorReading { sensor_value, .. } => Some(sensor_value),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0]);
        assert_eq!(scheduler.process::<DeviceBehavior>(pid).unwrap().published_count(), 3);
    }

    #[test]
    fn test_unknown_interrupt_cause_is_rejected() {
        let mut dev = device(&LocalOutbox::new(), &LocalInbox::new());
        let err = dev.on_interrupt(SimTime::ZERO, "REBOOT").unwrap_err();
        assert!(matches!(err, SimulationError::InvalidTransition { .. }));
        assert_eq!(dev.state(), EntityState::Normal);
    }

    #[test]
    fn test_stale_resume_does_not_clear_new_fault() {
        let inbox = LocalInbox::new();
        let mut dev = device(&LocalOutbox::new(), &inbox);
        inbox.deliver(Message::command(&id("app0"), Command::Resume));
        dev.on_interrupt(SimTime::from_millis(500), "FAULT").unwrap();
        assert_eq!(dev.state(), EntityState::Fault);

        dev.tick(SimTime::from_millis(1500));
        assert_eq!(dev.state(), EntityState::Fault);
    }

    #[test]
    fn test_time_in_fault_is_accounted() {
        let inbox = LocalInbox::new();
        let mut dev = device(&LocalOutbox::new(), &inbox);
        dev.transitions.push((SimTime::ZERO, EntityState::Normal));
        dev.on_interrupt(SimTime::from_millis(2000), "FAULT").unwrap();
        inbox.deliver(Message::command(&id("app0"), Command::Resume));
        dev.tick(SimTime::from_millis(5000));
        dev.on_interrupt(SimTime::from_millis(8000), "FAULT").unwrap();
        dev.mark_end(SimTime::from_millis(9000));

        let stats = dev.statistics();
        assert_eq!(stats.faults, 2);
        assert_eq!(stats.resumes, 1);
        assert_eq!(stats.seconds_in_fault, 4.0);
        assert_eq!(stats.final_state, EntityState::Fault);
    }

    #[test]
    fn test_activity_needs_a_streetlight() {
        let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
        let dev = scheduler.add(device(&LocalOutbox::new(), &LocalInbox::new()));
        let mut injector = crate::simulation::FaultInjector::new();
        injector.inject(dev, SimTime::from_millis(1500), ACTIVITY_DETECTED);
        scheduler.add(injector);

        let err = scheduler.run_until(SimTime::from_millis(3000)).unwrap_err();
        assert!(matches!(err, SimulationError::InvalidTransition { .. }));
    }

    #[test]
    fn test_activity_keeps_the_tick_schedule() {
        use crate::entity::AmbientLight;
        let outbox = LocalOutbox::new();
        let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
        let light = Streetlight::new(AmbientLight::new(0.0), Vec::new());
        let dev = scheduler.add(device(&outbox, &LocalInbox::new()).with_profile(DeviceProfile::Streetlight(light)));
        let mut injector = crate::simulation::FaultInjector::new();
        injector.inject(dev, SimTime::from_millis(1500), ACTIVITY_DETECTED);
        injector.inject(dev, SimTime::from_millis(3000), ACTIVITY_DETECTED);
        scheduler.add(injector);

        scheduler.run_until(SimTime::from_millis(5000)).unwrap();

        let activity: Vec<bool> = outbox
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::StreetlightReading { activity_detected, .. } => Some(activity_detected),
                _ => None,
            })
            .collect();
        // Ticks at 0..4 plus one reading per activity; the tick displaced at 3s still runs
        assert_eq!(activity, vec![false, false, true, false, true, false, false]);
        let device = scheduler.process::<DeviceBehavior>(dev).unwrap();
        assert_eq!(device.published_count(), 7);
        assert_eq!(device.statistics().streetlight.unwrap().activity_detected, 2);
    }

    #[test]
    fn test_end_stops_interfaces_once() {
        let outbox = LocalOutbox::new();
        let inbox = LocalInbox::new();
        let mut dev = device(&outbox, &inbox);
        dev.end();
        dev.end();
        assert!(outbox.is_stopped());
        assert!(inbox.is_stopped());
    }
}
