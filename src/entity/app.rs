//! App behavior
//!
//! Apps read device data, answer fault reports from devices they control with
//! `RESUME`, and flag devices that go quiet for too long.

use crate::messaging::{Command, CommandOutbox, Inbox, Message};
use crate::simulation::{Process, ProcessContext, SimTime, SimulationError, SimulationResult, Step, Wake};
use crate::types::{EntityId, EntityState};
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn, Span};

/// Default app tick period
pub const DEFAULT_APP_PERIOD: Duration = Duration::from_millis(500);

/// Default time without data before a device is suspected
pub const DEFAULT_SILENCE_THRESHOLD: Duration = Duration::from_secs(5);

/// What an app knows about one device
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceView {
    /// Sensor readings received
    pub readings: u64,
    /// Most recent sensor value; the LED level for streetlights
    pub last_value: Option<f64>,
    /// Most recent ambient level reported by a streetlight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambient_light: Option<f64>,
    /// Streetlight samples triggered by activity
    pub activity_reports: u64,
    /// Logical time of the most recent message
    pub last_seen: Option<SimTime>,
    /// Fault reports received
    pub fault_reports: u64,
    /// Whether the device has been silent past the threshold
    pub suspected: bool,
}

/// Totals reported by an app at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppStatistics {
    /// App id
    pub id: EntityId,
    /// Messages drained from the subscribe interface
    pub messages_received: u64,
    /// RESUME commands accepted by the send-commands interface
    pub resumes_sent: u64,
    /// Commands the send-commands interface refused
    pub commands_dropped: u64,
    /// Fault reports from devices this app cannot command
    pub uncontrolled_faults: u64,
    /// Per-device view at the end of the run
    pub devices: BTreeMap<EntityId, DeviceView>,
}

/// Consumer and controller of devices
#[derive(Debug)]
pub struct AppBehavior {
    id: EntityId,
    period: Duration,
    silence_threshold: Duration,
    controlled: BTreeSet<EntityId>,
    inbox: Box<dyn Inbox>,
    commands: Box<dyn CommandOutbox>,
    span: Span,
    devices: BTreeMap<EntityId, DeviceView>,
    started_at: SimTime,
    messages_received: u64,
    resumes_sent: u64,
    commands_dropped: u64,
    uncontrolled_faults: u64,
    ended: bool,
}

impl AppBehavior {
    /// App ticking every `period`
    ///
    /// `readable` devices are watched for silence from the start; `controlled`
    /// devices are the ones this app may send commands to.
    pub fn new(
        id: EntityId,
        period: Duration,
        readable: impl IntoIterator<Item = EntityId>,
        controlled: impl IntoIterator<Item = EntityId>,
        inbox: Box<dyn Inbox>,
        commands: Box<dyn CommandOutbox>,
        span: Span,
    ) -> Self {
        Self {
            id,
            period,
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            controlled: controlled.into_iter().collect(),
            inbox,
            commands,
            span,
            devices: readable.into_iter().map(|id| (id, DeviceView::default())).collect(),
            started_at: SimTime::ZERO,
            messages_received: 0,
            resumes_sent: 0,
            commands_dropped: 0,
            uncontrolled_faults: 0,
            ended: false,
        }
    }

    /// Override the silence threshold
    pub fn with_silence_threshold(mut self, threshold: Duration) -> Self {
        self.silence_threshold = threshold;
        self
    }

    /// App id
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// View of one device
    pub fn device(&self, id: &EntityId) -> Option<&DeviceView> {
        self.devices.get(id)
    }

    /// Devices currently suspected of being faulty
    pub fn suspected(&self) -> Vec<EntityId> {
        self.devices.iter().filter(|(_, view)| view.suspected).map(|(id, _)| id.clone()).collect()
    }

    /// RESUME commands sent so far
    pub fn resumes_sent(&self) -> u64 {
        self.resumes_sent
    }

    fn handle_fault_report(&mut self, device: &EntityId, fault_type: &str) {
        if !self.controlled.contains(device) {
            self.uncontrolled_faults += 1;
            warn!(%device, fault_type, "Fault report from a device this app cannot command");
            return;
        }
        if self.commands.send_command(device, Command::Resume) {
            self.resumes_sent += 1;
            info!(%device, fault_type, "Sent RESUME");
        } else {
            self.commands_dropped += 1;
            warn!(%device, "RESUME dropped");
        }
    }

    fn tick(&mut self, now: SimTime) {
        for inbound in self.inbox.drain() {
            self.messages_received += 1;
            let device = inbound.from;
            let view = self.devices.entry(device.clone()).or_default();
            view.last_seen = Some(now);
            if view.suspected {
                view.suspected = false;
                info!(%device, "Device heard from again");
            }
            match inbound.message {
                Message::SensorReading { sensor_value, .. } => {
                    view.readings += 1;
                    view.last_value = Some(sensor_value);
                }
                Message::StreetlightReading {
                    ambient_light_intensity,
                    led_light_intensity,
                    activity_detected,
                    ..
                } => {
                    view.readings += 1;
                    view.last_value = Some(led_light_intensity);
                    view.ambient_light = Some(ambient_light_intensity);
                    if activity_detected {
                        view.activity_reports += 1;
                        debug!(%device, "Activity reported");
                    }
                }
                Message::FaultStatus { fault_type, .. } => {
                    view.fault_reports += 1;
                    self.handle_fault_report(&device, &fault_type);
                }
                Message::Command { command, .. } => {
                    debug!(from = %device, %command, "Ignoring command addressed to an app");
                }
            }
        }
        self.check_silence(now);
    }

    fn check_silence(&mut self, now: SimTime) {
        for (device, view) in self.devices.iter_mut() {
            let silent_for = now - view.last_seen.unwrap_or(self.started_at);
            let silent = silent_for >= self.silence_threshold;
            if silent && !view.suspected {
                warn!(%device, silent_secs = silent_for.as_secs_f64(), "Device suspected faulty");
            }
            view.suspected = silent;
        }
    }

    /// Totals for the run statistics
    pub fn statistics(&self) -> AppStatistics {
        AppStatistics {
            id: self.id.clone(),
            messages_received: self.messages_received,
            resumes_sent: self.resumes_sent,
            commands_dropped: self.commands_dropped,
            uncontrolled_faults: self.uncontrolled_faults,
            devices: self.devices.clone(),
        }
    }
}

impl Process for AppBehavior {
    fn name(&self) -> &str {
        self.id.as_str()
    }

    fn resume(&mut self, ctx: &mut ProcessContext<'_>, wake: Wake) -> SimulationResult<Step> {
        let _guard = self.span.clone().entered();
        let now = ctx.now();
        match wake {
            Wake::Start => {
                self.started_at = now;
                debug!(
                    period_ms = self.period.as_millis() as u64,
                    controlled = self.controlled.len(),
                    "App started"
                );
                self.tick(now);
            }
            Wake::Timeout => self.tick(now),
            Wake::Interrupt(interrupt) => {
                return Err(SimulationError::invalid_transition(
                    self.id.as_str(),
                    EntityState::Normal,
                    interrupt.cause,
                ));
            }
        }
        Ok(Step::Wait(self.period))
    }

    fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        let _guard = self.span.clone().entered();
        self.inbox.stop();
        self.commands.stop();
        info!(
            received = self.messages_received,
            resumes = self.resumes_sent,
            suspected = self.suspected().len(),
            "App finished"
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
    use crate::messaging::{LocalCommandOutbox, LocalInbox};

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    fn app(inbox: &LocalInbox, commands: &LocalCommandOutbox) -> AppBehavior {
        AppBehavior::new(
            id("app0"),
            DEFAULT_APP_PERIOD,
            vec![id("dev0"), id("dev1")],
            vec![id("dev0")],
            Box::new(inbox.clone()),
            Box::new(commands.clone()),
            Span::none(),
        )
    }

    #[test]
    fn test_resume_only_controlled_devices() {
        let inbox = LocalInbox::new();
        let commands = LocalCommandOutbox::new();
        let mut app = app(&inbox, &commands);

        inbox.deliver(Message::fault_status(&id("dev0")));
        inbox.deliver(Message::fault_status(&id("dev1")));
        app.tick(SimTime::from_millis(500));

        assert_eq!(commands.commands(), vec![(id("dev0"), Command::Resume)]);
        let stats = app.statistics();
        assert_eq!(stats.resumes_sent, 1);
        assert_eq!(stats.uncontrolled_faults, 1);
    }

    #[test]
    fn test_readings_update_device_view() {
        let inbox = LocalInbox::new();
        let mut app = app(&inbox, &LocalCommandOutbox::new());
        inbox.deliver(Message::sensor_reading(&id("dev0"), 3.0));
        inbox.deliver(Message::sensor_reading(&id("dev0"), 4.0));
        app.tick(SimTime::from_millis(1000));

        let view = app.device(&id("dev0")).unwrap();
        assert_eq!(view.readings, 2);
        assert_eq!(view.last_value, Some(4.0));
        assert_eq!(view.last_seen, Some(SimTime::from_millis(1000)));
    }

    #[test]
    fn test_streetlight_readings_update_device_view() {
        let inbox = LocalInbox::new();
        let mut app = app(&inbox, &LocalCommandOutbox::new());
        inbox.deliver(Message::streetlight_reading(&id("dev1"), 0.3, 0.2, false));
        inbox.deliver(Message::streetlight_reading(&id("dev1"), 0.3, 1.0, true));
        app.tick(SimTime::from_millis(1000));

        let view = app.device(&id("dev1")).unwrap();
        assert_eq!(view.readings, 2);
        assert_eq!(view.last_value, Some(1.0));
        assert_eq!(view.ambient_light, Some(0.3));
        assert_eq!(view.activity_reports, 1);
    }

    #[test]
    fn test_silent_devices_are_suspected_until_heard_from() {
        let inbox = LocalInbox::new();
        let mut app = app(&inbox, &LocalCommandOutbox::new()).with_silence_threshold(Duration::from_secs(2));

        inbox.deliver(Message::sensor_reading(&id("dev0"), 0.0));
        app.tick(SimTime::from_millis(1000));
        app.tick(SimTime::from_millis(2500));
        assert_eq!(app.suspected(), vec![id("dev1")]);

        app.tick(SimTime::from_millis(3000));
        assert_eq!(app.suspected(), vec![id("dev0"), id("dev1")]);

        inbox.deliver(Message::sensor_reading(&id("dev1"), 0.0));
        app.tick(SimTime::from_millis(3500));
        assert_eq!(app.suspected(), vec![id("dev0")]);
    }

    #[test]
    fn test_interrupting_an_app_is_invalid() {
        use crate::simulation::{Clock, Scheduler};
        let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
        let pid = scheduler.add(app(&LocalInbox::new(), &LocalCommandOutbox::new()));
        let mut injector = crate::simulation::FaultInjector::new();
        injector.inject(pid, SimTime::from_millis(700), "FAULT");
        scheduler.add(injector);

        let err = scheduler.run_until(SimTime::from_millis(1000)).unwrap_err();
        assert!(matches!(err, SimulationError::InvalidTransition { .. }));
    }
}
