//! Tests for device and app behaviors under the logical-time scheduler
//!
//! Behaviors are wired to in-process ports so every test runs in pure logical
//! time without a broker or worker threads.

use iot_middleware_testbed::entity::{
    AmbientLight, AppBehavior, DeviceBehavior, DeviceProfile, Streetlight, ACTIVITY_DETECTED, BRIGHT_INTENSITY,
    DEFAULT_APP_PERIOD, DEFAULT_DEVICE_PERIOD, DIM_INTENSITY,
};
use iot_middleware_testbed::messaging::{
    Command, CommandOutbox, InboundMessage, LocalCommandOutbox, LocalInbox, LocalOutbox, Message,
};
use iot_middleware_testbed::simulation::{
    Clock, FaultInjector, Process, ProcessContext, ProcessId, Scheduler, SimTime, SimulationError, SimulationResult,
    StateInjector, Step, Wake,
};
use iot_middleware_testbed::types::{EntityId, EntityState};
use std::any::Any;
use std::time::Duration;
use tracing::Span;

fn id(s: &str) -> EntityId {
    EntityId::new(s).unwrap()
}

fn secs(s: u64) -> SimTime {
    SimTime::from_millis(s * 1000)
}

fn device(name: &str, outbox: &LocalOutbox, commands: &LocalInbox) -> DeviceBehavior {
    DeviceBehavior::new(
        id(name),
        DEFAULT_DEVICE_PERIOD,
        Box::new(outbox.clone()),
        Box::new(commands.clone()),
        Span::none(),
    )
}

/// Streetlights `streetlight0..count` along one street, each alerting the next `neighbours`
fn street(
    scheduler: &mut Scheduler,
    ambient: &AmbientLight,
    count: usize,
    neighbours: usize,
) -> Vec<(ProcessId, LocalOutbox)> {
    let names: Vec<EntityId> = (0..count).map(|i| id(&format!("streetlight{}", i))).collect();
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let outbox = LocalOutbox::new();
            let next = names.iter().skip(i + 1).take(neighbours).cloned().collect();
            let light = Streetlight::new(ambient.clone(), next);
            let device = device(name.as_str(), &outbox, &LocalInbox::new())
                .with_profile(DeviceProfile::Streetlight(light));
            (scheduler.add(device), outbox)
        })
        .collect()
}

fn light(scheduler: &Scheduler, pid: ProcessId) -> &Streetlight {
    scheduler.process::<DeviceBehavior>(pid).unwrap().streetlight().unwrap()
}

fn fault_reports(outbox: &LocalOutbox) -> usize {
    outbox.messages().iter().filter(|m| matches!(m, Message::FaultStatus { .. })).count()
}

/// Delivers one command into a device's command inbox at a fixed time
struct CommandAt {
    at: Duration,
    from: EntityId,
    command: Command,
    inbox: LocalInbox,
}

impl Process for CommandAt {
    fn name(&self) -> &str {
        "command-at"
    }

    fn resume(&mut self, _ctx: &mut ProcessContext<'_>, wake: Wake) -> SimulationResult<Step> {
        match wake {
            Wake::Start => Ok(Step::Wait(self.at)),
            _ => {
                self.inbox.deliver(Message::command(&self.from, self.command.clone()));
                Ok(Step::Finish)
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Carries device data to an app and app commands to a device every tick
struct Bridge {
    device: EntityId,
    device_out: LocalOutbox,
    device_commands: LocalInbox,
    app: EntityId,
    app_in: LocalInbox,
    app_commands: LocalCommandOutbox,
    forwarded_data: usize,
    forwarded_commands: usize,
}

impl Process for Bridge {
    fn name(&self) -> &str {
        "bridge"
    }

    fn resume(&mut self, _ctx: &mut ProcessContext<'_>, _wake: Wake) -> SimulationResult<Step> {
        let data = self.device_out.messages();
        for message in &data[self.forwarded_data..] {
            self.app_in.push(InboundMessage { from: self.device.clone(), stream: None, message: message.clone() });
        }
        self.forwarded_data = data.len();

        let commands = self.app_commands.commands();
        for (target, command) in &commands[self.forwarded_commands..] {
            if target == &self.device {
                self.device_commands.deliver(Message::command(&self.app, command.clone()));
            }
        }
        self.forwarded_commands = commands.len();
        Ok(Step::Wait(Duration::from_millis(250)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Test that a device publishes exactly one reading per tick before the end
#[test]
fn test_device_publishes_once_per_tick() {
    let outbox = LocalOutbox::new();
    let commands = LocalInbox::new();
    let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
    let pid = scheduler.add(device("dev0", &outbox, &commands));

    scheduler.run_until(secs(6)).unwrap();

    let values: Vec<f64> = outbox
        .messages()
        .iter()
        .map(|m| match m {
            Message::SensorReading { sensor_value, .. } => *sensor_value,
            other => panic!("unexpected message {:?}", other),
        })
        .collect();
    assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(scheduler.process::<DeviceBehavior>(pid).unwrap().published_count(), 6);
}

/// Test the FAULT round trip: interrupt at t=3, RESUME delivered at t=6
#[test]
fn test_fault_and_resume_round_trip() {
    let outbox = LocalOutbox::new();
    let commands = LocalInbox::new();
    let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
    let dev = scheduler.add(device("dev0", &outbox, &commands));
    scheduler.add(CommandAt {
        at: Duration::from_secs(6),
        from: id("app0"),
        command: Command::Resume,
        inbox: commands.clone(),
    });
    let mut injector = FaultInjector::new();
    injector.inject(dev, secs(3), "FAULT");
    scheduler.add(injector);

    scheduler.run_until(secs(10)).unwrap();

    let device = scheduler.process::<DeviceBehavior>(dev).unwrap();
    assert_eq!(device.state(), EntityState::Normal);
    assert_eq!(
        device.transitions(),
        &[(SimTime::ZERO, EntityState::Normal), (secs(3), EntityState::Fault), (secs(6), EntityState::Normal)]
    );
    assert_eq!(device.state_at(secs(4)), EntityState::Fault);
    assert_eq!(fault_reports(&outbox), 1);

    // Readings at 0, 1, 2 before the fault and 7, 8, 9 after the resume
    assert_eq!(device.published_count(), 6);
    let stats = device.statistics();
    assert_eq!(stats.faults, 1);
    assert_eq!(stats.resumes, 1);
    assert_eq!(stats.seconds_in_fault, 3.0);
}

/// Test that a second fault while already in FAULT aborts the run
#[test]
fn test_nested_fault_is_an_error() {
    let outbox = LocalOutbox::new();
    let commands = LocalInbox::new();
    let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
    let dev = scheduler.add(device("dev0", &outbox, &commands));
    let mut injector = FaultInjector::new();
    injector.inject(dev, secs(3), "FAULT").inject(dev, secs(4), "FAULT");
    scheduler.add(injector);

    let err = scheduler.run_until(secs(10)).unwrap_err();

    match err {
        SimulationError::InvalidTransition { entity, state, cause } => {
            assert_eq!(entity, "dev0");
            assert_eq!(state, EntityState::Fault);
            assert_eq!(cause, "FAULT");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(fault_reports(&outbox), 1);
}

/// Test that an unknown interrupt cause is rejected
#[test]
fn test_unknown_interrupt_cause_is_an_error() {
    let outbox = LocalOutbox::new();
    let commands = LocalInbox::new();
    let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
    let dev = scheduler.add(device("dev0", &outbox, &commands));
    let mut injector = FaultInjector::new();
    injector.inject(dev, secs(2), "REBOOT");
    scheduler.add(injector);

    let err = scheduler.run_until(secs(5)).unwrap_err();

    assert_eq!(err.category(), "Behavior");
    assert_eq!(fault_reports(&outbox), 0);
}

/// Test that a RESUME arriving while NORMAL changes nothing
#[test]
fn test_resume_while_normal_is_ignored() {
    let outbox = LocalOutbox::new();
    let commands = LocalInbox::new();
    let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
    let dev = scheduler.add(device("dev0", &outbox, &commands));
    scheduler.add(CommandAt {
        at: Duration::from_millis(1500),
        from: id("app0"),
        command: Command::Resume,
        inbox: commands.clone(),
    });

    scheduler.run_until(secs(4)).unwrap();

    let device = scheduler.process::<DeviceBehavior>(dev).unwrap();
    assert_eq!(device.transitions().len(), 1);
    assert_eq!(device.statistics().commands_received, 1);
    assert_eq!(device.published_count(), 4);
}

/// Test that a controlling app brings a faulty device back without outside help
#[test]
fn test_app_resumes_faulty_device() {
    let device_out = LocalOutbox::new();
    let device_commands = LocalInbox::new();
    let app_in = LocalInbox::new();
    let app_commands = LocalCommandOutbox::new();

    let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
    let dev = scheduler.add(device("dev0", &device_out, &device_commands));
    let app = scheduler.add(AppBehavior::new(
        id("app0"),
        DEFAULT_APP_PERIOD,
        vec![id("dev0")],
        vec![id("dev0")],
        Box::new(app_in.clone()),
        Box::new(app_commands.clone()),
        Span::none(),
    ));
    scheduler.add(Bridge {
        device: id("dev0"),
        device_out: device_out.clone(),
        device_commands: device_commands.clone(),
        app: id("app0"),
        app_in: app_in.clone(),
        app_commands: app_commands.clone(),
        forwarded_data: 0,
        forwarded_commands: 0,
    });
    let mut injector = FaultInjector::new();
    injector.inject(dev, secs(3), "FAULT");
    scheduler.add(injector);

    scheduler.run_until(secs(8)).unwrap();
    scheduler.end_all();

    let device = scheduler.process::<DeviceBehavior>(dev).unwrap();
    assert_eq!(device.state(), EntityState::Normal);
    assert_eq!(device.state_at(secs(3)), EntityState::Fault);
    assert_eq!(device.statistics().resumes, 1);

    let app = scheduler.process::<AppBehavior>(app).unwrap();
    assert_eq!(app.resumes_sent(), 1);
    assert_eq!(app.device(&id("dev0")).unwrap().fault_reports, 1);
    assert!(app.suspected().is_empty());
    assert_eq!(app_commands.commands(), vec![(id("dev0"), Command::Resume)]);

    assert!(device_out.is_stopped());
    assert!(app_commands.is_stopped());
    assert!(!CommandOutbox::send_command(&app_commands, &id("dev0"), Command::Resume));
}

/// Test that a fault report from a device the app cannot command is only counted
#[test]
fn test_app_does_not_command_read_only_devices() {
    let app_in = LocalInbox::new();
    let app_commands = LocalCommandOutbox::new();
    let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
    let app = scheduler.add(AppBehavior::new(
        id("app0"),
        DEFAULT_APP_PERIOD,
        vec![id("dev0")],
        Vec::new(),
        Box::new(app_in.clone()),
        Box::new(app_commands.clone()),
        Span::none(),
    ));
    app_in.deliver(Message::fault_status(&id("dev0")));

    scheduler.run_until(secs(1)).unwrap();

    let stats = scheduler.process::<AppBehavior>(app).unwrap().statistics();
    assert_eq!(stats.uncontrolled_faults, 1);
    assert_eq!(stats.resumes_sent, 0);
    assert!(app_commands.commands().is_empty());
}

/// Test that a device period below the clock resolution still lets the run finish
#[test]
fn test_sub_millisecond_device_period_terminates() {
    let outbox = LocalOutbox::new();
    let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
    let pid = scheduler.add(DeviceBehavior::new(
        id("dev0"),
        Duration::from_micros(500),
        Box::new(outbox.clone()),
        Box::new(LocalInbox::new()),
        Span::none(),
    ));

    scheduler.run_until(SimTime::from_millis(3)).unwrap();

    assert_eq!(scheduler.process::<DeviceBehavior>(pid).unwrap().published_count(), 3);
    assert_eq!(scheduler.now(), SimTime::from_millis(3));
}

/// Test the LED policy: off in daylight, dim in the dark, bright on activity
#[test]
fn test_streetlight_led_follows_ambient_and_activity() {
    let ambient = AmbientLight::default();
    let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
    let lights = street(&mut scheduler, &ambient, 1, 0);
    let (pid, outbox) = &lights[0];
    // Devices tick before the injector, so each tick sees the previous step's level
    let levels = vec![0.9, 0.1, 0.9, 0.1, 0.1];
    scheduler.add(StateInjector::new(DEFAULT_DEVICE_PERIOD, ambient.clone(), levels, Vec::new(), 0.0, Some(1)));
    let mut injector = FaultInjector::new();
    injector.inject(*pid, SimTime::from_millis(4500), ACTIVITY_DETECTED);
    scheduler.add(injector);

    scheduler.run_until(secs(5)).unwrap();

    let light = light(&scheduler, *pid);
    assert_eq!(
        light.led_log(),
        &[
            (secs(2), DIM_INTENSITY),
            (secs(3), 0.0),
            (secs(4), DIM_INTENSITY),
            (SimTime::from_millis(4500), BRIGHT_INTENSITY)
        ]
    );
    match outbox.messages().last() {
        Some(Message::StreetlightReading { led_light_intensity, activity_detected, .. }) => {
            assert_eq!(*led_light_intensity, BRIGHT_INTENSITY);
            assert!(*activity_detected);
        }
        other => panic!("unexpected message {:?}", other),
    }
}

/// Test that activity brightens the next N streetlights and no others
#[test]
fn test_activity_propagates_to_neighbours() {
    let ambient = AmbientLight::new(0.0);
    let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
    let lights = street(&mut scheduler, &ambient, 4, 2);
    let mut injector = FaultInjector::new();
    injector.inject(lights[0].0, SimTime::from_millis(1500), ACTIVITY_DETECTED);
    scheduler.add(injector);

    scheduler.run_until(SimTime::from_millis(1600)).unwrap();

    let intensities: Vec<f64> = lights.iter().map(|(pid, _)| light(&scheduler, *pid).led_intensity()).collect();
    assert_eq!(intensities, vec![BRIGHT_INTENSITY, BRIGHT_INTENSITY, BRIGHT_INTENSITY, DIM_INTENSITY]);

    let first = light(&scheduler, lights[0].0).statistics();
    assert_eq!(first.activity_detected, 1);
    assert_eq!(first.alerts_sent, 2);
    let second = light(&scheduler, lights[1].0).statistics();
    assert_eq!(second.neighbour_alerts, 1);
    assert_eq!(second.alerts_sent, 0);
    assert_eq!(light(&scheduler, lights[3].0).statistics().neighbour_alerts, 0);

    // Alerted neighbours dim again after the timeout
    scheduler.run_until(secs(4)).unwrap();
    assert_eq!(light(&scheduler, lights[1].0).led_intensity(), DIM_INTENSITY);
    assert_eq!(light(&scheduler, lights[1].0).statistics().auto_dimmed, 1);
}

/// Test that daylight activity is counted but neither brightens nor alerts
#[test]
fn test_daylight_activity_is_not_propagated() {
    let ambient = AmbientLight::new(1.0);
    let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
    let lights = street(&mut scheduler, &ambient, 2, 1);
    let mut injector = FaultInjector::new();
    injector.inject(lights[0].0, SimTime::from_millis(1500), ACTIVITY_DETECTED);
    scheduler.add(injector);

    scheduler.run_until(secs(3)).unwrap();

    let first = light(&scheduler, lights[0].0);
    assert!(!first.is_on());
    assert_eq!(first.statistics().activity_detected, 1);
    assert_eq!(first.statistics().alerts_sent, 0);
    assert_eq!(light(&scheduler, lights[1].0).statistics().neighbour_alerts, 0);
}

/// Test that a fault switches the LED off and activity during the fault is ignored
#[test]
fn test_faulty_streetlight_stays_dark() {
    let ambient = AmbientLight::new(0.0);
    let mut scheduler = Scheduler::new(Clock::as_fast_as_possible());
    let lights = street(&mut scheduler, &ambient, 2, 1);
    let (pid, outbox) = &lights[0];
    let mut injector = FaultInjector::new();
    injector.inject(*pid, secs(2), "FAULT").inject(*pid, secs(3), ACTIVITY_DETECTED);
    scheduler.add(injector);

    scheduler.run_until(secs(5)).unwrap();

    let first = light(&scheduler, *pid);
    assert!(!first.is_on());
    assert_eq!(first.led_intensity(), 0.0);
    assert_eq!(first.statistics().activity_detected, 0);
    assert_eq!(light(&scheduler, lights[1].0).statistics().neighbour_alerts, 0);
    assert_eq!(fault_reports(outbox), 1);
}
