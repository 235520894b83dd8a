//! Main simulation orchestrator
//!
//! This module wires registered entities to their interfaces, runs the
//! scheduler and tears everything down with a drain-and-join barrier.

use crate::broker::BrokerConnector;
use crate::entity::{street_neighbours, AmbientLight, AppBehavior, DeviceBehavior, DeviceProfile, Streetlight};
use crate::messaging::{
    InterfaceConfig, InterfaceControl, InterfaceKind, PublishInterface, ReceiveCommandsInterface,
    SendCommandsInterface, SubscribeInterface, WorkerHandle,
};
use crate::permissions::{deregister_entities, setup_plan, RegisteredEntities, SetupPlan, SystemDescription};
use crate::simulation::{
    ambient_ramp, Clock, FaultInjector, FaultPlan, ProcessId, RunContext, RunStatistics, Scheduler, SimTime,
    SimulationError, SimulationResult, StateInjector, TeardownReport,
};
use crate::types::{DeviceModel, EntityId, EntityKind, SimulationConfig};
use chrono::Utc;
use std::collections::HashMap;
use tokio::runtime::Handle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn, Instrument};

/// Main orchestrator that coordinates setup, the run and teardown
#[derive(Debug)]
pub struct SimulationOrchestrator {
    /// Configuration for the run
    config: SimulationConfig,
    /// Description supplied directly instead of through the config
    description: Option<SystemDescription>,
    /// Run id and root span
    run: RunContext,
}

/// Processes and workers created for one run
#[derive(Debug, Default)]
struct Wiring {
    pids: HashMap<EntityId, ProcessId>,
    devices: Vec<ProcessId>,
    apps: Vec<ProcessId>,
    workers: Vec<WorkerHandle>,
    controls: Vec<InterfaceControl>,
    street: Option<Street>,
}

/// Streetlights of a run: the shared ambient light and the devices in street order
#[derive(Debug)]
struct Street {
    ambient: AmbientLight,
    order: Vec<EntityId>,
    neighbours: usize,
}

impl Street {
    fn profile(&self, id: &EntityId) -> DeviceProfile {
        let neighbours = street_neighbours(&self.order, id, self.neighbours);
        DeviceProfile::Streetlight(Streetlight::new(self.ambient.clone(), neighbours))
    }
}

impl Wiring {
    fn keep(&mut self, worker: Option<WorkerHandle>) {
        if let Some(worker) = worker {
            self.controls.push(worker.control.clone());
            self.workers.push(worker);
        }
    }
}

fn label(control: &InterfaceControl) -> String {
    format!("{}:{:?}", control.owner(), control.kind())
}

impl SimulationOrchestrator {
    /// Create an orchestrator for a validated configuration
    #[instrument(skip(config), fields(simulation_time = config.simulation_time, delivery = %config.delivery))]
    pub fn new(config: SimulationConfig) -> SimulationResult<Self> {
        config.validate()?;
        let run = RunContext::new();
        info!(run_id = %run.run_id(), "Initializing testbed orchestrator");
        Ok(Self { config, description: None, run })
    }

    /// Use this description instead of the configured file or a generated one
    pub fn with_description(mut self, description: SystemDescription) -> Self {
        self.description = Some(description);
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run id and root span
    pub fn run_context(&self) -> &RunContext {
        &self.run
    }

    /// The supplied description, the configured file, or a generated fully connected system
    pub fn load_description(&self) -> SimulationResult<SystemDescription> {
        if let Some(description) = &self.description {
            return Ok(description.clone());
        }
        match &self.config.system_description {
            Some(path) => {
                info!(path = %path, "Loading system description");
                Ok(SystemDescription::from_file(path)?)
            }
            None => {
                let mode = self.config.permission_mode()?;
                debug!(devices = self.config.device_count, apps = self.config.app_count, %mode, "Generating system description");
                Ok(SystemDescription::fully_connected(self.config.device_count, self.config.app_count, mode))
            }
        }
    }

    /// Resolve configured and random faults against the plan's devices
    pub fn fault_plan(&self, plan: &SetupPlan) -> SimulationResult<FaultPlan> {
        let mut faults = FaultPlan::new();
        for spec in &self.config.faults {
            let entity = EntityId::new(spec.entity.as_str())
                .map_err(|e| SimulationError::configuration_error(format!("fault {}: {}", spec, e)))?;
            match plan.kind_of(&entity) {
                Some(EntityKind::Device) => {}
                Some(EntityKind::App) => {
                    return Err(SimulationError::configuration_error(format!("fault {}: {} is an app", spec, entity)))
                }
                None => {
                    return Err(SimulationError::configuration_error(format!(
                        "fault {}: {} is not in the system description",
                        spec, entity
                    )))
                }
            }
            faults.add(entity, SimTime::from_secs_f64(spec.at), spec.cause.clone());
        }

        if self.config.random_faults > 0 {
            let devices: Vec<EntityId> = plan.of_kind(EntityKind::Device).cloned().collect();
            faults.extend(FaultPlan::random(
                &devices,
                self.config.run_length(),
                self.config.random_faults,
                self.config.seed,
            ));
        }
        Ok(faults)
    }

    /// Set up, run, and deregister everything
    ///
    /// Must be called from outside the runtime behind `runtime`.
    pub fn execute(&self, runtime: &Handle, connector: &dyn BrokerConnector) -> SimulationResult<RunStatistics> {
        let description = self.load_description()?;
        let plan = description.validate()?;
        let faults = self.fault_plan(&plan)?;

        let setup_client = connector.connect()?;
        let registered = runtime.block_on(setup_plan(setup_client.as_ref(), &plan).instrument(self.run.span().clone()))?;

        let outcome = self.run_registered(runtime, connector, &plan, &registered, faults);

        let report = runtime.block_on(deregister_entities(setup_client.as_ref(), &registered.ids()));
        if !report.is_complete() {
            warn!(failed = report.failed.len(), "Some entities could not be deregistered");
        }

        let mut statistics = outcome?;
        statistics.deregistration = Some((&report).into());
        Ok(statistics)
    }

    /// Run already registered entities
    ///
    /// Interface workers are spawned on `runtime`; the scheduler runs on the
    /// calling thread, which must not be one of the runtime's.
    pub fn run_registered(
        &self,
        runtime: &Handle,
        connector: &dyn BrokerConnector,
        plan: &SetupPlan,
        registered: &RegisteredEntities,
        faults: FaultPlan,
    ) -> SimulationResult<RunStatistics> {
        let started_at = Utc::now();
        let interface_config =
            InterfaceConfig { queue_capacity: self.config.queue_capacity, delivery: self.config.delivery_strategy()? };

        let mut scheduler = Scheduler::new(Clock::new(self.config.realtime_factor));
        let mut wiring = Wiring::default();
        if self.config.device_model()? == DeviceModel::Streetlight {
            wiring.street = Some(Street {
                ambient: AmbientLight::default(),
                order: plan.of_kind(EntityKind::Device).cloned().collect(),
                neighbours: self.config.neighbours,
            });
        }
        for entity in &plan.entities {
            self.wire_entity(
                runtime,
                connector,
                plan,
                registered,
                &interface_config,
                entity.kind,
                &entity.id,
                &mut scheduler,
                &mut wiring,
            )?;
        }

        let injector = self.wire_faults(&mut scheduler, &wiring, &faults)?;
        let states = self.wire_states(&mut scheduler, &wiring);

        let end = self.config.run_end();
        info!(
            devices = wiring.devices.len(),
            apps = wiring.apps.len(),
            faults = faults.len(),
            until = %end,
            realtime_factor = self.config.realtime_factor,
            "Starting run"
        );
        let outcome = self.run.span().in_scope(|| scheduler.run_until(end));
        if let Err(err) = &outcome {
            error!(error = %err, category = err.category(), now = %scheduler.now(), "Run aborted");
        }

        let stopped_at = scheduler.now();
        for pid in &wiring.devices {
            if let Some(device) = scheduler.process_mut::<DeviceBehavior>(*pid) {
                device.mark_end(stopped_at);
            }
        }

        let controls = std::mem::take(&mut wiring.controls);
        let teardown = self.teardown(runtime, &mut scheduler, std::mem::take(&mut wiring.workers));
        outcome?;

        let clock = scheduler.clock();
        let statistics = RunStatistics {
            run_id: self.run.run_id(),
            started_at,
            finished_at: Utc::now(),
            simulated_seconds: scheduler.now().as_secs_f64(),
            realtime_factor: clock.realtime_factor(),
            max_overshoot_ms: clock.max_overshoot().as_millis() as u64,
            overshoot_warnings: clock.overshoot_warnings(),
            events_processed: scheduler.events_processed(),
            faults_injected: injector
                .and_then(|pid| scheduler.process::<FaultInjector>(pid))
                .map_or(0, |injector| injector.delivered()),
            activities_injected: states
                .and_then(|pid| scheduler.process::<StateInjector>(pid))
                .map_or(0, StateInjector::activities_injected),
            devices: wiring
                .devices
                .iter()
                .filter_map(|pid| scheduler.process::<DeviceBehavior>(*pid))
                .map(DeviceBehavior::statistics)
                .collect(),
            apps: wiring
                .apps
                .iter()
                .filter_map(|pid| scheduler.process::<AppBehavior>(*pid))
                .map(AppBehavior::statistics)
                .collect(),
            interfaces: controls.iter().map(InterfaceControl::stats).collect(),
            teardown,
            deregistration: None,
        };
        info!(summary = %statistics.compact_summary(), "Run complete");
        Ok(statistics)
    }

    #[allow(clippy::too_many_arguments)]
    fn wire_entity(
        &self,
        runtime: &Handle,
        connector: &dyn BrokerConnector,
        plan: &SetupPlan,
        registered: &RegisteredEntities,
        interface_config: &InterfaceConfig,
        kind: EntityKind,
        id: &EntityId,
        scheduler: &mut Scheduler,
        wiring: &mut Wiring,
    ) -> SimulationResult<()> {
        let creds = registered
            .credentials(id)
            .ok_or_else(|| SimulationError::configuration_error(format!("entity {} is not registered", id)))?;
        let span = self.run.entity_span(id, kind);

        let pid = match kind {
            EntityKind::Device => {
                let mut publish = PublishInterface::spawn(
                    runtime,
                    connector,
                    creds.clone(),
                    interface_config,
                    RunContext::interface_span(&span, InterfaceKind::Publish),
                )?;
                let mut commands = ReceiveCommandsInterface::spawn(
                    runtime,
                    connector,
                    creds,
                    interface_config,
                    RunContext::interface_span(&span, InterfaceKind::ReceiveCommands),
                )?;
                wiring.keep(publish.take_worker());
                wiring.keep(commands.take_worker());

                let mut device =
                    DeviceBehavior::new(id.clone(), self.config.device_tick(), Box::new(publish), Box::new(commands), span);
                if let Some(street) = &wiring.street {
                    device = device.with_profile(street.profile(id));
                }
                let pid = scheduler.add(device);
                wiring.devices.push(pid);
                pid
            }
            EntityKind::App => {
                let mut inbox = SubscribeInterface::spawn(
                    runtime,
                    connector,
                    creds.clone(),
                    interface_config,
                    RunContext::interface_span(&span, InterfaceKind::Subscribe),
                )?;
                let mut commands = SendCommandsInterface::spawn(
                    runtime,
                    connector,
                    creds,
                    interface_config,
                    RunContext::interface_span(&span, InterfaceKind::SendCommands),
                )?;
                wiring.keep(inbox.take_worker());
                wiring.keep(commands.take_worker());

                let app = AppBehavior::new(
                    id.clone(),
                    self.config.app_tick(),
                    plan.readable_by(id),
                    plan.controlled_by(id),
                    Box::new(inbox),
                    Box::new(commands),
                    span,
                )
                .with_silence_threshold(self.config.silence_bound());
                let pid = scheduler.add(app);
                wiring.apps.push(pid);
                pid
            }
        };
        wiring.pids.insert(id.clone(), pid);
        Ok(())
    }

    fn wire_faults(
        &self,
        scheduler: &mut Scheduler,
        wiring: &Wiring,
        faults: &FaultPlan,
    ) -> SimulationResult<Option<ProcessId>> {
        if faults.is_empty() {
            return Ok(None);
        }
        let mut injector = FaultInjector::new();
        for fault in faults.faults() {
            let target = wiring
                .pids
                .get(&fault.entity)
                .ok_or_else(|| SimulationError::UnknownProcess(fault.entity.to_string()))?;
            injector.inject(*target, fault.at, fault.cause.clone());
            debug!(entity = %fault.entity, at = %fault.at, cause = %fault.cause, "Fault planned");
        }
        Ok(Some(scheduler.add(injector)))
    }

    fn wire_states(&self, scheduler: &mut Scheduler, wiring: &Wiring) -> Option<ProcessId> {
        let street = wiring.street.as_ref()?;
        let injector = StateInjector::new(
            self.config.device_tick(),
            street.ambient.clone(),
            ambient_ramp(self.config.ambient_steps),
            wiring.devices.clone(),
            self.config.activity_probability,
            self.config.seed,
        );
        debug!(streetlights = wiring.devices.len(), neighbours = street.neighbours, "State injection planned");
        Some(scheduler.add(injector))
    }

    /// Wait for outbound interfaces to drain, end every process, then join every worker
    fn teardown(&self, runtime: &Handle, scheduler: &mut Scheduler, workers: Vec<WorkerHandle>) -> TeardownReport {
        let bound = self.config.drain_bound();
        let mut report = TeardownReport::default();

        let outbound: Vec<&InterfaceControl> =
            workers.iter().map(|w| &w.control).filter(|c| c.kind().is_outbound()).collect();
        report.not_idle = runtime.block_on(async {
            let deadline = Instant::now() + bound;
            let mut not_idle = Vec::new();
            for control in outbound {
                if timeout_at(deadline, control.wait_idle()).await.is_err() {
                    warn!(interface = %label(control), pending = control.pending(), "Interface did not drain in time");
                    not_idle.push(label(control));
                }
            }
            not_idle
        });

        scheduler.end_all();

        let (unjoined, panicked) = runtime.block_on(async {
            let deadline = Instant::now() + bound;
            let mut unjoined = Vec::new();
            let mut panicked = Vec::new();
            for mut worker in workers {
                match timeout_at(deadline, &mut worker.task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) if err.is_panic() => {
                        error!(interface = %label(&worker.control), "Interface worker panicked");
                        panicked.push(label(&worker.control));
                    }
                    Ok(Err(_)) => {}
                    Err(_) => {
                        worker.task.abort();
                        warn!(interface = %label(&worker.control), "Interface worker did not finish in time");
                        unjoined.push(label(&worker.control));
                    }
                }
            }
            (unjoined, panicked)
        });
        report.unjoined = unjoined;
        report.panicked = panicked;

        if report.is_clean() {
            debug!("All interface workers drained and joined");
        }
        report
    }
}
