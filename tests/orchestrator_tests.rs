//! End-to-end tests for the simulation orchestrator
//!
//! These tests run complete setup, run and teardown cycles against the
//! in-memory broker. The orchestrator blocks on the runtime, so each test owns
//! a runtime and calls it from the test thread.

use iot_middleware_testbed::broker::{InMemoryBroker, Operation};
use iot_middleware_testbed::messaging::InterfaceKind;
use iot_middleware_testbed::permissions::SystemDescription;
use iot_middleware_testbed::simulation::{SimulationError, SimulationOrchestrator};
use iot_middleware_testbed::types::{EntityId, EntityState, FaultSpec, SimulationConfig};
use tokio::runtime::Runtime;

fn id(s: &str) -> EntityId {
    EntityId::new(s).unwrap()
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread().worker_threads(2).enable_all().build().unwrap()
}

/// Test that an app brings a faulted device back to NORMAL over the broker
#[test]
fn test_fault_is_recovered_end_to_end() {
    let runtime = runtime();
    let broker = InMemoryBroker::new();
    let config = SimulationConfig {
        device_count: 1,
        app_count: 1,
        simulation_time: 8.0,
        delivery: "push".to_string(),
        realtime_factor: 0.1,
        faults: vec![FaultSpec { entity: "dev0".into(), at: 3.0, cause: "FAULT".into() }],
        ..Default::default()
    };

    let stats = SimulationOrchestrator::new(config).unwrap().execute(runtime.handle(), &broker).unwrap();

    assert_eq!(stats.faults_injected, 1);
    let device = stats.device(&id("dev0")).unwrap();
    assert_eq!(device.faults, 1);
    assert_eq!(device.fault_reports, 1);
    assert!(device.resumes >= 1);
    assert_eq!(device.final_state, EntityState::Normal);
    assert!(stats.devices_in_fault().is_empty());

    let app = stats.app(&id("app0")).unwrap();
    assert!(app.resumes_sent >= 1);
    assert_eq!(app.devices[&id("dev0")].fault_reports, 1);

    assert!(stats.teardown.is_clean());
    let deregistration = stats.deregistration.as_ref().unwrap();
    assert_eq!(deregistration.deregistered.len(), 2);
    assert!(deregistration.failed.is_empty());
    assert!(broker.registered().is_empty());
}

/// Test that every reading a device produces is published before teardown finishes
#[test]
fn test_unpaced_run_drains_every_reading() {
    let runtime = runtime();
    let broker = InMemoryBroker::new();
    let config = SimulationConfig {
        device_count: 2,
        app_count: 1,
        simulation_time: 8.0,
        realtime_factor: 0.0,
        ..Default::default()
    };

    let stats = SimulationOrchestrator::new(config).unwrap().execute(runtime.handle(), &broker).unwrap();

    assert_eq!(stats.devices.len(), 2);
    assert_eq!(stats.apps.len(), 1);
    assert_eq!(stats.total_readings(), 16);
    for device in &stats.devices {
        assert_eq!(device.readings_published, 8);
        assert_eq!(device.final_state, EntityState::Normal);
        let publish = stats
            .interfaces
            .iter()
            .find(|i| i.owner == device.id.as_str() && i.kind == InterfaceKind::Publish)
            .unwrap();
        assert_eq!(publish.sent, 8);
        assert_eq!(publish.dropped, 0);
    }
    assert_eq!(stats.simulated_seconds, 8.0);
    assert!(stats.teardown.not_idle.is_empty());
    assert!(broker.registered().is_empty());
}

/// Test a streetlight run: activity enters every period and readings carry the LED level
#[test]
fn test_streetlight_run_injects_state() {
    let runtime = runtime();
    let broker = InMemoryBroker::new();
    let config = SimulationConfig {
        device_count: 3,
        app_count: 1,
        simulation_time: 6.0,
        realtime_factor: 0.0,
        device_model: "streetlight".to_string(),
        neighbours: 1,
        activity_probability: 1.0,
        ambient_steps: 2,
        seed: Some(7),
        ..Default::default()
    };

    let stats = SimulationOrchestrator::new(config).unwrap().execute(runtime.handle(), &broker).unwrap();

    // Activity enters at dev0 and shifts one light per second: 1 + 2 + 3 * 4
    assert_eq!(stats.activities_injected, 15);
    let seen: u64 = stats.devices.iter().map(|d| d.streetlight.as_ref().unwrap().activity_detected).sum();
    assert_eq!(seen, 15);
    let first = stats.device(&id("dev0")).unwrap().streetlight.as_ref().unwrap();
    assert!(first.brightened >= 1);
    assert!(first.alerts_sent >= 1);
    for device in &stats.devices {
        let publish = stats
            .interfaces
            .iter()
            .find(|i| i.owner == device.id.as_str() && i.kind == InterfaceKind::Publish)
            .unwrap();
        assert_eq!(publish.sent, device.readings_published);
    }
    let subscribe = stats
        .interfaces
        .iter()
        .find(|i| i.owner == "app0" && i.kind == InterfaceKind::Subscribe)
        .unwrap();
    assert_eq!(subscribe.rejected, 0);
    assert!(stats.to_string().contains("Activities Injected: 15"));
    assert!(broker.registered().is_empty());
}

/// Test that a setup failure is reported and leaves nothing registered
#[test]
fn test_setup_failure_aborts_before_the_run() {
    let runtime = runtime();
    let broker = InMemoryBroker::new();
    broker.fail_operation(Operation::Bind, None);
    let config = SimulationConfig { realtime_factor: 0.0, ..Default::default() };

    let err = SimulationOrchestrator::new(config).unwrap().execute(runtime.handle(), &broker).unwrap_err();

    assert!(matches!(err, SimulationError::SetupError(_)));
    assert_eq!(err.category(), "Setup");
    assert!(broker.registered().is_empty());
    assert_eq!(broker.calls_of(Operation::Publish), 0);
}

/// Test that a supplied description drives the run
#[test]
fn test_supplied_description_is_used() {
    let runtime = runtime();
    let broker = InMemoryBroker::new();
    let description = SystemDescription::new()
        .with_entity("thermometer")
        .with_entity("lamp")
        .with_entity("dashboard")
        .with_permission("dashboard", "thermometer", "read")
        .with_permission("dashboard", "lamp", "read-write");
    let config = SimulationConfig { simulation_time: 3.0, realtime_factor: 0.0, ..Default::default() };

    let stats = SimulationOrchestrator::new(config)
        .unwrap()
        .with_description(description)
        .execute(runtime.handle(), &broker)
        .unwrap();

    let devices: Vec<&str> = stats.devices.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(devices, vec!["thermometer", "lamp"]);
    assert_eq!(stats.apps.len(), 1);
    assert_eq!(stats.interfaces.len(), 6);
    assert_eq!(stats.deregistration.unwrap().deregistered.len(), 3);
}

/// Test that a fault aimed at an app is rejected before any broker call
#[test]
fn test_fault_on_app_is_a_configuration_error() {
    let runtime = runtime();
    let broker = InMemoryBroker::new();
    let config = SimulationConfig {
        realtime_factor: 0.0,
        faults: vec![FaultSpec { entity: "app0".into(), at: 1.0, cause: "FAULT".into() }],
        ..Default::default()
    };

    let err = SimulationOrchestrator::new(config).unwrap().execute(runtime.handle(), &broker).unwrap_err();

    assert_eq!(err.category(), "Configuration");
    assert_eq!(broker.call_count(), 0);
}

/// Test that run statistics serialize for machine consumption
#[test]
fn test_statistics_serialize_to_json() {
    let runtime = runtime();
    let broker = InMemoryBroker::new();
    let config = SimulationConfig { simulation_time: 2.0, realtime_factor: 0.0, ..Default::default() };

    let stats = SimulationOrchestrator::new(config).unwrap().execute(runtime.handle(), &broker).unwrap();
    let json = serde_json::to_value(&stats).unwrap();

    assert_eq!(json["devices"].as_array().unwrap().len(), 2);
    assert_eq!(json["simulated_seconds"], 2.0);
    assert!(json["deregistration"]["deregistered"].is_array());
    assert!(stats.summary_report().contains("=== Testbed Run Summary ==="));
}
