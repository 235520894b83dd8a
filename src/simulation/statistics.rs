//! Run statistics
//!
//! Collected by the orchestrator after teardown from every behavior and
//! interface, printed by the CLI and serializable to JSON.

use crate::entity::{AppStatistics, DeviceStatistics};
use crate::messaging::InterfaceStats;
use crate::permissions::DeregistrationReport;
use crate::types::{EntityId, EntityState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Outcome of the drain-and-join teardown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Outbound interfaces still busy when the drain bound expired
    pub not_idle: Vec<String>,
    /// Workers that did not finish within the join bound and were aborted
    pub unjoined: Vec<String>,
    /// Workers that panicked
    pub panicked: Vec<String>,
}

impl TeardownReport {
    /// Whether every worker drained and joined
    pub fn is_clean(&self) -> bool {
        self.not_idle.is_empty() && self.unjoined.is_empty() && self.panicked.is_empty()
    }
}

/// Everything measured during one run
#[derive(Debug, Clone, Serialize)]
pub struct RunStatistics {
    /// Run id
    pub run_id: Uuid,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end
    pub finished_at: DateTime<Utc>,
    /// Logical run length in seconds
    pub simulated_seconds: f64,
    /// Wall seconds per logical second used
    pub realtime_factor: f64,
    /// Largest lag of logical behind wall time, in milliseconds
    pub max_overshoot_ms: u64,
    /// Number of overshoot warnings
    pub overshoot_warnings: u64,
    /// Scheduler events processed
    pub events_processed: u64,
    /// Faults delivered by the injector
    pub faults_injected: usize,
    /// `activity_detected` interrupts delivered to streetlights
    pub activities_injected: usize,
    /// Per-device totals
    pub devices: Vec<DeviceStatistics>,
    /// Per-app totals
    pub apps: Vec<AppStatistics>,
    /// Per-interface counters
    pub interfaces: Vec<InterfaceStats>,
    /// Drain-and-join outcome
    pub teardown: TeardownReport,
    /// Final deregistration, when the run owned the registrations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deregistration: Option<DeregistrationSummary>,
}

/// Serializable form of a [`DeregistrationReport`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeregistrationSummary {
    /// Entities removed
    pub deregistered: Vec<EntityId>,
    /// Entities left behind, with the broker's error
    pub failed: Vec<(EntityId, String)>,
}

impl From<&DeregistrationReport> for DeregistrationSummary {
    fn from(report: &DeregistrationReport) -> Self {
        Self {
            deregistered: report.deregistered.clone(),
            failed: report.failed.iter().map(|(id, err)| (id.clone(), err.to_string())).collect(),
        }
    }
}

impl RunStatistics {
    /// Wall-clock duration in seconds
    pub fn wall_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Totals of one device
    pub fn device(&self, id: &EntityId) -> Option<&DeviceStatistics> {
        self.devices.iter().find(|d| &d.id == id)
    }

    /// Totals of one app
    pub fn app(&self, id: &EntityId) -> Option<&AppStatistics> {
        self.apps.iter().find(|a| &a.id == id)
    }

    /// Sensor readings accepted by all devices
    pub fn total_readings(&self) -> u64 {
        self.devices.iter().map(|d| d.readings_published).sum()
    }

    /// Successful broker publishes across all interfaces
    pub fn total_sent(&self) -> u64 {
        self.interfaces.iter().map(|i| i.sent).sum()
    }

    /// Messages delivered to owners across all interfaces
    pub fn total_received(&self) -> u64 {
        self.interfaces.iter().map(|i| i.received).sum()
    }

    /// Messages dropped across all interfaces
    pub fn total_dropped(&self) -> u64 {
        self.interfaces.iter().map(|i| i.dropped).sum()
    }

    /// Failed broker calls across all interfaces
    pub fn total_failed(&self) -> u64 {
        self.interfaces.iter().map(|i| i.failed).sum()
    }

    /// RESUME commands sent by all apps
    pub fn total_resumes(&self) -> u64 {
        self.apps.iter().map(|a| a.resumes_sent).sum()
    }

    /// Devices that ended the run in FAULT
    pub fn devices_in_fault(&self) -> Vec<&EntityId> {
        self.devices.iter().filter(|d| d.final_state == EntityState::Fault).map(|d| &d.id).collect()
    }

    /// Multi-line human readable report
    pub fn summary_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Testbed Run Summary ===\n\n");
        report.push_str(&format!("Run: {}\n", self.run_id));
        report.push_str(&format!(
            "Logical Time: {:.1}s, Wall Time: {:.2}s (realtime factor {})\n",
            self.simulated_seconds,
            self.wall_seconds(),
            self.realtime_factor
        ));
        if self.overshoot_warnings > 0 {
            report.push_str(&format!(
                "Overshoot: max {}ms, {} warnings\n",
                self.max_overshoot_ms, self.overshoot_warnings
            ));
        }
        report.push_str(&format!("Events Processed: {}\n\n", self.events_processed));

        report.push_str("Devices:\n");
        for d in &self.devices {
            report.push_str(&format!(
                "  - {}: {} readings, {} faults, {} resumes, {:.1}s in fault, ends {}\n",
                d.id, d.readings_published, d.faults, d.resumes, d.seconds_in_fault, d.final_state
            ));
            if let Some(light) = &d.streetlight {
                report.push_str(&format!(
                    "      LED {:.1}, {} activity, {} neighbour alerts, {} brightened, {} dimmed\n",
                    light.final_led_intensity,
                    light.activity_detected,
                    light.neighbour_alerts,
                    light.brightened,
                    light.auto_dimmed
                ));
            }
        }

        report.push_str("\nApps:\n");
        for a in &self.apps {
            let suspected: Vec<&str> =
                a.devices.iter().filter(|(_, v)| v.suspected).map(|(id, _)| id.as_str()).collect();
            report.push_str(&format!(
                "  - {}: {} messages, {} resumes sent",
                a.id, a.messages_received, a.resumes_sent
            ));
            if !suspected.is_empty() {
                report.push_str(&format!(", suspects [{}]", suspected.join(", ")));
            }
            report.push('\n');
        }

        report.push_str("\nInterfaces:\n");
        report.push_str(&format!("  - Sent: {}\n", self.total_sent()));
        report.push_str(&format!("  - Received: {}\n", self.total_received()));
        report.push_str(&format!("  - Dropped: {}\n", self.total_dropped()));
        report.push_str(&format!("  - Failed: {}\n", self.total_failed()));
        report.push_str(&format!("  - Faults Injected: {}\n", self.faults_injected));
        if self.activities_injected > 0 {
            report.push_str(&format!("  - Activities Injected: {}\n", self.activities_injected));
        }

        if !self.teardown.is_clean() {
            report.push_str("\nTeardown:\n");
            for name in &self.teardown.not_idle {
                report.push_str(&format!("  - not idle: {}\n", name));
            }
            for name in &self.teardown.unjoined {
                report.push_str(&format!("  - aborted: {}\n", name));
            }
            for name in &self.teardown.panicked {
                report.push_str(&format!("  - panicked: {}\n", name));
            }
        }

        if let Some(dereg) = &self.deregistration {
            report.push_str(&format!("\nDeregistered: {}", dereg.deregistered.len()));
            if !dereg.failed.is_empty() {
                report.push_str(&format!(", failed: {}", dereg.failed.len()));
            }
            report.push('\n');
        }

        report
    }

    /// One-line summary
    pub fn compact_summary(&self) -> String {
        format!(
            "{} devices, {} apps, {} readings, {} resumes, {} dropped, {:.1}s logical",
            self.devices.len(),
            self.apps.len(),
            self.total_readings(),
            self.total_resumes(),
            self.total_dropped(),
            self.simulated_seconds
        )
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary_report())
    }
}
