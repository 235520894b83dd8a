//! Smart streetlight model
//!
//! A streetlight reads a shared ambient light level every tick. Its LED is off
//! in daylight and dimmed at night. Activity brightens it for a few ticks and,
//! when the light saw the activity itself, wakes the next streetlights along
//! the street with `activity_detected_in_neighbourhood`.
//!
//! | Ambient | Activity | LED |
//! |---------|----------|-----|
//! | `>= 0.8` | any | off (0) |
//! | `< 0.8` | none for [`AUTOMATIC_DIM_TICKS`] ticks | dim (0.2) |
//! | `< 0.8` | recent | bright (1.0) |

use crate::messaging::Message;
use crate::simulation::SimTime;
use crate::types::EntityId;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// LED intensity at night without activity
pub const DIM_INTENSITY: f64 = 0.2;

/// LED intensity after activity
pub const BRIGHT_INTENSITY: f64 = 1.0;

/// Ambient level at and above which the LED is off
pub const AMBIENT_LIGHT_THRESHOLD: f64 = 0.8;

/// Ticks without activity before a bright LED dims again
pub const AUTOMATIC_DIM_TICKS: u32 = 2;

/// Interrupt cause for activity seen by the streetlight's own sensor
pub const ACTIVITY_DETECTED: &str = "activity_detected";

/// Interrupt cause for activity reported by a neighbouring streetlight
pub const ACTIVITY_IN_NEIGHBOURHOOD: &str = "activity_detected_in_neighbourhood";

/// The `count` streetlights after `id` along `street`
///
/// Lights near the end of the street have fewer neighbours.
pub fn street_neighbours(street: &[EntityId], id: &EntityId, count: usize) -> Vec<EntityId> {
    match street.iter().position(|light| light == id) {
        Some(index) => street.iter().skip(index + 1).take(count).cloned().collect(),
        None => Vec::new(),
    }
}

/// Ambient light level shared by every streetlight of a run
///
/// Written by the state injector, read by streetlights on each tick.
#[derive(Debug, Clone)]
pub struct AmbientLight(Arc<Mutex<f64>>);

impl AmbientLight {
    /// Shared level starting at `level`
    pub fn new(level: f64) -> Self {
        Self(Arc::new(Mutex::new(level)))
    }

    /// Current level in `[0, 1]`
    pub fn level(&self) -> f64 {
        *self.0.lock()
    }

    /// Replace the level, clamped to `[0, 1]`
    pub fn set(&self, level: f64) {
        *self.0.lock() = level.clamp(0.0, 1.0);
    }
}

impl Default for AmbientLight {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Totals reported by a streetlight at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreetlightStatistics {
    /// Activity seen by the light's own sensor
    pub activity_detected: u64,
    /// Activity reported by neighbours
    pub neighbour_alerts: u64,
    /// Alerts sent to neighbours
    pub alerts_sent: u64,
    /// Times the LED went to full brightness
    pub brightened: u64,
    /// Times the LED dimmed after inactivity
    pub auto_dimmed: u64,
    /// LED intensity when the run ended
    pub final_led_intensity: f64,
}

/// LED state and activity bookkeeping of one streetlight
#[derive(Debug, Clone)]
pub struct Streetlight {
    ambient: AmbientLight,
    neighbours: Vec<EntityId>,
    led_on: bool,
    led_intensity: f64,
    dim_countdown: u32,
    led_log: Vec<(SimTime, f64)>,
    stats: StreetlightStatistics,
}

impl Streetlight {
    /// Streetlight reading `ambient` and alerting `neighbours` on activity
    pub fn new(ambient: AmbientLight, neighbours: Vec<EntityId>) -> Self {
        Self {
            ambient,
            neighbours,
            led_on: false,
            led_intensity: 0.0,
            dim_countdown: 0,
            led_log: Vec::new(),
            stats: StreetlightStatistics::default(),
        }
    }

    /// Streetlights alerted when this one detects activity
    pub fn neighbours(&self) -> &[EntityId] {
        &self.neighbours
    }

    /// Current LED intensity
    pub fn led_intensity(&self) -> f64 {
        self.led_intensity
    }

    /// Whether the LED is on
    pub fn is_on(&self) -> bool {
        self.led_on
    }

    /// Every LED intensity change with its logical time
    pub fn led_log(&self) -> &[(SimTime, f64)] {
        &self.led_log
    }

    fn is_dark(&self) -> bool {
        self.ambient.level() < AMBIENT_LIGHT_THRESHOLD
    }

    fn set_led(&mut self, now: SimTime, on: bool, intensity: f64) {
        self.led_on = on;
        if intensity != self.led_intensity {
            self.led_intensity = intensity;
            self.led_log.push((now, intensity));
        }
    }

    /// Periodic update while NORMAL: run the dim timer, then follow the ambient level
    pub fn on_tick(&mut self, now: SimTime) {
        if self.dim_countdown > 0 {
            self.dim_countdown -= 1;
            if self.dim_countdown == 0 && self.led_on && self.led_intensity > DIM_INTENSITY {
                self.set_led(now, true, DIM_INTENSITY);
                self.stats.auto_dimmed += 1;
                debug!(at = %now, "Dimming after inactivity");
            }
        }

        let ambient = self.ambient.level();
        if !self.led_on && self.is_dark() {
            self.set_led(now, true, DIM_INTENSITY);
            debug!(at = %now, ambient, "LED on");
        } else if self.led_on && !self.is_dark() {
            self.set_led(now, false, 0.0);
            self.dim_countdown = 0;
            debug!(at = %now, ambient, "LED off");
        }
    }

    /// React to activity; true when the LED went bright
    ///
    /// In daylight activity is counted but changes nothing.
    pub fn on_activity(&mut self, now: SimTime, own_sensor: bool) -> bool {
        if own_sensor {
            self.stats.activity_detected += 1;
        } else {
            self.stats.neighbour_alerts += 1;
        }
        if !self.is_dark() {
            return false;
        }
        if self.led_intensity < BRIGHT_INTENSITY {
            self.stats.brightened += 1;
        }
        self.set_led(now, true, BRIGHT_INTENSITY);
        self.dim_countdown = AUTOMATIC_DIM_TICKS;
        true
    }

    /// Record alerts sent to neighbours
    pub fn alerted(&mut self, count: usize) {
        self.stats.alerts_sent += count as u64;
    }

    /// Turn the LED off, as on entering FAULT
    pub fn switch_off(&mut self, now: SimTime) {
        self.set_led(now, false, 0.0);
        self.dim_countdown = 0;
    }

    /// Sensor reading as published on the protected stream
    pub fn reading(&self, sender: &EntityId, activity_detected: bool) -> Message {
        Message::streetlight_reading(sender, self.ambient.level(), self.led_intensity, activity_detected)
    }

    /// Totals for the run statistics
    pub fn statistics(&self) -> StreetlightStatistics {
        StreetlightStatistics { final_led_intensity: self.led_intensity, ..self.stats.clone() }
    }
}
