use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::astro_math::deg_to_rad;
use crate::pulse::{MountAxis, PulseSink};
use crate::stepper::StepperConfig;
use crate::telescope_control::{ObservingLocation, StepperAxis, TelescopeConfig};

/* Config */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub bearing_axis: AxisSettings,
    pub declination_axis: AxisSettings,
    pub observation_location: ObservingLocation,
    pub control: ControlSettings,
    pub stellarium: StellariumSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bearing_axis: AxisSettings {
                motor_steps: 800,
                gear_ratio: 256.,
                max_speed: 1.5,
                max_accel: 1.,
                max_decel: 1.,
                min_sleep_ns: 50_000,
                max_interval_ns: 250_000_000,
            },
            declination_axis: AxisSettings {
                motor_steps: 400,
                gear_ratio: 16.,
                max_speed: 4.,
                max_accel: 2.,
                max_decel: 2.,
                min_sleep_ns: 50_000,
                max_interval_ns: 250_000_000,
            },
            observation_location: ObservingLocation::default(),
            control: ControlSettings::default(),
            stellarium: StellariumSettings::default(),
        }
    }
}

/* Axis mechanics and limits. Angular rates are degrees, per the config
 * file; the core works in steps. */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AxisSettings {
    pub motor_steps: u32,
    pub gear_ratio: f64,
    /// deg/s
    pub max_speed: f64,
    /// deg/s^2
    pub max_accel: f64,
    /// deg/s^2
    pub max_decel: f64,
    pub min_sleep_ns: i64,
    pub max_interval_ns: i64,
}

impl AxisSettings {
    pub fn stepper_axis(&self, axis: MountAxis, pulse: Arc<dyn PulseSink>) -> StepperAxis {
        let angle_per_step =
            std::f64::consts::TAU / (self.motor_steps as f64 * self.gear_ratio);
        StepperAxis {
            motor_steps: self.motor_steps,
            gear_ratio: self.gear_ratio,
            config: StepperConfig {
                min_sleep_ns: self.min_sleep_ns,
                max_speed: deg_to_rad(self.max_speed) / angle_per_step,
                max_accel: deg_to_rad(self.max_accel) / angle_per_step,
                max_decel: deg_to_rad(self.max_decel) / angle_per_step,
                max_interval_ns: self.max_interval_ns,
                axis,
                pulse,
            },
        }
    }
}

/* Coordinator settings */
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ControlSettings {
    /// Track-loop look-ahead, seconds.
    pub predict_dt_secs: f64,
    pub publish_interval_ms: u64,
    /// Log pulses instead of driving hardware.
    pub virtual_mode: bool,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            predict_dt_secs: 30.,
            publish_interval_ms: 250,
            virtual_mode: true,
        }
    }
}

/* Stellarium bridge */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StellariumSettings {
    pub enabled: bool,
    pub bind: String,
}

impl Default for StellariumSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:10001".to_string(),
        }
    }
}

impl Config {
    pub fn telescope_config(&self, pulse: Arc<dyn PulseSink>) -> TelescopeConfig {
        TelescopeConfig {
            bearing_axis: self
                .bearing_axis
                .stepper_axis(MountAxis::Bearing, Arc::clone(&pulse)),
            declination_axis: self
                .declination_axis
                .stepper_axis(MountAxis::Declination, pulse),
            location: self.observation_location,
            predict_dt: Duration::from_secs_f64(self.control.predict_dt_secs),
            publish_interval: Duration::from_millis(self.control.publish_interval_ms),
        }
    }
}
