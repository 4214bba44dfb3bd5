//! Radians <-> steps bookkeeping for one mount axis.
//!
//! The mount publishes orientation as `(position + offset) *
//! angle_per_step`. Calibration only ever moves the offset; the step
//! counter itself belongs to the stepper.

use std::f64::consts::{PI, TAU};
use std::sync::Mutex;

use crate::astro_math::modulo;
use crate::stepper::{Stepper, StepperConfig};

/// Mechanical description of one axis.
#[derive(Clone)]
pub struct StepperAxis {
    /// Full steps per motor revolution (at the configured microstepping).
    pub motor_steps: u32,
    pub gear_ratio: f64,
    pub config: StepperConfig,
}

impl StepperAxis {
    pub fn angle_per_step(&self) -> f64 {
        TAU / (self.motor_steps as f64 * self.gear_ratio)
    }
}

/// The representative of `angle` (mod 2pi) nearest `reference`, so a
/// wrapped coordinate never commands a full turn of slew.
pub(super) fn nearest_angle(angle: f64, reference: f64) -> f64 {
    reference + modulo(angle - reference + PI, TAU) - PI
}

pub(super) struct AxisUnit {
    pub(super) stepper: Stepper,
    pub(super) angle_per_step: f64,
    offset: Mutex<i64>,
}

impl AxisUnit {
    pub(super) fn new(axis: StepperAxis) -> Self {
        let angle_per_step = axis.angle_per_step();
        AxisUnit {
            stepper: Stepper::new(axis.config),
            angle_per_step,
            offset: Mutex::new(0),
        }
    }

    pub(super) fn orientation_steps(&self) -> i64 {
        self.stepper.position() + *self.offset.lock().unwrap()
    }

    pub(super) fn angle(&self) -> f64 {
        self.orientation_steps() as f64 * self.angle_per_step
    }

    /// Stepper-frame step target for an absolute angle, taking the turn
    /// nearest the current pointing.
    pub(super) fn steps_for_angle(&self, angle: f64) -> i64 {
        let offset = *self.offset.lock().unwrap();
        let current = (self.stepper.position() + offset) as f64 * self.angle_per_step;
        (nearest_angle(angle, current) / self.angle_per_step).round() as i64 - offset
    }

    pub(super) fn steps_per_sec(&self, rad_per_sec: f64) -> f64 {
        rad_per_sec / self.angle_per_step
    }

    /// Re-seat the offset so the current position reads as `angle`.
    pub(super) fn calibrate(&self, angle: f64) {
        let mut offset = self.offset.lock().unwrap();
        *offset = (angle / self.angle_per_step).round() as i64 - self.stepper.position();
    }

    pub(super) fn calibrate_rel(&self, steps: i64) {
        *self.offset.lock().unwrap() += steps;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulse::{LogPulse, MountAxis};
    use assert_float_eq::*;
    use std::sync::Arc;

    fn test_axis() -> StepperAxis {
        StepperAxis {
            motor_steps: 3600,
            gear_ratio: 1.,
            config: StepperConfig {
                min_sleep_ns: 50_000,
                max_speed: 2000.,
                max_accel: 200.,
                max_decel: 200.,
                max_interval_ns: 250_000_000,
                axis: MountAxis::Bearing,
                pulse: Arc::new(LogPulse),
            },
        }
    }

    #[test]
    fn test_angle_per_step() {
        let axis = test_axis();
        assert_float_relative_eq!(axis.angle_per_step(), TAU / 3600., 1e-12);
    }

    #[test]
    fn test_nearest_angle() {
        assert_float_absolute_eq!(nearest_angle(0.1, 0.), 0.1, 1e-12);
        assert_float_absolute_eq!(nearest_angle(TAU - 0.1, 0.), -0.1, 1e-12);
        assert_float_absolute_eq!(nearest_angle(0.1, TAU), TAU + 0.1, 1e-12);
        assert_float_absolute_eq!(nearest_angle(-0.25, -3. * TAU), -3. * TAU - 0.25, 1e-12);
    }

    #[test]
    fn test_calibrate_maps_position_to_angle() {
        let unit = AxisUnit::new(test_axis());
        let angle = 0.5;
        unit.calibrate(angle);
        assert_float_absolute_eq!(unit.angle(), angle, unit.angle_per_step / 2.);
    }

    #[test]
    fn test_calibrate_rel_zero_is_noop() {
        let unit = AxisUnit::new(test_axis());
        unit.calibrate(1.0);
        let before = unit.orientation_steps();
        unit.calibrate_rel(0);
        assert_eq!(unit.orientation_steps(), before);
    }

    #[test]
    fn test_steps_for_angle_round_trip() {
        let unit = AxisUnit::new(test_axis());
        unit.calibrate(0.);
        let aps = unit.angle_per_step;
        assert_eq!(unit.steps_for_angle(200. * aps), 200);
        assert_eq!(unit.steps_for_angle(-12. * aps), -12);
        // A target just under a full turn away resolves to the short way
        // around.
        assert_eq!(unit.steps_for_angle(TAU - 10. * aps), -10);
    }
}
