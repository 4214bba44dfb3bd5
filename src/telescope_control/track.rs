//! The track loop.
//!
//! One intercept phase catches both axes up to the moving target, then
//! steady-state tracking plays abutting constant-velocity segments. The
//! target's angular acceleration is tiny (arcseconds/s^2 for sidereal
//! rates), so re-sampling only the velocity each segment keeps the mount
//! on target without the position jitter that re-issued intercepts would
//! cause.

use chrono::{DateTime, TimeZone, Utc};
use std::f64::consts::{PI, TAU};
use tracing::{info, warn};

use super::target::{resolve, Target};
use super::{Shared, GROUP_WAIT_POLL, TRACK_RUNWAY_NS};
use crate::activity::{Activity, ActivityStatus};
use crate::astro_math::modulo;
use crate::errors::ControlResult;
use crate::stepper::{compute_intercept, InterceptParams};
use crate::util::now_ns;

/// Per-axis plan for the acquisition phase.
#[derive(Debug, Copy, Clone)]
pub(super) struct AxisPlan {
    pub(super) params: InterceptParams,
    /// Tracking velocity at acquisition, steps/s.
    pub(super) velocity: f64,
    /// Deadline of the run-constant pad keeping this (faster) axis on
    /// the target until the slower axis arrives.
    pub(super) pad_until_ns: Option<i64>,
}

#[derive(Debug, Copy, Clone)]
pub(super) struct AcquisitionPlan {
    pub(super) start_ns: i64,
    /// Synchronized completion: when the slower intercept lands.
    pub(super) until_ns: i64,
    pub(super) bearing: AxisPlan,
    pub(super) dec: AxisPlan,
}

fn ns_to_datetime(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}

/// Smallest-magnitude representative of an angle difference.
fn wrap_delta(delta: f64) -> f64 {
    modulo(delta + PI, TAU) - PI
}

/// Target position (axis steps) and velocity (steps/s) per axis at
/// `at_ns`, velocity by finite difference across the look-ahead.
fn sample_target(
    shared: &Shared,
    target: &Target,
    at_ns: i64,
) -> ControlResult<((i64, i64), (f64, f64))> {
    let t0 = ns_to_datetime(at_ns);
    let dt_s = shared.predict_dt.as_secs_f64();
    let t1 = t0 + chrono::Duration::nanoseconds(shared.predict_dt.as_nanos() as i64);

    let (ha0, dec0) = resolve(shared.oracle.as_ref(), target, t0, &shared.location)?;
    let (ha1, dec1) = resolve(shared.oracle.as_ref(), target, t1, &shared.location)?;

    let positions = (
        shared.bearing.steps_for_angle(ha0),
        shared.dec.steps_for_angle(dec0),
    );
    let velocities = (
        shared.bearing.steps_per_sec(wrap_delta(ha1 - ha0) / dt_s),
        shared.dec.steps_per_sec(wrap_delta(dec1 - dec0) / dt_s),
    );
    Ok((positions, velocities))
}

fn sample_velocity(shared: &Shared, target: &Target, at_ns: i64) -> ControlResult<(f64, f64)> {
    let (_, velocities) = sample_target(shared, target, at_ns)?;
    Ok(velocities)
}

/// Solve both intercepts for a maneuver starting at `start_ns` and pad
/// the faster axis with constant-velocity tracking until the slower one
/// lands.
pub(super) fn plan_acquisition(
    shared: &Shared,
    target: &Target,
    start_ns: i64,
) -> ControlResult<AcquisitionPlan> {
    let ((b_target, d_target), (b_vel, d_vel)) = sample_target(shared, target, start_ns)?;

    let b_params = compute_intercept(
        shared.bearing.stepper.config(),
        shared.bearing.stepper.position(),
        shared.bearing.stepper.velocity(),
        b_target,
        b_vel,
        b_vel,
    )?;
    let d_params = compute_intercept(
        shared.dec.stepper.config(),
        shared.dec.stepper.position(),
        shared.dec.stepper.velocity(),
        d_target,
        d_vel,
        d_vel,
    )?;

    let t_max = b_params.t.max(d_params.t);
    let until_ns = start_ns + (t_max * 1e9) as i64;
    let pad = |params: &InterceptParams| (params.t < t_max).then_some(until_ns);

    Ok(AcquisitionPlan {
        start_ns,
        until_ns,
        bearing: AxisPlan {
            params: b_params,
            velocity: b_vel,
            pad_until_ns: pad(&b_params),
        },
        dec: AxisPlan {
            params: d_params,
            velocity: d_vel,
            pad_until_ns: pad(&d_params),
        },
    })
}

enum GroupOutcome {
    Done,
    Canceled,
    Failed(String),
}

/// Wait for every activity in a group, polling so the coordinator's own
/// cancellation stays responsive.
fn wait_group(handle: &Activity, group: &[Activity]) -> GroupOutcome {
    for activity in group {
        loop {
            if handle.canceled() {
                return GroupOutcome::Canceled;
            }
            if activity.wait_for(ActivityStatus::done, Some(GROUP_WAIT_POLL)) {
                if activity.status() == ActivityStatus::Aborted {
                    return GroupOutcome::Failed(
                        activity
                            .fail_reason()
                            .unwrap_or_else(|| "axis activity aborted".to_string()),
                    );
                }
                break;
            }
        }
    }
    GroupOutcome::Done
}

fn cancel_all<'a>(groups: impl IntoIterator<Item = &'a Activity>) {
    for activity in groups {
        activity.cancel();
    }
}

fn abort_track(handle: &Activity, pending: Vec<Vec<Activity>>) {
    for group in &pending {
        cancel_all(group);
    }
    handle.set_status(ActivityStatus::Aborting);
    handle.finalize();
}

pub(super) fn run_track(shared: &Shared, handle: &Activity, target: &Target) {
    handle.set_status(ActivityStatus::Active);
    info!(%target, "tracking");

    let mut planned_to_ns = now_ns() + TRACK_RUNWAY_NS;

    let plan = match plan_acquisition(shared, target, planned_to_ns) {
        Ok(plan) => plan,
        Err(e) => {
            warn!(error = %e, "track acquisition failed");
            handle.fail(e.to_string());
            return;
        }
    };

    let mut group = Vec::with_capacity(3);
    for (unit, axis_plan) in [
        (&shared.bearing, &plan.bearing),
        (&shared.dec, &plan.dec),
    ] {
        group.push(
            unit.stepper
                .intercept_precomputed(axis_plan.params, plan.start_ns),
        );
        if let Some(until_ns) = axis_plan.pad_until_ns {
            group.push(unit.stepper.run_constant(axis_plan.velocity, until_ns));
        }
    }
    planned_to_ns = plan.until_ns;

    let predict_ns = shared.predict_dt.as_nanos() as i64;
    let mut prev_group = group;

    loop {
        if handle.canceled() {
            return abort_track(handle, vec![prev_group]);
        }

        // Plan the next segment before waiting out the previous one, so
        // the axes never starve between groups.
        let (b_vel, d_vel) = match sample_velocity(shared, target, planned_to_ns) {
            Ok(velocities) => velocities,
            Err(e) => {
                warn!(error = %e, "track velocity sample failed");
                cancel_all(&prev_group);
                handle.fail(e.to_string());
                return;
            }
        };
        let until_ns = planned_to_ns + predict_ns;
        let next_group = vec![
            shared.bearing.stepper.run_constant(b_vel, until_ns),
            shared.dec.stepper.run_constant(d_vel, until_ns),
        ];
        planned_to_ns = until_ns;

        match wait_group(handle, &prev_group) {
            GroupOutcome::Done => {}
            GroupOutcome::Canceled => {
                return abort_track(handle, vec![prev_group, next_group]);
            }
            GroupOutcome::Failed(reason) => {
                warn!(reason = %reason, "axis activity failed while tracking");
                cancel_all(prev_group.iter().chain(next_group.iter()));
                handle.fail(reason);
                return;
            }
        }
        prev_group = next_group;
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_config;
    use super::super::{NoEphemeris, TelescopeControl};
    use super::*;
    use crate::errors::ControlError;
    use crate::telescope_control::target::{ObservingLocation, TargetOracle};
    use assert_float_eq::*;
    use std::sync::Arc;

    /// Oracle pinned to one mount-frame coordinate, optionally drifting
    /// at a fixed rate.
    struct PinnedOracle {
        ha: f64,
        dec: f64,
        ha_rate: f64,
    }

    impl TargetOracle for PinnedOracle {
        fn coordinate(
            &self,
            _target: &Target,
            time: DateTime<Utc>,
            _location: &ObservingLocation,
        ) -> ControlResult<(f64, f64)> {
            let t = time.timestamp_nanos() as f64 / 1e9;
            Ok((self.ha + self.ha_rate * t, self.dec))
        }
    }

    fn body() -> Target {
        Target::SolarSystemBody {
            name: "jupiter".to_string(),
        }
    }

    #[test]
    fn test_dual_intercept_pads_faster_axis() {
        let aps = TAU / 3600.;
        // Bearing needs a 2 s slew (200 steps at accel 200); dec roughly
        // 0.5 s (12 steps).
        let oracle = PinnedOracle {
            ha: 200. * aps,
            dec: 12. * aps,
            ha_rate: 0.,
        };
        let control = TelescopeControl::new(test_config(), Arc::new(oracle));

        let start_ns = 1_000_000_000_000;
        let plan = plan_acquisition(&control.shared, &body(), start_ns).unwrap();

        assert_eq!(plan.bearing.params.delta, 200);
        assert_eq!(plan.dec.params.delta, 12);
        assert_float_relative_eq!(plan.bearing.params.t, 2.0, 1e-6);
        assert!(plan.dec.params.t < 0.5);

        // The slower axis runs its intercept bare; the faster one gets a
        // pad out to the synchronized completion time.
        assert_eq!(plan.bearing.pad_until_ns, None);
        assert_eq!(plan.dec.pad_until_ns, Some(plan.until_ns));
        assert_eq!(
            plan.until_ns,
            start_ns + (plan.bearing.params.t * 1e9) as i64
        );
    }

    #[test]
    fn test_acquisition_velocity_finite_difference() {
        let aps = TAU / 3600.;
        // Drift of 20 steps/s on the bearing axis.
        let oracle = PinnedOracle {
            ha: 0.,
            dec: 0.,
            ha_rate: 20. * aps,
        };
        let control = TelescopeControl::new(test_config(), Arc::new(oracle));

        let (_, (b_vel, d_vel)) =
            sample_target(&control.shared, &body(), 1_000_000_000_000).unwrap();
        assert_float_relative_eq!(b_vel, 20., 1e-6);
        assert_float_absolute_eq!(d_vel, 0., 1e-9);
    }

    #[test]
    fn test_acquisition_rejects_unoracled_target() {
        let control = TelescopeControl::new(test_config(), Arc::new(NoEphemeris));
        let err = plan_acquisition(&control.shared, &body(), 1_000_000_000_000).unwrap_err();
        assert!(matches!(err, ControlError::Ephemeris(_)));
    }

    #[test]
    fn test_wrap_delta() {
        assert_float_absolute_eq!(wrap_delta(0.25), 0.25, 1e-12);
        assert_float_absolute_eq!(wrap_delta(TAU - 0.25), -0.25, 1e-12);
        assert_float_absolute_eq!(wrap_delta(-TAU + 0.25), 0.25, 1e-12);
    }
}
