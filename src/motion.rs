//! Closed-form trapezoidal intercept mathematics.
//!
//! A maneuver starts at `(p_i, v_i)`, chases a target moving linearly from
//! `q_i` at velocity `u`, and must arrive on the target with final velocity
//! `v_f` using a trapezoidal velocity profile: linear acceleration `a_in`
//! up to a cruise velocity `v_c`, a constant cruise, then linear
//! acceleration `a_out` down to `v_f`. The solver picks the optimal `v_c`
//! (clamped to the speed cap) and the intercept time; the pulse-time
//! generators turn segments of the profile into per-step deadlines.

use crate::errors::{MotionError, MotionResult};

/// Displacement covered accelerating linearly from `v_i` to `v_f` at `a`.
pub fn travel_linaccel(v_i: f64, v_f: f64, a: f64) -> f64 {
    (v_f * v_f - v_i * v_i) / (2.0 * a)
}

/// Solver output: cruise velocity, elapsed intercept time, and the
/// (fractional) position where the body meets the target.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TrapzIntercept {
    pub v_c: f64,
    pub t: f64,
    pub p_f: f64,
}

/// The two stationary points of the cruise-velocity expression, each
/// clamped to the speed cap `c`.
fn cruise_velocity_roots(
    c: f64,
    a_in: f64,
    a_out: f64,
    p_i: f64,
    v_i: f64,
    v_f: f64,
    q_i: f64,
    u: f64,
) -> MotionResult<(f64, f64)> {
    if u.abs() >= c {
        return Err(MotionError::SpeedLimit {
            velocity: u,
            max_speed: c,
        });
    }

    let root_interior = (a_in.powi(2) - 2.0 * a_in * a_out + a_out.powi(2)) * u.powi(2)
        - 2.0 * (a_in.powi(2) - a_in * a_out) * u * v_f
        + (a_in.powi(2) - a_in * a_out) * v_f.powi(2)
        + 2.0 * (a_in * a_out - a_out.powi(2)) * u * v_i
        - (a_in * a_out - a_out.powi(2)) * v_i.powi(2)
        + 2.0 * (a_in.powi(2) * a_out - a_in * a_out.powi(2)) * p_i
        - 2.0 * (a_in.powi(2) * a_out - a_in * a_out.powi(2)) * q_i;

    if root_interior < 0.0 {
        return Err(MotionError::Unreachable);
    }
    let root_part = root_interior.sqrt();

    let clamp = |v_c: f64| {
        if v_c.abs() > c {
            c.copysign(v_c)
        } else {
            v_c
        }
    };

    let root1 = clamp(((a_in - a_out) * u - root_part) / (a_in - a_out));
    let root2 = clamp(((a_in - a_out) * u + root_part) / (a_in - a_out));
    Ok((root1, root2))
}

/// Elapsed time of the trapezoidal intercept at a given cruise velocity.
fn intercept_time(
    a_in: f64,
    a_out: f64,
    p_i: f64,
    v_i: f64,
    v_f: f64,
    q_i: f64,
    u: f64,
    v_c: f64,
) -> f64 {
    0.5 * (2.0 * a_in * a_out * p_i - 2.0 * a_in * a_out * q_i
        + (a_in - a_out) * v_c.powi(2)
        - 2.0 * a_in * v_c * v_f
        + a_in * v_f.powi(2)
        + 2.0 * a_out * v_c * v_i
        - a_out * v_i.powi(2))
        / (a_in * a_out * u - a_in * a_out * v_c)
}

/// Optimal cruise velocity and intercept time.
///
/// Of the two candidate roots, the one yielding the larger non-negative
/// intercept time wins; if neither time is non-negative the intercept is
/// infeasible and the caller must fall back to abort-and-replan.
pub fn trapz_intercept(
    c: f64,
    a_in: f64,
    a_out: f64,
    p_i: f64,
    v_i: f64,
    v_f: f64,
    q_i: f64,
    u: f64,
) -> MotionResult<TrapzIntercept> {
    let (root1, root2) = cruise_velocity_roots(c, a_in, a_out, p_i, v_i, v_f, q_i, u)?;

    let t1 = intercept_time(a_in, a_out, p_i, v_i, v_f, q_i, u, root1);
    let t2 = intercept_time(a_in, a_out, p_i, v_i, v_f, q_i, u, root2);

    let best = [(root1, t1), (root2, t2)]
        .into_iter()
        .filter(|(_, t)| t.is_finite() && *t >= 0.0)
        .max_by(|(_, a), (_, b)| a.total_cmp(b));

    match best {
        Some((v_c, t)) => Ok(TrapzIntercept {
            v_c,
            t,
            p_f: q_i + u * t,
        }),
        None => Err(MotionError::Unreachable),
    }
}

/// Per-step deadlines (seconds from segment start) for `steps` signed
/// steps at constant velocity `v`.
pub fn pulse_times_constant(steps: i64, v: f64) -> Vec<f64> {
    if steps == 0 {
        return Vec::new();
    }
    let sign = steps.signum() as f64;
    (1..=steps.abs()).map(|k| sign * k as f64 / v).collect()
}

/// Per-step deadlines for `steps` signed steps starting at velocity `u`
/// under constant acceleration `a`.
///
/// The deadline of step `k` is the relevant root of
/// `u*t + a*t^2/2 = k*sign(steps)`. The root interior is clamped at zero:
/// steps at or past the turnaround all land on the turnaround time, and
/// the executor's minimum-interval floor spaces them out.
pub fn pulse_times_linaccel(steps: i64, u: f64, a: f64) -> Vec<f64> {
    if steps == 0 {
        return Vec::new();
    }
    let sign = steps.signum() as f64;
    (1..=steps.abs())
        .map(|k| {
            let s = sign * k as f64;
            let common = (2.0 * a * s + u * u).max(0.0).sqrt();
            if steps > 0 {
                -(u - common) / a
            } else {
                -(u + common) / a
            }
        })
        .collect()
}

/// Per-step deadlines for a full trapezoid over `steps` signed steps.
///
/// The displacement splits into accel-in / cruise / accel-out using the
/// travel distances of the two ramps; each ramp is truncated to a whole
/// number of steps and the cruise takes the remainder. Empty phases carry
/// their time offset through unchanged.
pub fn pulse_times_trapz(
    v_i: f64,
    v_f: f64,
    v_c: f64,
    a_in: f64,
    a_out: f64,
    steps: i64,
) -> MotionResult<Vec<f64>> {
    let s_in = travel_linaccel(v_i, v_c, a_in);
    let s_out = travel_linaccel(v_c, v_f, a_out);

    let steps_in = s_in.trunc() as i64;
    let steps_out = s_out.trunc() as i64;

    if (steps_in + steps_out).abs() > steps.abs() {
        return Err(MotionError::DegenerateCruise {
            steps_in,
            steps_out,
            steps,
        });
    }
    let steps_cruise = steps - (steps_in + steps_out);
    if steps_cruise != 0 && v_c == 0.0 {
        return Err(MotionError::DegenerateCruise {
            steps_in,
            steps_out,
            steps,
        });
    }

    let mut times = pulse_times_linaccel(steps_in, v_i, a_in);
    let mut t_max = times.last().copied().unwrap_or(0.0);

    if steps_cruise != 0 {
        times.extend(
            pulse_times_constant(steps_cruise, v_c)
                .into_iter()
                .map(|t| t_max + t),
        );
        t_max = times.last().copied().unwrap_or(t_max);
    }

    times.extend(
        pulse_times_linaccel(steps_out, v_c, a_out)
            .into_iter()
            .map(|t| t_max + t),
    );

    Ok(times)
}
