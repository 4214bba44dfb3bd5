//! The planning worker of a stepper axis.
//!
//! Consumes activities one at a time and commits timed motion entries
//! into the bounded motion queue. The commit cursor (`commit_pos`,
//! `commit_vel`, `commit_deadline`) tracks the state of the axis after
//! everything already enqueued, independent of how far the executor has
//! gotten, so planning runs ahead of execution.

use std::sync::mpsc::{Receiver, SendError, SyncSender};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{compute_intercept, AxisActivity, AxisState, Goal, MotionEntry, StepperConfig};
use crate::activity::ActivityStatus;
use crate::motion::{pulse_times_linaccel, pulse_times_trapz, travel_linaccel};
use crate::pulse::StepDir;
use crate::util::now_ns;

type PlanResult = Result<Flow, SendError<MotionEntry>>;

enum Flow {
    /// Activity fully planned; dispatch the next one.
    Next,
    /// Cancellation observed; replace the remaining plan with a
    /// deceleration ramp.
    Abort,
}

/// Whole abort-ramp step count for an axis moving at `velocity`: the
/// stopping distance rounded away from zero, plus one step so the ramp
/// cannot undershoot.
pub(super) fn abort_ramp_steps(velocity: f64, max_decel: f64) -> i64 {
    if velocity == 0. {
        return 0;
    }
    let a_out = -max_decel.copysign(velocity);
    let steps_frac = travel_linaccel(velocity, 0., a_out);
    (steps_frac.abs().ceil() as i64 + 1) * steps_frac.signum() as i64
}

pub(super) struct Planner {
    config: StepperConfig,
    activities: Receiver<Arc<AxisActivity>>,
    motion: SyncSender<MotionEntry>,
    state: Arc<Mutex<AxisState>>,
    commit_pos: i64,
    commit_vel: f64,
    commit_deadline: i64,
}

impl Planner {
    pub(super) fn new(
        config: StepperConfig,
        activities: Receiver<Arc<AxisActivity>>,
        motion: SyncSender<MotionEntry>,
        state: Arc<Mutex<AxisState>>,
    ) -> Self {
        Planner {
            config,
            activities,
            motion,
            state,
            commit_pos: 0,
            commit_vel: 0.,
            commit_deadline: 0,
        }
    }

    pub(super) fn run(mut self) {
        {
            let state = self.state.lock().unwrap();
            self.commit_pos = state.position;
            self.commit_vel = state.velocity;
        }
        self.commit_deadline = now_ns();

        while let Ok(activity) = self.activities.recv() {
            match self.dispatch(&activity) {
                Ok(keep_going) => {
                    if !keep_going {
                        break;
                    }
                }
                Err(_) => {
                    // Executor is gone; nothing left to plan for.
                    warn!(axis = %self.config.axis, "motion queue closed; planner exiting");
                    break;
                }
            }
        }
        debug!(axis = %self.config.axis, "planner stopped");
    }

    /// Plan one activity. Returns whether the planner should keep
    /// running.
    fn dispatch(&mut self, activity: &Arc<AxisActivity>) -> Result<bool, SendError<MotionEntry>> {
        debug_assert_eq!(activity.handle.status(), ActivityStatus::Pending);

        let flow = match &activity.goal {
            Goal::Idle | Goal::Stop => {
                activity.handle.set_status(ActivityStatus::Active);
                self.emit_end(activity)?;
                return Ok(!matches!(activity.goal, Goal::Stop));
            }
            Goal::Intercept { .. } | Goal::InterceptPrecomputed { .. } => {
                self.plan_intercept(activity)?
            }
            Goal::RunConstant { .. } => self.plan_run_constant(activity)?,
        };

        if let Flow::Abort = flow {
            self.plan_abort(activity)?;
        }
        Ok(true)
    }

    fn plan_intercept(&mut self, activity: &Arc<AxisActivity>) -> PlanResult {
        activity.handle.set_status(ActivityStatus::Active);

        let now = now_ns();
        self.commit_deadline = self.commit_deadline.max(now);

        let (params, start_ns) = match &activity.goal {
            Goal::InterceptPrecomputed { params, start_ns } => (*params, *start_ns),
            Goal::Intercept {
                target,
                target_velocity,
                final_velocity,
            } => {
                let start_ns = self.commit_deadline;
                // Offset the target to where it will be when the committed
                // plan runs out and this maneuver actually starts.
                let t0 = (start_ns - now) as f64 / 1e9;
                let target_t0 = (*target as f64 + t0 * target_velocity).round() as i64;

                match compute_intercept(
                    &self.config,
                    self.commit_pos,
                    self.commit_vel,
                    target_t0,
                    *target_velocity,
                    *final_velocity,
                ) {
                    Ok(params) => (params, start_ns),
                    Err(e) => {
                        warn!(axis = %self.config.axis, error = %e, "rejecting intercept");
                        activity.handle.fail(e.to_string());
                        return Ok(Flow::Next);
                    }
                }
            }
            _ => unreachable!("plan_intercept on a non-intercept goal"),
        };

        if params.delta == 0 {
            self.emit_end(activity)?;
            return Ok(Flow::Next);
        }

        let times = match pulse_times_trapz(
            self.commit_vel,
            params.v_f,
            params.v_c,
            params.a_in,
            params.a_out,
            params.delta,
        ) {
            Ok(times) => times,
            Err(e) => {
                warn!(axis = %self.config.axis, error = %e, "rejecting intercept");
                activity.handle.fail(e.to_string());
                return Ok(Flow::Next);
            }
        };

        let dir = if params.delta > 0 {
            StepDir::Fwd
        } else {
            StepDir::Rev
        };

        let mut prev_deadline = start_ns;
        let mut first = true;
        for t in times {
            if activity.handle.canceled() {
                return Ok(Flow::Abort);
            }

            let deadline = start_ns + (t * 1e9) as i64;
            if !self.emit_nops_until(activity, deadline)? {
                return Ok(Flow::Abort);
            }

            let velocity = if first {
                self.commit_vel
            } else {
                dir.delta() as f64 * 1e9 / (deadline - prev_deadline).max(1) as f64
            };

            self.commit_deadline = deadline;
            self.commit_pos += dir.delta();
            self.commit_vel = velocity;
            self.emit(MotionEntry::Step {
                deadline_ns: deadline,
                dir,
                velocity,
            })?;

            prev_deadline = deadline;
            first = false;
        }

        self.emit_end(activity)?;
        Ok(Flow::Next)
    }

    fn plan_run_constant(&mut self, activity: &Arc<AxisActivity>) -> PlanResult {
        activity.handle.set_status(ActivityStatus::Active);

        let (velocity, goal_deadline) = match activity.goal {
            Goal::RunConstant {
                velocity,
                deadline_ns,
            } => (velocity, deadline_ns),
            _ => unreachable!("plan_run_constant on a non-run-constant goal"),
        };

        self.commit_deadline = self.commit_deadline.max(now_ns());

        if velocity == 0. {
            if self.commit_deadline < goal_deadline {
                if !self.emit_nops_until(activity, goal_deadline)? {
                    return Ok(Flow::Abort);
                }
                self.commit_deadline = goal_deadline;
                self.commit_vel = 0.;
                self.emit(MotionEntry::Step {
                    deadline_ns: goal_deadline,
                    dir: StepDir::Nop,
                    velocity: 0.,
                })?;
            }
            self.emit_end(activity)?;
            return Ok(Flow::Next);
        }

        let interval = (1e9 / velocity).abs();
        let dir = if velocity > 0. {
            StepDir::Fwd
        } else {
            StepDir::Rev
        };

        let mut done = false;
        while !done {
            if activity.handle.canceled() {
                return Ok(Flow::Abort);
            }

            // The last step is clamped onto the goal deadline so abutting
            // activities hand over at exactly the commanded time.
            let mut deadline = (self.commit_deadline as f64 + interval).round() as i64;
            if deadline > goal_deadline {
                done = true;
                deadline = goal_deadline;
            }

            if !self.emit_nops_until(activity, deadline)? {
                return Ok(Flow::Abort);
            }

            self.commit_deadline = deadline;
            self.commit_pos += dir.delta();
            self.commit_vel = velocity;
            self.emit(MotionEntry::Step {
                deadline_ns: deadline,
                dir,
                velocity,
            })?;
        }

        self.emit_end(activity)?;
        Ok(Flow::Next)
    }

    /// Replace the rest of a canceled activity's plan with a ramp from the
    /// committed velocity down to zero at the deceleration cap.
    fn plan_abort(&mut self, activity: &Arc<AxisActivity>) -> Result<(), SendError<MotionEntry>> {
        activity.handle.set_status(ActivityStatus::Aborting);

        self.commit_deadline = self.commit_deadline.max(now_ns());

        if self.commit_vel != 0. {
            let a_out = -self.config.max_decel.copysign(self.commit_vel);
            let steps = abort_ramp_steps(self.commit_vel, self.config.max_decel);
            let dir = if self.commit_vel > 0. {
                StepDir::Fwd
            } else {
                StepDir::Rev
            };

            let start = self.commit_deadline;
            let mut prev_deadline = start;
            let mut first = true;
            for t in pulse_times_linaccel(steps, self.commit_vel, a_out) {
                let deadline = start + (t * 1e9) as i64;
                // Steps clamped onto the turnaround share a deadline; the
                // axis is stopped there.
                let dt = deadline - prev_deadline;
                let velocity = if first {
                    self.commit_vel
                } else if dt <= 0 {
                    0.
                } else {
                    dir.delta() as f64 * 1e9 / dt as f64
                };

                self.commit_deadline = deadline;
                self.commit_pos += dir.delta();
                self.commit_vel = velocity;
                self.emit(MotionEntry::Step {
                    deadline_ns: deadline,
                    dir,
                    velocity,
                })?;

                prev_deadline = deadline;
                first = false;
            }
        }

        self.commit_vel = 0.;
        self.emit_end(activity)?;
        Ok(())
    }

    /// Interleave NOP entries so no gap between consecutive motion
    /// entries exceeds `max_interval_ns`. Returns false if the activity
    /// was canceled while filling.
    fn emit_nops_until(
        &mut self,
        activity: &Arc<AxisActivity>,
        to_ns: i64,
    ) -> Result<bool, SendError<MotionEntry>> {
        let mut deadline = self.commit_deadline + self.config.max_interval_ns;
        while deadline < to_ns {
            if activity.handle.canceled() {
                return Ok(false);
            }
            self.emit(MotionEntry::Step {
                deadline_ns: deadline,
                dir: StepDir::Nop,
                velocity: self.commit_vel,
            })?;
            deadline += self.config.max_interval_ns;
        }
        Ok(true)
    }

    fn emit(&self, entry: MotionEntry) -> Result<(), SendError<MotionEntry>> {
        self.motion.send(entry)
    }

    fn emit_end(&self, activity: &Arc<AxisActivity>) -> Result<(), SendError<MotionEntry>> {
        self.motion.send(MotionEntry::End(Arc::clone(activity)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_ramp_steps() {
        // Stopping distance v^2 / (2 d), rounded away from zero, plus one.
        assert_eq!(abort_ramp_steps(100., 200.), 26);
        assert_eq!(abort_ramp_steps(-100., 200.), -26);
        assert_eq!(abort_ramp_steps(99., 200.), 26); // 24.5 -> 25 + 1
        assert_eq!(abort_ramp_steps(0., 200.), 0);
    }
}
