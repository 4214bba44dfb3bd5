//! Per-axis stepper controller.
//!
//! A [`Stepper`] turns high-level goals (intercept a moving step target,
//! run at constant velocity, idle, stop) into a precisely timed stream of
//! pulses on its [`PulseSink`]. Internally a planner thread consumes
//! goals one at a time and commits `(deadline, direction)` entries into a
//! bounded motion queue; an executor thread sleeps each entry out and
//! fires the pulse. The planner runs ahead of the executor by the queue
//! depth, so cancellation and replanning stay responsive.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::error;

use crate::activity::{Activity, ActivityStatus};
use crate::errors::MotionResult;
use crate::motion::trapz_intercept;
use crate::pulse::{MountAxis, PulseSink, StepDir};

use executor::Executor;
use planner::Planner;

mod executor;
mod planner;

/// Entries the planner keeps in flight ahead of the executor.
const MOTION_QUEUE_DEPTH: usize = 4;

/// Immutable per-axis settings.
#[derive(Clone)]
pub struct StepperConfig {
    /// Sleep budgets below this are treated as "immediate"; the executor
    /// floors at this value and logs that it is running behind.
    pub min_sleep_ns: i64,
    /// Speed cap, steps/s.
    pub max_speed: f64,
    /// Acceleration cap, steps/s^2.
    pub max_accel: f64,
    /// Deceleration cap, steps/s^2.
    pub max_decel: f64,
    /// Upper bound between consecutive motion-queue entries. The planner
    /// interleaves NOPs at this spacing so the executor keeps waking and
    /// cancellation stays prompt.
    pub max_interval_ns: i64,
    pub axis: MountAxis,
    pub pulse: Arc<dyn PulseSink>,
}

impl std::fmt::Debug for StepperConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepperConfig")
            .field("min_sleep_ns", &self.min_sleep_ns)
            .field("max_speed", &self.max_speed)
            .field("max_accel", &self.max_accel)
            .field("max_decel", &self.max_decel)
            .field("max_interval_ns", &self.max_interval_ns)
            .field("axis", &self.axis)
            .finish()
    }
}

/// A solved intercept, ready to be replayed without recomputation.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct InterceptParams {
    /// Whole steps to the intercept point.
    pub delta: i64,
    /// Elapsed maneuver time, seconds.
    pub t: f64,
    /// Cruise velocity, steps/s.
    pub v_c: f64,
    pub a_in: f64,
    pub a_out: f64,
    /// Final position, steps.
    pub p_f: i64,
    /// Final velocity, steps/s.
    pub v_f: f64,
}

/// Solve the trapezoidal intercept from `(position, velocity)` to a
/// target at `target` steps moving at `target_velocity` steps/s, ending
/// at `final_velocity`. `a_in` takes the sign of the displacement,
/// `a_out` the opposite.
pub fn compute_intercept(
    config: &StepperConfig,
    position: i64,
    velocity: f64,
    target: i64,
    target_velocity: f64,
    final_velocity: f64,
) -> MotionResult<InterceptParams> {
    let scratch_delta = target - position;

    if scratch_delta == 0 {
        return Ok(InterceptParams {
            delta: 0,
            t: 0.,
            v_c: 0.,
            a_in: 0.,
            a_out: 0.,
            p_f: position,
            v_f: final_velocity,
        });
    }

    let a_in = config.max_accel.copysign(scratch_delta as f64);
    let a_out = -config.max_decel.copysign(scratch_delta as f64);

    let info = trapz_intercept(
        config.max_speed,
        a_in,
        a_out,
        position as f64,
        velocity,
        final_velocity,
        target as f64,
        target_velocity,
    )?;

    let p_f = info.p_f.round() as i64;
    Ok(InterceptParams {
        delta: p_f - position,
        t: info.t,
        v_c: info.v_c,
        a_in,
        a_out,
        p_f,
        v_f: final_velocity,
    })
}

/// What an activity asks the axis to do.
#[derive(Debug, Clone)]
pub(crate) enum Goal {
    Intercept {
        target: i64,
        target_velocity: f64,
        final_velocity: f64,
    },
    InterceptPrecomputed {
        params: InterceptParams,
        start_ns: i64,
    },
    RunConstant {
        velocity: f64,
        deadline_ns: i64,
    },
    Idle,
    Stop,
}

pub(crate) struct AxisActivity {
    pub(crate) handle: Activity,
    pub(crate) goal: Goal,
}

/// One slot of the motion queue: a timed (possibly NOP) step, or the
/// sentinel closing out an activity's entries.
pub(crate) enum MotionEntry {
    Step {
        deadline_ns: i64,
        dir: StepDir,
        /// The planner's committed velocity at this entry; the executor
        /// publishes it together with the position update.
        velocity: f64,
    },
    End(Arc<AxisActivity>),
}

pub(crate) struct AxisState {
    pub(crate) position: i64,
    pub(crate) velocity: f64,
}

struct Workers {
    plan: JoinHandle<()>,
    run: JoinHandle<()>,
}

pub struct Stepper {
    config: StepperConfig,
    state: Arc<Mutex<AxisState>>,
    activity_tx: mpsc::Sender<Arc<AxisActivity>>,
    activity_rx: Mutex<Option<mpsc::Receiver<Arc<AxisActivity>>>>,
    workers: Mutex<Option<Workers>>,
}

impl Stepper {
    pub fn new(config: StepperConfig) -> Self {
        let (activity_tx, activity_rx) = mpsc::channel();
        Stepper {
            config,
            state: Arc::new(Mutex::new(AxisState {
                position: 0,
                velocity: 0.,
            })),
            activity_tx,
            activity_rx: Mutex::new(Some(activity_rx)),
            workers: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &StepperConfig {
        &self.config
    }

    /// Executed position, steps from zero.
    pub fn position(&self) -> i64 {
        self.state.lock().unwrap().position
    }

    /// Executed velocity, steps/s.
    pub fn velocity(&self) -> f64 {
        self.state.lock().unwrap().velocity
    }

    /// Start the planner and executor workers. Idempotent; a stepper that
    /// has been stopped stays stopped.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap();
        if workers.is_some() {
            return;
        }
        let activity_rx = match self.activity_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => return,
        };

        let (motion_tx, motion_rx) = mpsc::sync_channel(MOTION_QUEUE_DEPTH);

        let planner = Planner::new(
            self.config.clone(),
            activity_rx,
            motion_tx,
            Arc::clone(&self.state),
        );
        let executor = Executor::new(self.config.clone(), motion_rx, Arc::clone(&self.state));

        *workers = Some(Workers {
            plan: thread::spawn(move || planner.run()),
            run: thread::spawn(move || executor.run()),
        });
    }

    /// Move to `target` and end at `final_velocity` (usually zero).
    pub fn goto(&self, target: i64, final_velocity: f64) -> Activity {
        self.intercept_with_final(target, 0., final_velocity)
    }

    /// Intercept a target moving at `target_velocity`, matching its
    /// velocity at arrival.
    pub fn intercept(&self, target: i64, target_velocity: f64) -> Activity {
        self.intercept_with_final(target, target_velocity, target_velocity)
    }

    pub fn intercept_with_final(
        &self,
        target: i64,
        target_velocity: f64,
        final_velocity: f64,
    ) -> Activity {
        if target_velocity.abs() >= self.config.max_speed {
            return Activity::rejected(format!(
                "target velocity {} is at or beyond the speed limit {}",
                target_velocity, self.config.max_speed
            ));
        }
        self.put(Goal::Intercept {
            target,
            target_velocity,
            final_velocity,
        })
    }

    /// Fast path: replay an already-solved intercept whose pulse deadlines
    /// are measured from `start_ns`.
    pub fn intercept_precomputed(&self, params: InterceptParams, start_ns: i64) -> Activity {
        self.put(Goal::InterceptPrecomputed { params, start_ns })
    }

    /// Run at `velocity` steps/s until `deadline_ns`.
    pub fn run_constant(&self, velocity: f64, deadline_ns: i64) -> Activity {
        if velocity.abs() > self.config.max_speed {
            return Activity::rejected(format!(
                "velocity {} is beyond the speed limit {}",
                velocity, self.config.max_speed
            ));
        }
        self.put(Goal::RunConstant {
            velocity,
            deadline_ns,
        })
    }

    pub fn idle(&self) -> Activity {
        self.put(Goal::Idle)
    }

    /// Enqueue a terminating goal and join the workers. Queued goals run
    /// to completion first; cancel them beforehand for a prompt stop. On
    /// timeout the workers are detached and an error is logged.
    pub fn stop(&self, timeout: Option<Duration>) {
        let workers = self.workers.lock().unwrap().take();
        let workers = match workers {
            Some(w) => w,
            None => return,
        };

        let activity = self.put(Goal::Stop);
        if !activity.wait_for(ActivityStatus::done, timeout) {
            error!(axis = %self.config.axis, "timed out stopping axis; detaching workers");
            return;
        }
        for handle in [workers.plan, workers.run] {
            let _ = handle.join();
        }
    }

    fn put(&self, goal: Goal) -> Activity {
        let handle = Activity::new();
        let activity = Arc::new(AxisActivity {
            handle: handle.clone(),
            goal,
        });
        if self.activity_tx.send(activity).is_err() {
            handle.fail("stepper is stopped");
        }
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::now_ns;
    use std::time::Instant;

    struct RecordingSink(Mutex<Vec<(Instant, StepDir)>>);

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(RecordingSink(Mutex::new(Vec::new())))
        }

        fn pulses(&self) -> Vec<(Instant, StepDir)> {
            self.0.lock().unwrap().clone()
        }
    }

    impl PulseSink for RecordingSink {
        fn pulse(&self, _axis: MountAxis, direction: StepDir) {
            self.0.lock().unwrap().push((Instant::now(), direction));
        }
    }

    fn config(sink: Arc<RecordingSink>, max_accel: f64) -> StepperConfig {
        StepperConfig {
            min_sleep_ns: 50_000,
            max_speed: 2000.,
            max_accel,
            max_decel: max_accel,
            max_interval_ns: 250_000_000,
            axis: MountAxis::Bearing,
            pulse: sink,
        }
    }

    #[test]
    fn test_run_constant_pure_tracking() {
        let sink = RecordingSink::new();
        let stepper = Stepper::new(config(Arc::clone(&sink), 200.));
        stepper.start();

        let activity = stepper.run_constant(100., now_ns() + 1_000_000_000);
        assert!(activity.wait_for(ActivityStatus::done, Some(Duration::from_secs(3))));
        assert_eq!(activity.status(), ActivityStatus::Complete);

        let pulses = sink.pulses();
        assert_eq!(pulses.len(), 100);
        assert!(pulses.iter().all(|(_, d)| *d == StepDir::Fwd));
        assert_eq!(stepper.position(), 100);
        assert!((stepper.velocity() - 100.).abs() < 1.);

        // Evenly spaced at ~10 ms; allow scheduler jitter.
        for pair in pulses.windows(2) {
            let gap = pair[1].0 - pair[0].0;
            assert!(gap >= Duration::from_micros(50), "gap {:?}", gap);
            assert!(gap <= Duration::from_millis(100), "gap {:?}", gap);
        }
        let span = pulses[99].0 - pulses[0].0;
        assert!(span >= Duration::from_millis(900), "span {:?}", span);
        assert!(span <= Duration::from_millis(1300), "span {:?}", span);

        stepper.stop(Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_goto_stationary_point() {
        let sink = RecordingSink::new();
        // High accel keeps the maneuver around a second.
        let stepper = Stepper::new(config(Arc::clone(&sink), 2000.));
        stepper.start();

        let activity = stepper.goto(500, 0.);
        assert!(activity.wait_for(ActivityStatus::done, Some(Duration::from_secs(5))));
        assert_eq!(activity.status(), ActivityStatus::Complete);

        assert_eq!(stepper.position(), 500);
        // Final velocity is quantized by the last step interval (~31 steps/s
        // at this accel).
        assert!(stepper.velocity().abs() < 40.);
        assert_eq!(sink.pulses().len(), 500);

        stepper.stop(Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_goto_reverse() {
        let sink = RecordingSink::new();
        let stepper = Stepper::new(config(Arc::clone(&sink), 2000.));
        stepper.start();

        let activity = stepper.goto(-200, 0.);
        assert!(activity.wait_for(ActivityStatus::done, Some(Duration::from_secs(5))));
        assert_eq!(stepper.position(), -200);
        assert!(sink.pulses().iter().all(|(_, d)| *d == StepDir::Rev));

        stepper.stop(Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_intercept_moving_target() {
        let sink = RecordingSink::new();
        let stepper = Stepper::new(config(Arc::clone(&sink), 2000.));
        stepper.start();

        let params = compute_intercept(stepper.config(), 0, 0., 1000, 100., 100.).unwrap();
        // The target moves during the maneuver, so we land past it.
        assert!(params.p_f > 1000);

        let activity = stepper.intercept(1000, 100.);
        assert!(activity.wait_for(ActivityStatus::done, Some(Duration::from_secs(10))));
        assert_eq!(activity.status(), ActivityStatus::Complete);

        // The live plan solved from a commit deadline a hair later than our
        // reference solve; positions agree to within the drift of a step.
        assert!((stepper.position() - params.p_f).abs() <= 2);
        assert!((stepper.velocity() - 100.).abs() < 2.);

        stepper.stop(Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_cancel_mid_flight() {
        let sink = RecordingSink::new();
        let stepper = Stepper::new(config(Arc::clone(&sink), 200.));
        stepper.start();

        // ~3.16 s maneuver; cancel a few hundred ms in.
        let activity = stepper.goto(500, 0.);
        std::thread::sleep(Duration::from_millis(300));
        activity.cancel();

        assert!(activity.wait_for(ActivityStatus::done, Some(Duration::from_secs(3))));
        assert_eq!(activity.status(), ActivityStatus::Aborted);
        assert_eq!(stepper.velocity(), 0.);

        let position = stepper.position();
        assert!(position > 0, "position {}", position);
        assert!(position < 500, "position {}", position);

        stepper.stop(Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_cancel_before_pick() {
        let sink = RecordingSink::new();
        let stepper = Stepper::new(config(Arc::clone(&sink), 200.));

        let activity = stepper.goto(500, 0.);
        activity.cancel();
        stepper.start();

        assert!(activity.wait_for(ActivityStatus::done, Some(Duration::from_secs(2))));
        assert_eq!(activity.status(), ActivityStatus::Aborted);
        // Never moving, so the abort ramp is empty.
        assert_eq!(stepper.position(), 0);

        stepper.stop(Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_run_constant_zero_velocity_is_timed_nop() {
        let sink = RecordingSink::new();
        let stepper = Stepper::new(config(Arc::clone(&sink), 200.));
        stepper.start();

        let start = Instant::now();
        let activity = stepper.run_constant(0., now_ns() + 600_000_000);
        assert!(activity.wait_for(ActivityStatus::done, Some(Duration::from_secs(3))));
        assert_eq!(activity.status(), ActivityStatus::Complete);
        assert!(start.elapsed() >= Duration::from_millis(550));
        assert!(sink.pulses().is_empty());
        assert_eq!(stepper.position(), 0);

        stepper.stop(Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_rejects_fast_goals_synchronously() {
        let sink = RecordingSink::new();
        let stepper = Stepper::new(config(Arc::clone(&sink), 200.));

        let activity = stepper.run_constant(5000., now_ns() + 1_000_000_000);
        assert_eq!(activity.status(), ActivityStatus::Aborted);
        assert!(activity.fail_reason().is_some());

        let activity = stepper.intercept(1000, 2000.);
        assert_eq!(activity.status(), ActivityStatus::Aborted);
    }

    #[test]
    fn test_idle_completes() {
        let sink = RecordingSink::new();
        let stepper = Stepper::new(config(Arc::clone(&sink), 200.));
        stepper.start();

        let activity = stepper.idle();
        assert!(activity.wait_for(ActivityStatus::done, Some(Duration::from_secs(2))));
        assert_eq!(activity.status(), ActivityStatus::Complete);

        stepper.stop(Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_goals_after_stop_are_rejected() {
        let sink = RecordingSink::new();
        let stepper = Stepper::new(config(Arc::clone(&sink), 200.));
        stepper.start();
        stepper.stop(Some(Duration::from_secs(2)));

        let activity = stepper.run_constant(10., now_ns() + 100_000_000);
        assert_eq!(activity.status(), ActivityStatus::Aborted);
        assert_eq!(activity.fail_reason().as_deref(), Some("stepper is stopped"));
    }

    #[test]
    fn test_compute_intercept_zero_delta() {
        let sink = RecordingSink::new();
        let config = config(sink, 200.);
        let params = compute_intercept(&config, 42, 0., 42, 5., 5.).unwrap();
        assert_eq!(params.delta, 0);
        assert_eq!(params.p_f, 42);
        assert_eq!(params.t, 0.);
    }
}
