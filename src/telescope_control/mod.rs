//! The telescope coordinator.
//!
//! Owns the two axis controllers and turns [`Command`]s from the outside
//! world into synchronized per-axis activity. Three long-lived threads:
//! a goal reader that swaps the current coordinator activity, a driver
//! that runs it (the track loop lives in [`track`]), and a publisher
//! that reports orientation whenever either axis has moved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::activity::{Activity, ActivityStatus};

pub use target::{resolve, NoEphemeris, ObservingLocation, Target, TargetOracle};
pub use units::StepperAxis;

use units::AxisUnit;

pub mod target;
mod track;
mod units;

/// Runway before the first intercept of a track, so the solver has a
/// stable start time to plan against.
const TRACK_RUNWAY_NS: i64 = 100_000_000;
/// Poll granularity while waiting on an activity group; cancellation is
/// observed at this latency.
const GROUP_WAIT_POLL: Duration = Duration::from_millis(500);
/// How long the driver gives each axis to drain on Stop.
const AXIS_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Control messages from the API surface.
#[derive(Debug, Clone)]
pub enum Command {
    Track(Target),
    Idle,
    Stop,
    /// Re-seat the offsets so the current pointing reads as these angles.
    /// Applied immediately; does not disturb the current goal.
    Calibrate { bearing: f64, dec: f64 },
    /// Nudge the offsets by whole steps.
    CalibrateRelSteps { bearing: i64, dec: i64 },
}

/// Published pointing, radians.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelescopeOrientation {
    pub bearing: f64,
    pub dec: f64,
}

pub struct TelescopeConfig {
    pub bearing_axis: StepperAxis,
    pub declination_axis: StepperAxis,
    pub location: ObservingLocation,
    /// Look-ahead used for target velocity sampling and steady-state
    /// segment length.
    pub predict_dt: Duration,
    pub publish_interval: Duration,
}

enum CoordGoal {
    Track(Target),
    Idle,
    Stop,
}

struct CoordActivity {
    handle: Activity,
    goal: CoordGoal,
}

pub(super) struct Shared {
    bearing: AxisUnit,
    dec: AxisUnit,
    location: ObservingLocation,
    oracle: Arc<dyn TargetOracle>,
    predict_dt: Duration,
    publish_interval: Duration,
    orientation_tx: watch::Sender<TelescopeOrientation>,
    target_tx: watch::Sender<Option<Target>>,
    stopping: AtomicBool,
}

impl Shared {
    fn orientation(&self) -> TelescopeOrientation {
        TelescopeOrientation {
            bearing: self.bearing.angle(),
            dec: self.dec.angle(),
        }
    }

    fn calibrate(&self, bearing: f64, dec: f64) {
        self.bearing.calibrate(bearing);
        self.dec.calibrate(dec);
        info!(bearing, dec, "calibrated");
        let _ = self.orientation_tx.send(self.orientation());
    }

    fn calibrate_rel(&self, bearing: i64, dec: i64) {
        self.bearing.calibrate_rel(bearing);
        self.dec.calibrate_rel(dec);
        debug!(bearing, dec, "calibration nudged");
        let _ = self.orientation_tx.send(self.orientation());
    }
}

/// Cloneable capability handed to API surfaces and bridges.
#[derive(Clone)]
pub struct TelescopeHandle {
    pub commands: Sender<Command>,
    pub orientation: watch::Receiver<TelescopeOrientation>,
    pub target: watch::Receiver<Option<Target>>,
    pub location: ObservingLocation,
}

pub struct TelescopeControl {
    shared: Arc<Shared>,
    command_tx: Sender<Command>,
    command_rx: Mutex<Option<Receiver<Command>>>,
    orientation_rx: watch::Receiver<TelescopeOrientation>,
    target_rx: watch::Receiver<Option<Target>>,
    threads: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl TelescopeControl {
    pub fn new(config: TelescopeConfig, oracle: Arc<dyn TargetOracle>) -> Self {
        let bearing = AxisUnit::new(config.bearing_axis);
        let dec = AxisUnit::new(config.declination_axis);

        let initial = TelescopeOrientation {
            bearing: bearing.angle(),
            dec: dec.angle(),
        };
        let (orientation_tx, orientation_rx) = watch::channel(initial);
        let (target_tx, target_rx) = watch::channel(None);
        let (command_tx, command_rx) = mpsc::channel();

        TelescopeControl {
            shared: Arc::new(Shared {
                bearing,
                dec,
                location: config.location,
                oracle,
                predict_dt: config.predict_dt,
                publish_interval: config.publish_interval,
                orientation_tx,
                target_tx,
                stopping: AtomicBool::new(false),
            }),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            orientation_rx,
            target_rx,
            threads: Mutex::new(None),
        }
    }

    /// Start the axis workers and the coordinator threads. Idempotent.
    pub fn start(&self) {
        let mut threads = self.threads.lock().unwrap();
        if threads.is_some() {
            return;
        }
        let command_rx = match self.command_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => return,
        };

        self.shared.bearing.stepper.start();
        self.shared.dec.stepper.start();

        let (driver_tx, driver_rx) = mpsc::channel();

        let reader_shared = Arc::clone(&self.shared);
        let driver_shared = Arc::clone(&self.shared);
        let publisher_shared = Arc::clone(&self.shared);

        *threads = Some(vec![
            thread::spawn(move || run_reader(reader_shared, command_rx, driver_tx)),
            thread::spawn(move || run_driver(driver_shared, driver_rx)),
            thread::spawn(move || run_publisher(publisher_shared)),
        ]);
        info!("telescope control started");
    }

    pub fn handle(&self) -> TelescopeHandle {
        TelescopeHandle {
            commands: self.command_tx.clone(),
            orientation: self.orientation_rx.clone(),
            target: self.target_rx.clone(),
            location: self.shared.location,
        }
    }

    /// Send a command; false if the coordinator has already stopped.
    pub fn send(&self, command: Command) -> bool {
        self.command_tx.send(command).is_ok()
    }

    pub fn orientation(&self) -> TelescopeOrientation {
        self.shared.orientation()
    }

    pub fn orientation_watch(&self) -> watch::Receiver<TelescopeOrientation> {
        self.orientation_rx.clone()
    }

    pub fn target_watch(&self) -> watch::Receiver<Option<Target>> {
        self.target_rx.clone()
    }

    /// Stop everything and join the coordinator threads. On a blown
    /// deadline the remaining threads are detached with an error logged.
    pub fn stop(&self, timeout: Duration) {
        let _ = self.command_tx.send(Command::Stop);

        let threads = self.threads.lock().unwrap().take();
        let threads = match threads {
            Some(threads) => threads,
            None => return,
        };

        let deadline = Instant::now() + timeout;
        for handle in threads {
            if Instant::now() > deadline {
                error!("timed out joining telescope control; detaching");
                return;
            }
            let _ = handle.join();
        }
        info!("telescope control stopped");
    }
}

/// Reads the command channel. New goals cancel the current coordinator
/// activity and replace it; calibration is applied in place.
fn run_reader(shared: Arc<Shared>, commands: Receiver<Command>, driver: Sender<CoordActivity>) {
    let mut current: Option<Activity> = None;

    let submit = |goal: CoordGoal, current: &mut Option<Activity>| {
        if let Some(prev) = current.take() {
            prev.cancel();
        }
        let handle = Activity::new();
        if driver
            .send(CoordActivity {
                handle: handle.clone(),
                goal,
            })
            .is_err()
        {
            handle.fail("coordinator driver stopped");
        }
        *current = Some(handle);
    };

    while let Ok(command) = commands.recv() {
        match command {
            Command::Calibrate { bearing, dec } => shared.calibrate(bearing, dec),
            Command::CalibrateRelSteps { bearing, dec } => shared.calibrate_rel(bearing, dec),
            Command::Track(target) => {
                let _ = shared.target_tx.send(Some(target.clone()));
                submit(CoordGoal::Track(target), &mut current);
            }
            Command::Idle => {
                let _ = shared.target_tx.send(None);
                submit(CoordGoal::Idle, &mut current);
            }
            Command::Stop => {
                shared.stopping.store(true, Ordering::SeqCst);
                submit(CoordGoal::Stop, &mut current);
                break;
            }
        }
    }
    debug!("goal reader stopped");
}

/// Runs coordinator activities one at a time.
fn run_driver(shared: Arc<Shared>, activities: Receiver<CoordActivity>) {
    while let Ok(activity) = activities.recv() {
        match &activity.goal {
            CoordGoal::Idle => {
                // The reader already cancelled whatever was running, which
                // decelerates the axes; idling issues no motion of its own.
                activity.handle.set_status(ActivityStatus::Active);
                activity.handle.finalize();
            }
            CoordGoal::Stop => {
                activity.handle.set_status(ActivityStatus::Active);
                shared.bearing.stepper.stop(Some(AXIS_STOP_TIMEOUT));
                shared.dec.stepper.stop(Some(AXIS_STOP_TIMEOUT));
                activity.handle.finalize();
                break;
            }
            CoordGoal::Track(target) => track::run_track(&shared, &activity.handle, target),
        }
    }
    debug!("driver stopped");
}

/// Publishes orientation at the configured interval whenever either
/// axis's steps changed since the last publication.
fn run_publisher(shared: Arc<Shared>) {
    let mut last: Option<(i64, i64)> = None;
    while !shared.stopping.load(Ordering::SeqCst) {
        thread::sleep(shared.publish_interval);
        let steps = (
            shared.bearing.orientation_steps(),
            shared.dec.orientation_steps(),
        );
        if last != Some(steps) {
            let _ = shared.orientation_tx.send(shared.orientation());
            last = Some(steps);
        }
    }
    debug!("publisher stopped");
}
