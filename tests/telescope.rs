use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use pi_mount_control::errors::ControlResult;
use pi_mount_control::pulse::{LogPulse, MountAxis};
use pi_mount_control::stepper::StepperConfig;
use pi_mount_control::telescope_control::{
    Command, NoEphemeris, ObservingLocation, StepperAxis, Target, TargetOracle, TelescopeConfig,
    TelescopeControl,
};

const APS: f64 = TAU / 3600.;

/// Oracle pinned to one mount-frame coordinate; the target does not move.
struct PinnedOracle {
    ha: f64,
    dec: f64,
}

impl TargetOracle for PinnedOracle {
    fn coordinate(
        &self,
        _target: &Target,
        _time: DateTime<Utc>,
        _location: &ObservingLocation,
    ) -> ControlResult<(f64, f64)> {
        Ok((self.ha, self.dec))
    }
}

fn axis(mount_axis: MountAxis, max_accel: f64) -> StepperAxis {
    StepperAxis {
        motor_steps: 3600,
        gear_ratio: 1.,
        config: StepperConfig {
            min_sleep_ns: 50_000,
            max_speed: 2000.,
            max_accel,
            max_decel: max_accel,
            max_interval_ns: 250_000_000,
            axis: mount_axis,
            pulse: Arc::new(LogPulse),
        },
    }
}

fn config(max_accel: f64) -> TelescopeConfig {
    TelescopeConfig {
        bearing_axis: axis(MountAxis::Bearing, max_accel),
        declination_axis: axis(MountAxis::Declination, max_accel),
        location: ObservingLocation::default(),
        predict_dt: Duration::from_secs(30),
        publish_interval: Duration::from_millis(50),
    }
}

fn body() -> Target {
    Target::SolarSystemBody {
        name: "mars".to_string(),
    }
}

#[test]
fn test_track_acquires_and_holds_target() {
    let oracle = PinnedOracle {
        ha: 300. * APS,
        dec: -120. * APS,
    };
    let control = TelescopeControl::new(config(2000.), Arc::new(oracle));
    control.start();

    assert!(control.send(Command::Track(body())));
    // The slew is under a second at this accel; leave slack for the
    // runway and scheduling.
    std::thread::sleep(Duration::from_secs(2));

    let orientation = control.orientation();
    assert!(
        (orientation.bearing - 300. * APS).abs() < 3. * APS,
        "bearing {}",
        orientation.bearing
    );
    assert!(
        (orientation.dec + 120. * APS).abs() < 3. * APS,
        "dec {}",
        orientation.dec
    );

    // The publisher saw the axes move and pushed the pointing out.
    let published = *control.orientation_watch().borrow();
    assert!((published.bearing - 300. * APS).abs() < 3. * APS);

    // The target is pinned in the mount frame, so steady-state tracking
    // holds still.
    std::thread::sleep(Duration::from_millis(500));
    let later = control.orientation();
    assert_eq!(later, control.orientation());
    assert!((later.bearing - orientation.bearing).abs() < 2. * APS);

    control.stop(Duration::from_secs(15));
}

#[test]
fn test_target_publication() {
    let control = TelescopeControl::new(
        config(2000.),
        Arc::new(PinnedOracle { ha: 0., dec: 0. }),
    );
    control.start();

    let target_watch = control.target_watch();
    assert_eq!(*target_watch.borrow(), None);

    control.send(Command::Track(body()));
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(*target_watch.borrow(), Some(body()));

    control.send(Command::Idle);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(*target_watch.borrow(), None);

    control.stop(Duration::from_secs(15));
}

#[test]
fn test_calibrate_commands() {
    let control = TelescopeControl::new(config(200.), Arc::new(NoEphemeris));
    control.start();

    control.send(Command::Calibrate {
        bearing: 1.0,
        dec: -0.5,
    });
    std::thread::sleep(Duration::from_millis(300));

    let orientation = control.orientation();
    assert!((orientation.bearing - 1.0).abs() <= APS / 2.);
    assert!((orientation.dec + 0.5).abs() <= APS / 2.);

    control.send(Command::CalibrateRelSteps { bearing: 10, dec: 0 });
    std::thread::sleep(Duration::from_millis(300));

    let nudged = control.orientation();
    assert!((nudged.bearing - orientation.bearing - 10. * APS).abs() < APS / 10.);
    assert_eq!(nudged.dec, orientation.dec);

    control.stop(Duration::from_secs(15));
}

#[test]
fn test_idle_aborts_slew() {
    // Slow accel makes the slew take several seconds.
    let oracle = PinnedOracle {
        ha: 1500. * APS,
        dec: 0.,
    };
    let control = TelescopeControl::new(config(200.), Arc::new(oracle));
    control.start();

    control.send(Command::Track(body()));
    std::thread::sleep(Duration::from_secs(1));
    control.send(Command::Idle);

    // Cancellation decelerates the bearing axis; give the ramp time to
    // play out, then the mount must hold still short of the target.
    std::thread::sleep(Duration::from_secs(3));
    let first = control.orientation();
    std::thread::sleep(Duration::from_millis(400));
    let second = control.orientation();

    assert_eq!(first, second);
    assert!(first.bearing > 0.);
    assert!(first.bearing < 1500. * APS);

    control.stop(Duration::from_secs(15));
}
