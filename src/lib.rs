//! Motion-control core for a two-axis stepper-driven telescope mount.
//!
//! The mount continuously points at a celestial target as it drifts with
//! Earth rotation (and, for Solar-System bodies, its own ephemeris
//! motion). Three subsystems cooperate:
//!
//! - [`stepper`]: per-axis controllers translating intercept/track goals
//!   into precisely timed pulse streams under velocity and acceleration
//!   caps;
//! - [`motion`]: the closed-form trapezoidal-intercept solver backing
//!   them;
//! - [`telescope_control`]: the coordinator owning both axes, sampling
//!   the target, and keeping the axes synchronized.
//!
//! Around the core: [`stellarium`] speaks the Stellarium telescope
//! protocol over TCP, [`config`] loads the mount description, and
//! [`pulse`] abstracts the step-pulse hardware.

pub mod activity;
pub mod astro_math;
pub mod config;
pub mod errors;
pub mod motion;
pub mod pulse;
pub mod stellarium;
pub mod stepper;
pub mod telescope_control;
pub mod util;

pub use activity::{Activity, ActivityStatus};
pub use config::Config;
pub use telescope_control::{
    Command, TelescopeControl, TelescopeHandle, TelescopeOrientation,
};
