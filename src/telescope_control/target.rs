use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::astro_math;
use crate::errors::{ControlError, ControlResult};

/* Location */
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ObservingLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
}

impl Default for ObservingLocation {
    fn default() -> Self {
        Self {
            latitude: 51.47,
            longitude: 0.0,
            elevation: 15.0,
        }
    }
}

/// What the mount should point at.
///
/// A target is a pure description; resolving it to mount angles happens
/// through [`resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum Target {
    /// A fixed point on the celestial sphere. Radians.
    FixedSky { ra: f64, dec: f64 },
    /// A major Solar-System body, tracked by name through the oracle.
    SolarSystemBody { name: String },
    /// Anything an external ephemeris service can answer for.
    EphemerisQuery { name: String },
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Target::FixedSky { ra, dec } => write!(f, "fixed ra={:.6} dec={:.6}", ra, dec),
            Target::SolarSystemBody { name } => write!(f, "body {}", name),
            Target::EphemerisQuery { name } => write!(f, "ephemeris {}", name),
        }
    }
}

/// Externally supplied coordinate oracle: given a target and a time,
/// yields `(hour_angle, declination)` in radians.
pub trait TargetOracle: Send + Sync {
    fn coordinate(
        &self,
        target: &Target,
        time: DateTime<Utc>,
        location: &ObservingLocation,
    ) -> ControlResult<(f64, f64)>;
}

/// Oracle for setups with no ephemeris service attached. Fixed-sky
/// targets never reach the oracle, so those still work.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoEphemeris;

impl TargetOracle for NoEphemeris {
    fn coordinate(
        &self,
        target: &Target,
        _time: DateTime<Utc>,
        _location: &ObservingLocation,
    ) -> ControlResult<(f64, f64)> {
        Err(ControlError::Ephemeris(format!(
            "no ephemeris source configured for {}",
            target
        )))
    }
}

/// Resolve a target to `(hour_angle, declination)` radians at `time`.
///
/// Fixed-sky targets are answered locally through sidereal time; the rest
/// go to the oracle.
pub fn resolve(
    oracle: &dyn TargetOracle,
    target: &Target,
    time: DateTime<Utc>,
    location: &ObservingLocation,
) -> ControlResult<(f64, f64)> {
    match target {
        Target::FixedSky { ra, dec } => Ok((
            astro_math::ra_to_hour_angle(time, location.longitude, *ra),
            *dec,
        )),
        other => oracle.coordinate(other, time, location),
    }
}
