use std::error::Error;
use std::fmt::{Display, Formatter};
use std::{fmt, result};

pub type MotionResult<T> = result::Result<T, MotionError>;

/// Failures of the trapezoidal intercept solver and the pulse-time
/// generators. All of these reject a goal; none of them abort the axis.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionError {
    /// A requested or target velocity is at or beyond the axis speed cap.
    SpeedLimit { velocity: f64, max_speed: f64 },
    /// No intercept exists: the cruise-velocity expression has no real
    /// root, or both roots give a negative maneuver time.
    Unreachable,
    /// Phase discretization produced an impossible cruise segment
    /// (truncated accel phases overrun the displacement, or a nonzero
    /// cruise at zero cruise velocity).
    DegenerateCruise {
        steps_in: i64,
        steps_out: i64,
        steps: i64,
    },
}

impl Display for MotionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MotionError::SpeedLimit {
                velocity,
                max_speed,
            } => write!(
                f,
                "velocity {} exceeds axis speed limit {}",
                velocity, max_speed
            ),
            MotionError::Unreachable => {
                write!(f, "target cannot be intercepted within the axis limits")
            }
            MotionError::DegenerateCruise {
                steps_in,
                steps_out,
                steps,
            } => write!(
                f,
                "degenerate cruise phase: accel {} + decel {} steps over {} total",
                steps_in, steps_out, steps
            ),
        }
    }
}

impl Error for MotionError {}

pub type ControlResult<T> = result::Result<T, ControlError>;

/// Coordinator-level failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlError {
    /// A goal was rejected before any motion was issued.
    InvalidGoal(String),
    /// The target oracle could not produce a coordinate.
    Ephemeris(String),
}

impl Display for ControlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::InvalidGoal(msg) => write!(f, "invalid goal: {}", msg),
            ControlError::Ephemeris(msg) => write!(f, "ephemeris error: {}", msg),
        }
    }
}

impl Error for ControlError {}

impl From<MotionError> for ControlError {
    fn from(e: MotionError) -> Self {
        ControlError::InvalidGoal(e.to_string())
    }
}
