use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use tracing::debug;

/// The two mount axes.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountAxis {
    /// Hour angle / bearing
    Bearing,
    /// Declination
    Declination,
}

impl Display for MountAxis {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MountAxis::Bearing => "bearing",
            MountAxis::Declination => "dec",
        })
    }
}

/// Direction of a single step pulse.
#[derive(Debug, Eq, PartialEq, Copy, Clone, IntoPrimitive, TryFromPrimitive)]
#[repr(i8)]
pub enum StepDir {
    Fwd = 1,
    Nop = 0,
    Rev = -1,
}

impl StepDir {
    #[inline]
    pub fn delta(self) -> i64 {
        i8::from(self) as i64
    }
}

/// Something that can wiggle a stepper driver's pulse line.
///
/// Called at most once per scheduled pulse, best-effort within
/// `min_sleep_ns` of the deadline. Infallible at the call site: sinks log
/// their own failures and the executor carries on. Implementations must be
/// reentrant-safe if both axes share underlying I/O lines.
pub trait PulseSink: Send + Sync {
    fn pulse(&self, axis: MountAxis, direction: StepDir);
}

/// Log-only sink for running without hardware attached.
#[derive(Debug, Default, Copy, Clone)]
pub struct LogPulse;

impl PulseSink for LogPulse {
    fn pulse(&self, axis: MountAxis, direction: StepDir) {
        debug!(%axis, dir = direction.delta(), "pulse");
    }
}
