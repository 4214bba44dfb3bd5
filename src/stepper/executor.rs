//! The executing worker of a stepper axis.
//!
//! Dequeues motion entries, sleeps until each deadline, fires the pulse
//! sink, and publishes the axis state. Activity sentinels are finalized
//! here so completion is observed only after every one of the activity's
//! pulses has actually run.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{AxisState, Goal, MotionEntry, StepperConfig};
use crate::pulse::StepDir;
use crate::util::{now_ns, nsleep};

pub(super) struct Executor {
    config: StepperConfig,
    motion: Receiver<MotionEntry>,
    state: Arc<Mutex<AxisState>>,
}

impl Executor {
    pub(super) fn new(
        config: StepperConfig,
        motion: Receiver<MotionEntry>,
        state: Arc<Mutex<AxisState>>,
    ) -> Self {
        Executor {
            config,
            motion,
            state,
        }
    }

    pub(super) fn run(self) {
        while let Ok(entry) = self.motion.recv() {
            match entry {
                MotionEntry::End(activity) => {
                    activity.handle.finalize();
                    if matches!(activity.goal, Goal::Stop) {
                        break;
                    }
                }
                MotionEntry::Step {
                    deadline_ns,
                    dir,
                    velocity,
                } => {
                    let mut sleep_ns = deadline_ns - now_ns();
                    if sleep_ns < self.config.min_sleep_ns {
                        if dir != StepDir::Nop {
                            warn!(
                                axis = %self.config.axis,
                                behind_s = -sleep_ns as f64 / 1e9,
                                "running behind"
                            );
                        }
                        sleep_ns = self.config.min_sleep_ns;
                    }
                    nsleep(sleep_ns);

                    if dir != StepDir::Nop {
                        self.config.pulse.pulse(self.config.axis, dir);
                    }

                    let mut state = self.state.lock().unwrap();
                    state.position += dir.delta();
                    state.velocity = velocity;
                }
            }
        }
        debug!(axis = %self.config.axis, "executor stopped");
    }
}
