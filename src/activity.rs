use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ActivityStatus {
    Pending,
    Active,
    Complete,
    Aborting,
    Aborted,
}

impl ActivityStatus {
    pub fn running(self) -> bool {
        matches!(self, ActivityStatus::Active | ActivityStatus::Aborting)
    }

    pub fn done(self) -> bool {
        matches!(self, ActivityStatus::Complete | ActivityStatus::Aborted)
    }
}

#[derive(Debug)]
struct ActivityState {
    status: ActivityStatus,
    canceled: bool,
    reason: Option<String>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ActivityState>,
    cond: Condvar,
}

/// A cancellable unit of work with an observable lifecycle.
///
/// Handles are cheap to clone; every clone refers to the same activity.
/// Callers observe progress with [`Activity::wait_for`] and request
/// cancellation with [`Activity::cancel`]; the owning worker drives the
/// status through `Pending -> Active -> Complete` (or the `Aborting ->
/// Aborted` branch).
#[derive(Debug, Clone)]
pub struct Activity(Arc<Shared>);

impl Activity {
    pub(crate) fn new() -> Self {
        Activity(Arc::new(Shared {
            state: Mutex::new(ActivityState {
                status: ActivityStatus::Pending,
                canceled: false,
                reason: None,
            }),
            cond: Condvar::new(),
        }))
    }

    /// An activity that was rejected before it was ever enqueued.
    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        let activity = Self::new();
        activity.fail(reason);
        activity
    }

    pub fn status(&self) -> ActivityStatus {
        self.0.state.lock().unwrap().status
    }

    /// The rejection reason, if the activity was aborted with one.
    pub fn fail_reason(&self) -> Option<String> {
        self.0.state.lock().unwrap().reason.clone()
    }

    /// Request cancellation. The flag is one-way; workers observe it at
    /// their next check point.
    pub fn cancel(&self) {
        let mut state = self.0.state.lock().unwrap();
        state.canceled = true;
        self.0.cond.notify_all();
    }

    pub fn canceled(&self) -> bool {
        self.0.state.lock().unwrap().canceled
    }

    /// Block until `pred(status)` holds or the timeout elapses. Returns
    /// whether the predicate was satisfied.
    pub fn wait_for<F>(&self, pred: F, timeout: Option<Duration>) -> bool
    where
        F: Fn(ActivityStatus) -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.0.state.lock().unwrap();
        loop {
            if pred(state.status) {
                return true;
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline <= now {
                        return false;
                    }
                    let (state, _) = self
                        .0
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    state
                }
                None => self.0.cond.wait(state).unwrap(),
            };
        }
    }

    pub(crate) fn set_status(&self, status: ActivityStatus) {
        let mut state = self.0.state.lock().unwrap();
        state.status = status;
        self.0.cond.notify_all();
    }

    /// Abort with a reason, from any non-terminal status. Used for goals
    /// rejected synchronously or at plan time.
    pub(crate) fn fail(&self, reason: impl Into<String>) {
        let mut state = self.0.state.lock().unwrap();
        if state.status.done() {
            return;
        }
        state.status = ActivityStatus::Aborted;
        state.reason = Some(reason.into());
        self.0.cond.notify_all();
    }

    /// Terminal transition applied by the executor when it reaches the
    /// activity's sentinel: `Active -> Complete`, `Aborting -> Aborted`.
    /// Any other status at that point is a programming error.
    pub(crate) fn finalize(&self) -> ActivityStatus {
        let mut state = self.0.state.lock().unwrap();
        state.status = match state.status {
            ActivityStatus::Active => ActivityStatus::Complete,
            ActivityStatus::Aborting => ActivityStatus::Aborted,
            status => panic!("unexpected activity status at finalize: {:?}", status),
        };
        self.0.cond.notify_all();
        state.status
    }
}
