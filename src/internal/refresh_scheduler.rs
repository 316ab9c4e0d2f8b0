use std::cell::RefCell;
use std::rc::Rc;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::host::UserActivity;
use crate::time_ext::TimeDurationExt;

/// Parameters handed to a refresh triggered by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshParams {
    /// Seconds since the last observed user interaction.
    pub user_inactive_since: Option<u64>,
}

/// Invoked with the refresh parameters and `is_auto_refresh`.
pub type RefreshCallback = Rc<dyn Fn(RefreshParams, bool)>;

#[derive(Default)]
struct SchedulerState {
    target_expiry: Option<OffsetDateTime>,
    last_interaction: Option<Instant>,
    active_this_cycle: bool,
    listening: bool,
    timer: Option<JoinHandle<()>>,
}

impl SchedulerState {
    fn clear_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Fires a refresh callback shortly before the current token expires, but only for sessions in
/// which the user was seen interacting with the page.
///
/// At most one refresh is scheduled at any time. Arming always clears the previous timer first.
///
/// # Internal Use
/// This is an internal component exposed via the `internals` feature flag for advanced
/// use cases like testing or debugging.
#[derive(Clone)]
pub struct AutoRefreshScheduler {
    state: Rc<RefCell<SchedulerState>>,
    lead_time: time::Duration,
    min_delay: time::Duration,
}

impl std::fmt::Debug for AutoRefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("AutoRefreshScheduler")
            .field("target_expiry", &state.target_expiry)
            .field("active_this_cycle", &state.active_this_cycle)
            .field("armed", &state.timer.is_some())
            .finish()
    }
}

impl Default for AutoRefreshScheduler {
    fn default() -> Self {
        Self::new(time::Duration::minutes(1), time::Duration::minutes(1))
    }
}

impl AutoRefreshScheduler {
    pub fn new(lead_time: time::Duration, min_delay: time::Duration) -> Self {
        Self {
            state: Rc::new(RefCell::new(SchedulerState::default())),
            lead_time,
            min_delay,
        }
    }

    /// Schedule `callback` for `max(expiry - now - lead_time, min_delay)`.
    ///
    /// Does nothing when either the expiry or the callback is missing.
    pub fn arm(
        &self,
        expiry: Option<OffsetDateTime>,
        callback: Option<RefreshCallback>,
        now: OffsetDateTime,
    ) {
        let (Some(expiry), Some(callback)) = (expiry, callback) else {
            tracing::trace!("Not arming auto refresh. Expiry or callback missing.");
            return;
        };

        let delay = (expiry - now - self.lead_time).max(self.min_delay);

        let mut state = self.state.borrow_mut();
        state.clear_timer();
        state.target_expiry = Some(expiry);
        state.active_this_cycle = false;
        state.listening = true;

        tracing::trace!(?expiry, ?delay, "Arming auto refresh.");

        let shared = self.state.clone();
        let sleep_for = delay.to_std_duration();
        state.timer = Some(tokio::task::spawn_local(async move {
            tokio::time::sleep(sleep_for).await;

            let params = {
                let mut state = shared.borrow_mut();
                // This task is done. A re-arm from within the callback must not abort it.
                state.timer = None;
                if !state.active_this_cycle {
                    tracing::trace!("Skipping auto refresh. No user activity was observed.");
                    return;
                }
                RefreshParams {
                    user_inactive_since: state
                        .last_interaction
                        .map(|at| Instant::now().saturating_duration_since(at).as_secs()),
                }
            };

            tracing::trace!(?params, "Triggering auto refresh.");
            callback(params, true);
        }));
    }

    /// Note a user interaction. Ignored while not armed.
    pub fn record_activity(&self, activity: UserActivity) {
        let mut state = self.state.borrow_mut();
        if !state.listening {
            return;
        }
        if !state.active_this_cycle {
            tracing::trace!(?activity, "First user activity of this refresh cycle.");
        }
        state.active_this_cycle = true;
        state.last_interaction = Some(Instant::now());
    }

    /// Clear the timer and stop listening for activity.
    pub fn cancel(&self) {
        let mut state = self.state.borrow_mut();
        state.clear_timer();
        state.target_expiry = None;
        state.active_this_cycle = false;
        state.listening = false;
    }

    pub fn is_armed(&self) -> bool {
        self.state.borrow().timer.is_some()
    }

    pub fn target_expiry(&self) -> Option<OffsetDateTime> {
        self.state.borrow().target_expiry
    }
}
