//! Status poller for one feedback generation job.
//!
//! A [`FeedbackPoller`] fetches the job's status immediately on
//! [`start`](FeedbackPoller::start) and then on a fixed interval until the job
//! reaches a terminal state: completed, or failed/timed out with no retry
//! available. Every change is published on a `tokio::sync::watch` channel.
//!
//! Requests are serialized: a tick's fetch finishes before the next tick is
//! awaited. Each armed timer carries a generation number, and every state
//! reset carries an epoch; responses that arrive for an older generation or
//! epoch are dropped without touching the snapshot.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use gradewatch_core::{FeedbackPoller, HttpFeedbackApi, PollSettings};
//!
//! # async fn example() -> gradewatch_core::Result<()> {
//! let api = Arc::new(HttpFeedbackApi::new("http://localhost:8000")?);
//! let mut poller = FeedbackPoller::new(api, "ans-42", PollSettings::default());
//! let mut updates = poller.subscribe();
//! poller.start();
//!
//! while updates.changed().await.is_ok() {
//!     let snapshot = updates.borrow_and_update().clone();
//!     println!("{} {}%", snapshot.status, snapshot.progress);
//!     if snapshot.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::{FeedbackApi, StatusFetch};
use crate::config::Config;
use crate::status::JobSnapshot;

/// Default interval between status fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Default retry budget until the server reports one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Tuning for a [`FeedbackPoller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Interval between status fetches.
    pub interval: Duration,
    /// Retry budget assumed before the first report arrives.
    pub default_max_retries: u32,
    /// Whether `start()` may arm the timer.
    pub enabled: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            default_max_retries: DEFAULT_MAX_RETRIES,
            enabled: true,
        }
    }
}

impl PollSettings {
    /// Builds settings from the loaded configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            interval: config.poll_interval(),
            default_max_retries: config.default_max_retries,
            enabled: true,
        }
    }

    /// Overrides the poll interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Overrides the enabled flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// When the first fetch of a newly armed timer happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FirstTick {
    /// Fetch right away (initial start).
    Immediate,
    /// Fetch after one interval (re-arm after a retry).
    AfterInterval,
}

/// Result of one fetch-and-apply step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollStep {
    /// Keep polling.
    Continue,
    /// Terminal state reached; the timer should stop.
    Terminal,
    /// The timer that issued the fetch has been replaced or stopped.
    Stale,
}

// ============================================================================
// Shared state
// ============================================================================

/// State shared between the poller handle and its timer task.
pub(crate) struct PollShared<A> {
    pub(crate) api: Arc<A>,
    pub(crate) answer_id: String,
    pub(crate) default_max_retries: u32,
    state: watch::Sender<JobSnapshot>,
    /// Identifies the currently armed timer; bumped on every arm and disarm.
    generation: AtomicU64,
    /// Bumped whenever the snapshot is reset by a retry.
    epoch: AtomicU64,
}

impl<A: FeedbackApi> PollShared<A> {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        self.state.borrow().clone()
    }

    pub(crate) fn publish(&self, modify: impl FnOnce(&mut JobSnapshot)) {
        self.state.send_modify(modify);
    }

    /// Clears `retry_in_flight`, notifying subscribers only if it was set.
    pub(crate) fn clear_retry_in_flight(&self) {
        self.state
            .send_if_modified(|s| std::mem::replace(&mut s.retry_in_flight, false));
    }

    pub(crate) fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Fetches once and applies the result if the issuing timer is still current.
    async fn poll(&self, generation: u64) -> PollStep {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let result = self.api.fetch_status(&self.answer_id).await;

        if !self.is_current(generation) {
            debug!(answer_id = %self.answer_id, "Discarding status from stopped timer");
            return PollStep::Stale;
        }
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(answer_id = %self.answer_id, "Discarding status fetched before retry reset");
            return PollStep::Continue;
        }

        let previous = self.state.borrow().status;
        let mut step = PollStep::Continue;
        self.state.send_modify(|snapshot| match result {
            Ok(StatusFetch::NotStarted) => {
                debug!(answer_id = %self.answer_id, "Feedback not registered yet");
                snapshot.mark_not_started();
            }
            Ok(StatusFetch::Report(report)) => {
                snapshot.apply_report(report, self.default_max_retries);
                debug!(
                    answer_id = %self.answer_id,
                    status = %snapshot.status,
                    progress = snapshot.progress,
                    "Feedback status"
                );
                if snapshot.is_terminal() {
                    step = PollStep::Terminal;
                }
            }
            Err(err) => {
                warn!(answer_id = %self.answer_id, error = %err, "Feedback status fetch failed");
                snapshot.record_fetch_error(err.fetch_message());
            }
        });

        let current = self.state.borrow().status;
        if current != previous {
            info!(answer_id = %self.answer_id, from = %previous, to = %current, "Feedback status changed");
        }
        step
    }
}

// ============================================================================
// Timer guard
// ============================================================================

/// Owned handle of a running poll task; aborts the task when dropped.
#[derive(Debug)]
struct PollTimer {
    handle: JoinHandle<()>,
}

impl PollTimer {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_poll_loop<A: FeedbackApi>(
    shared: Arc<PollShared<A>>,
    generation: u64,
    start: Instant,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match shared.poll(generation).await {
            PollStep::Continue => {}
            PollStep::Terminal => {
                info!(answer_id = %shared.answer_id, "Feedback job reached a terminal state; polling stopped");
                if shared.is_current(generation) {
                    shared.publish(|s| s.polling = false);
                }
                break;
            }
            PollStep::Stale => break,
        }
    }
}

// ============================================================================
// FeedbackPoller
// ============================================================================

/// Polls the backend for one answer's feedback generation status.
///
/// The poller is owned by a single consumer. Lifecycle methods take
/// `&mut self`, and dropping the poller stops its timer.
pub struct FeedbackPoller<A> {
    pub(crate) shared: Arc<PollShared<A>>,
    pub(crate) interval: Duration,
    pub(crate) enabled: bool,
    timer: Option<PollTimer>,
}

impl<A> std::fmt::Debug for FeedbackPoller<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackPoller")
            .field("answer_id", &self.shared.answer_id)
            .field("interval", &self.interval)
            .field("enabled", &self.enabled)
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

impl<A: FeedbackApi + 'static> FeedbackPoller<A> {
    /// Creates an idle poller for `answer_id`.
    ///
    /// An empty answer id yields an inert poller: `start()` and `retry()`
    /// never issue requests. A zero interval is replaced by
    /// [`DEFAULT_POLL_INTERVAL`].
    #[must_use]
    pub fn new(api: Arc<A>, answer_id: impl Into<String>, settings: PollSettings) -> Self {
        let answer_id = answer_id.into();
        let interval = if settings.interval.is_zero() {
            warn!(%answer_id, "Zero poll interval; using the default");
            DEFAULT_POLL_INTERVAL
        } else {
            settings.interval
        };
        let (state, _) = watch::channel(JobSnapshot::new(
            answer_id.clone(),
            settings.default_max_retries,
        ));
        Self {
            shared: Arc::new(PollShared {
                api,
                answer_id,
                default_max_retries: settings.default_max_retries,
                state,
                generation: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
            }),
            interval,
            enabled: settings.enabled,
            timer: None,
        }
    }

    /// The job key being tracked.
    #[must_use]
    pub fn answer_id(&self) -> &str {
        &self.shared.answer_id
    }

    /// Whether the poller may arm its timer.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the recurring timer is currently armed.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.timer.as_ref().is_some_and(PollTimer::is_running)
    }

    /// Returns a copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        self.shared.snapshot()
    }

    /// Subscribes to snapshot updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.shared.state.subscribe()
    }

    /// Fetches immediately, then every interval until a terminal state.
    ///
    /// Does nothing when disabled, when the answer id is empty, or when the
    /// timer is already running. Must be called inside a Tokio runtime.
    pub fn start(&mut self) {
        if !self.enabled || self.shared.answer_id.is_empty() || self.is_polling() {
            return;
        }
        self.arm(FirstTick::Immediate);
    }

    /// Stops polling. A response already in flight is discarded.
    pub fn stop(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if self.timer.take().is_some() {
            debug!(answer_id = %self.shared.answer_id, "Polling stopped");
        }
        self.shared.publish(|s| s.polling = false);
    }

    /// Enables or disables polling; disabling stops the timer.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            self.start();
        } else {
            self.stop();
        }
    }

    /// Performs a single fetch outside the timer and returns the new snapshot.
    pub async fn poll_once(&self) -> JobSnapshot {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.poll(generation).await;
        self.snapshot()
    }

    /// Arms a fresh timer, replacing (and aborting) any previous one.
    pub(crate) fn arm(&mut self, first: FirstTick) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let start = match first {
            FirstTick::Immediate => Instant::now(),
            FirstTick::AfterInterval => Instant::now() + self.interval,
        };

        debug!(
            answer_id = %self.shared.answer_id,
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            ?first,
            "Polling armed"
        );
        self.shared.publish(|s| s.polling = true);
        let handle = tokio::spawn(run_poll_loop(
            Arc::clone(&self.shared),
            generation,
            start,
            self.interval,
        ));
        self.timer = Some(PollTimer { handle });
    }
}

impl<A> Drop for FeedbackPoller<A> {
    fn drop(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.timer = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
