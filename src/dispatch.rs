//! Debounced Dispatcher
//!
//! Coalesces bursts of change notifications into one delayed action per key.
//! Each key owns a timer that is created on first use and reused afterwards.
//! Scheduling a key again before its deadline replaces both the deadline and
//! the action (last write wins, nothing is queued), so an action runs exactly
//! once after `delay` has passed without another `schedule` for that key.
//!
//! The dispatcher is single-threaded and cooperative. It never spawns: the host
//! loop that schedules is also the one that fires, by awaiting [`tick`] or
//! calling [`fire_due`]. Actions receive `&mut C`, the context the host owns
//! (typically the instrument and its channel models), so fired actions mutate
//! state without any locking.
//!
//! ```
//! use rust_siggen::dispatch::DebouncedDispatcher;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread", start_paused = true)]
//! # async fn main() {
//! let mut dispatcher = DebouncedDispatcher::<Vec<f64>>::new();
//! let mut applied = Vec::new();
//! for keystroke in [2.0, 2.5, 2.55] {
//!     let delay = Duration::from_millis(300);
//!     dispatcher.schedule("ch1.frequency", delay, move |sent: &mut Vec<f64>| {
//!         sent.push(keystroke)
//!     });
//! }
//! dispatcher.tick(&mut applied).await;
//! assert_eq!(applied, vec![2.55]);
//! # }
//! ```
//!
//! [`tick`]: DebouncedDispatcher::tick
//! [`fire_due`]: DebouncedDispatcher::fire_due

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Action run when a key's timer expires.
pub type DebouncedAction<C> = Box<dyn FnOnce(&mut C)>;

struct DebounceTimer<C> {
    pending: Option<(Instant, DebouncedAction<C>)>,
    fired: u64,
}

impl<C> DebounceTimer<C> {
    fn new() -> Self {
        Self {
            pending: None,
            fired: 0,
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(deadline, _)| *deadline)
    }
}

/// Per-key debouncing of deferred actions over a host-owned context `C`.
pub struct DebouncedDispatcher<C> {
    timers: HashMap<String, DebounceTimer<C>>,
}

impl<C> Default for DebouncedDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for DebouncedDispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebouncedDispatcher")
            .field("timers", &self.timers.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl<C> DebouncedDispatcher<C> {
    /// Create a dispatcher with no timers.
    pub fn new() -> Self {
        Self {
            timers: HashMap::new(),
        }
    }

    /// Arm `key` to run `action` once `delay` has passed without another
    /// `schedule` for the same key. Replaces any pending action for `key`.
    pub fn schedule<F>(&mut self, key: impl Into<String>, delay: Duration, action: F)
    where
        F: FnOnce(&mut C) + 'static,
    {
        self.schedule_at(key, Instant::now() + delay, action);
    }

    /// Like [`schedule`](Self::schedule) with an absolute deadline.
    pub fn schedule_at<F>(&mut self, key: impl Into<String>, deadline: Instant, action: F)
    where
        F: FnOnce(&mut C) + 'static,
    {
        let key = key.into();
        let timer = self.timers.entry(key).or_insert_with(DebounceTimer::new);
        let replaced = timer.pending.replace((deadline, Box::new(action))).is_some();
        trace!(replaced, "debounce timer armed");
    }

    /// True if `key` has an action waiting.
    pub fn is_pending(&self, key: &str) -> bool {
        self.timers
            .get(key)
            .is_some_and(|timer| timer.pending.is_some())
    }

    /// Number of keys with an action waiting.
    pub fn pending_count(&self) -> usize {
        self.timers
            .values()
            .filter(|timer| timer.pending.is_some())
            .count()
    }

    /// Number of timers created so far (one per key ever scheduled).
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// How many times the action for `key` has fired.
    pub fn fired_count(&self, key: &str) -> u64 {
        self.timers.get(key).map_or(0, |timer| timer.fired)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().filter_map(DebounceTimer::deadline).min()
    }

    /// Run every action whose deadline is at or before `now`, earliest first.
    /// Returns the number of actions run.
    pub fn fire_due(&mut self, now: Instant, ctx: &mut C) -> usize {
        let mut due: Vec<(Instant, String)> = self
            .timers
            .iter()
            .filter_map(|(key, timer)| {
                timer
                    .deadline()
                    .filter(|deadline| *deadline <= now)
                    .map(|deadline| (deadline, key.clone()))
            })
            .collect();
        due.sort();

        let mut fired = 0;
        for (_, key) in due {
            let Some(timer) = self.timers.get_mut(&key) else {
                continue;
            };
            if let Some((_, action)) = timer.pending.take() {
                timer.fired += 1;
                trace!(key = %key, "debounced action fired");
                action(ctx);
                fired += 1;
            }
        }
        fired
    }

    /// Run every pending action now, without waiting for its deadline.
    pub fn flush(&mut self, ctx: &mut C) -> usize {
        let latest = self.timers.values().filter_map(DebounceTimer::deadline).max();
        match latest {
            Some(latest) => self.fire_due(latest, ctx),
            None => 0,
        }
    }

    /// Wait for the earliest deadline, then run everything due.
    ///
    /// Never completes while nothing is pending, which makes it suitable as one
    /// branch of a `tokio::select!` host loop.
    pub async fn tick(&mut self, ctx: &mut C) -> usize {
        match self.next_deadline() {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.fire_due(Instant::now(), ctx)
            }
            None => std::future::pending().await,
        }
    }

    /// Keep firing until no action is pending. Returns the number of actions run.
    pub async fn run_until_idle(&mut self, ctx: &mut C) -> usize {
        let mut fired = 0;
        while self.pending_count() > 0 {
            fired += self.tick(ctx).await;
        }
        fired
    }
}
