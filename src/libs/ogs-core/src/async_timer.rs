//! One-shot Timer Manager for NF Event Loops
//!
//! Every armed timer is identified by a handle drawn from a monotonically
//! increasing counter. Handles are never reused, so a handle doubles as the
//! arming epoch: an expiry carrying handle `h` belongs to the arming that
//! returned `h` and to no other.
//!
//! The manager never calls back into the NF. The event loop polls
//! [`AsyncTimerMgr::process_expired`] and re-delivers each expired entry as a
//! typed message into its own queue.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

// ============================================================================
// Timer Types
// ============================================================================

/// A timer entry stored in the timer manager
#[derive(Debug, Clone)]
pub struct AsyncTimerEntry<T, D> {
    /// Unique timer handle ID
    pub id: u64,
    /// NF-specific timer type (e.g., T3460, T3470)
    pub timer_type: T,
    /// Owner of the timer (e.g., UE ID)
    pub data: D,
    /// Absolute expiration time
    pub expires_at: Instant,
    /// Timer duration
    pub duration: Duration,
}

impl<T, D> AsyncTimerEntry<T, D> {
    pub fn new(id: u64, timer_type: T, data: D, duration: Duration, now: Instant) -> Self {
        Self {
            id,
            timer_type,
            data,
            expires_at: now + duration,
            duration,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Remaining time until expiration as seen from `now`
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

// ============================================================================
// Timer Manager
// ============================================================================

/// Generic one-shot timer manager.
///
/// `T` is the NF-specific timer ID enum and `D` identifies the owner the
/// expiry is re-delivered to.
///
/// # Usage
///
/// ```ignore
/// use ogs_core::async_timer::AsyncTimerMgr;
///
/// let mgr = AsyncTimerMgr::<MyTimerId, u32>::new();
/// let epoch = mgr.start(MyTimerId::T3460, Duration::from_secs(6), ue_id);
///
/// for entry in mgr.process_expired() {
///     // Dispatch (entry.timer_type, entry.data, entry.id) to the state machine
/// }
///
/// mgr.cancel(epoch);
/// ```
pub struct AsyncTimerMgr<T, D> {
    /// Armed timers indexed by handle ID
    timers: RwLock<HashMap<u64, AsyncTimerEntry<T, D>>>,
    /// Monotonically increasing timer handle counter
    next_id: AtomicU64,
}

impl<T, D> AsyncTimerMgr<T, D>
where
    T: Clone + fmt::Debug,
    D: Clone + fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            timers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Arm a one-shot timer and return its handle.
    pub fn start(&self, timer_type: T, duration: Duration, data: D) -> u64 {
        self.start_at(timer_type, duration, data, Instant::now())
    }

    /// Arm a one-shot timer relative to `now`.
    pub fn start_at(&self, timer_type: T, duration: Duration, data: D, now: Instant) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "AsyncTimer started: id={id} type={timer_type:?} data={data:?} duration={duration:?}"
        );
        let entry = AsyncTimerEntry::new(id, timer_type, data, duration, now);
        if let Ok(mut timers) = self.timers.write() {
            timers.insert(id, entry);
        }
        id
    }

    /// Disarm a timer. Returns true if it was still armed.
    pub fn cancel(&self, id: u64) -> bool {
        if let Ok(mut timers) = self.timers.write() {
            if let Some(entry) = timers.remove(&id) {
                log::debug!("AsyncTimer cancelled: id={} type={:?}", id, entry.timer_type);
                return true;
            }
        }
        false
    }

    /// Disarm every timer whose owner matches `pred`. Returns the number removed.
    pub fn cancel_matching<F>(&self, pred: F) -> usize
    where
        F: Fn(&AsyncTimerEntry<T, D>) -> bool,
    {
        let mut cancelled = 0;
        if let Ok(mut timers) = self.timers.write() {
            let before = timers.len();
            timers.retain(|_, entry| !pred(entry));
            cancelled = before - timers.len();
        }
        if cancelled > 0 {
            log::debug!("AsyncTimer: cancelled {cancelled} timers");
        }
        cancelled
    }

    /// Remove and return every timer expired by now, oldest first.
    pub fn process_expired(&self) -> Vec<AsyncTimerEntry<T, D>> {
        self.process_expired_at(Instant::now())
    }

    /// Remove and return every timer expired at `now`, oldest first.
    pub fn process_expired_at(&self, now: Instant) -> Vec<AsyncTimerEntry<T, D>> {
        let mut expired = Vec::new();
        if let Ok(mut timers) = self.timers.write() {
            let ids: Vec<u64> = timers
                .iter()
                .filter(|(_, entry)| entry.is_expired_at(now))
                .map(|(id, _)| *id)
                .collect();
            for id in ids {
                if let Some(entry) = timers.remove(&id) {
                    expired.push(entry);
                }
            }
        }
        expired.sort_by_key(|entry| (entry.expires_at, entry.id));
        expired
    }

    /// Duration until the next timer expires, `None` when nothing is armed.
    pub fn next_expiration(&self) -> Option<Duration> {
        let now = Instant::now();
        self.timers
            .read()
            .ok()
            .and_then(|timers| timers.values().map(|e| e.remaining_at(now)).min())
    }

    pub fn count(&self) -> usize {
        self.timers.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn exists(&self, id: u64) -> bool {
        self.timers
            .read()
            .map(|t| t.contains_key(&id))
            .unwrap_or(false)
    }
}

impl<T, D> Default for AsyncTimerMgr<T, D>
where
    T: Clone + fmt::Debug,
    D: Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, D> fmt::Debug for AsyncTimerMgr<T, D>
where
    T: Clone + fmt::Debug,
    D: Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTimerMgr")
            .field("armed", &self.count())
            .finish()
    }
}

// ============================================================================
// Helper: compute sleep duration for event loop tick
// ============================================================================

/// Compute the sleep duration for the next event loop iteration.
///
/// Returns the time until the next timer expires, bounded by `max_interval`.
/// If no timers are armed, returns `max_interval`.
pub fn compute_poll_interval<T, D>(mgr: &AsyncTimerMgr<T, D>, max_interval: Duration) -> Duration
where
    T: Clone + fmt::Debug,
    D: Clone + fmt::Debug,
{
    match mgr.next_expiration() {
        Some(next) if next < max_interval => {
            if next.is_zero() {
                Duration::from_millis(1)
            } else {
                next
            }
        }
        _ => max_interval,
    }
}

// ============================================================================
// Tests
// ============================================================================
