//! MME Timer Management
//!
//! NAS retransmission timers (T3460, T3470) and the S6a Authentication
//! Information guard timer. Expiries are re-delivered to the EMM task as
//! [`EmmTimerEvent`]s carrying the epoch of the arming they belong to.

use std::fmt;
use std::time::{Duration, Instant};

use ogs_core::async_timer::{compute_poll_interval, AsyncTimerMgr};
use serde::Deserialize;

use crate::context::MmeUeId;
use crate::emm_proc::ProcedureKind;

// ============================================================================
// Timer IDs
// ============================================================================

/// MME timer identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MmeTimerId {
    /// T3460 - Authentication request / Security mode command sent
    T3460,
    /// T3470 - Identity request sent
    T3470,
    /// Authentication Information Answer guard
    S6aAuthInfo,
}

impl MmeTimerId {
    pub fn name(&self) -> &'static str {
        match self {
            Self::T3460 => "MME_TIMER_T3460",
            Self::T3470 => "MME_TIMER_T3470",
            Self::S6aAuthInfo => "MME_TIMER_S6A_AUTH_INFO",
        }
    }
}

impl fmt::Display for MmeTimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Timer Configuration
// ============================================================================

/// Timer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Maximum expiry count before the procedure is aborted
    pub max_count: u32,
    /// Timer duration in seconds
    pub duration: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            max_count: 5,
            duration: 6,
        }
    }
}

impl TimerConfig {
    pub fn new(max_count: u32, duration_secs: u64) -> Self {
        Self {
            max_count,
            duration: duration_secs,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }
}

// ============================================================================
// Epochs and events
// ============================================================================

/// Identity of one arming of a timer. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerEpoch(pub u64);

impl fmt::Display for TimerEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Timer expiry re-delivered into the EMM task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmmTimerEvent {
    pub kind: ProcedureKind,
    pub ue_id: MmeUeId,
    pub epoch: TimerEpoch,
}

/// Timer slot owned by a procedure.
///
/// Inactive before the first arming and right after being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NasTimer {
    pub id: MmeTimerId,
    epoch: Option<TimerEpoch>,
}

impl NasTimer {
    pub fn new(id: MmeTimerId) -> Self {
        Self { id, epoch: None }
    }

    pub fn is_active(&self) -> bool {
        self.epoch.is_some()
    }

    pub fn epoch(&self) -> Option<TimerEpoch> {
        self.epoch
    }

    /// Arm the timer, disarming any previous arming first.
    pub fn start(
        &mut self,
        timers: &MmeTimerMgr,
        kind: ProcedureKind,
        ue_id: MmeUeId,
        duration: Duration,
    ) {
        self.stop(timers);
        let epoch = timers.start(kind, ue_id, duration);
        log::debug!(
            "ue_id={} Started timer {} {} (duration: {:?})",
            ue_id,
            self.id,
            epoch,
            duration
        );
        self.epoch = Some(epoch);
    }

    pub fn stop(&mut self, timers: &MmeTimerMgr) {
        if let Some(epoch) = self.epoch.take() {
            timers.stop(epoch);
            log::debug!("Stopped timer {} {}", self.id, epoch);
        }
    }

    /// Consume an expiry. Returns false, leaving the slot untouched, when
    /// `epoch` is not the current arming.
    pub fn expire(&mut self, timers: &MmeTimerMgr, epoch: TimerEpoch) -> bool {
        if self.epoch != Some(epoch) {
            return false;
        }
        self.epoch = None;
        timers.stop(epoch);
        true
    }
}

// ============================================================================
// Timer Manager
// ============================================================================

/// Timer manager for the EMM task
#[derive(Debug, Default)]
pub struct MmeTimerMgr {
    inner: AsyncTimerMgr<ProcedureKind, MmeUeId>,
}

impl MmeTimerMgr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, kind: ProcedureKind, ue_id: MmeUeId, duration: Duration) -> TimerEpoch {
        TimerEpoch(self.inner.start(kind, duration, ue_id))
    }

    pub fn stop(&self, epoch: TimerEpoch) {
        self.inner.cancel(epoch.0);
    }

    /// Disarm every timer of a UE.
    pub fn stop_all_ue_timers(&self, ue_id: MmeUeId) -> usize {
        let stopped = self.inner.cancel_matching(|e| e.data == ue_id);
        log::debug!("Stopped all timers for UE {ue_id}");
        stopped
    }

    pub fn is_armed(&self, epoch: TimerEpoch) -> bool {
        self.inner.exists(epoch.0)
    }

    pub fn armed_count(&self) -> usize {
        self.inner.count()
    }

    /// Expired timers as of `now`, oldest first.
    pub fn poll_expired(&self, now: Instant) -> Vec<EmmTimerEvent> {
        self.inner
            .process_expired_at(now)
            .into_iter()
            .map(|entry| EmmTimerEvent {
                kind: entry.timer_type,
                ue_id: entry.data,
                epoch: TimerEpoch(entry.id),
            })
            .collect()
    }

    pub fn poll_interval(&self, max_interval: Duration) -> Duration {
        compute_poll_interval(&self.inner, max_interval)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_id_names() {
        assert_eq!(MmeTimerId::T3460.name(), "MME_TIMER_T3460");
        assert_eq!(MmeTimerId::T3470.to_string(), "MME_TIMER_T3470");
    }

    #[test]
    fn test_timer_config_default() {
        let config = TimerConfig::default();
        assert_eq!(config.max_count, 5);
        assert_eq!(config.duration(), Duration::from_secs(6));
        assert_eq!(TimerConfig::new(3, 2).duration(), Duration::from_secs(2));
    }

    #[test]
    fn test_nas_timer_start_stop() {
        let timers = MmeTimerMgr::new();
        let mut t3460 = NasTimer::new(MmeTimerId::T3460);
        assert!(!t3460.is_active());

        t3460.start(&timers, ProcedureKind::Authentication, 1, Duration::from_secs(6));
        let first = t3460.epoch().unwrap();
        assert!(timers.is_armed(first));

        t3460.start(&timers, ProcedureKind::Authentication, 1, Duration::from_secs(6));
        let second = t3460.epoch().unwrap();
        assert_ne!(first, second);
        assert!(!timers.is_armed(first));

        t3460.stop(&timers);
        assert!(!t3460.is_active());
        assert_eq!(timers.armed_count(), 0);
    }

    #[test]
    fn test_nas_timer_stale_expiry() {
        let timers = MmeTimerMgr::new();
        let mut t3470 = NasTimer::new(MmeTimerId::T3470);
        t3470.start(&timers, ProcedureKind::Identification, 1, Duration::from_secs(6));
        let stale = t3470.epoch().unwrap();
        t3470.start(&timers, ProcedureKind::Identification, 1, Duration::from_secs(6));

        assert!(!t3470.expire(&timers, stale));
        assert!(t3470.is_active());
        let current = t3470.epoch().unwrap();
        assert!(t3470.expire(&timers, current));
        assert!(!t3470.is_active());
        assert!(!t3470.expire(&timers, current));
        assert_eq!(timers.armed_count(), 0);
    }

    #[test]
    fn test_poll_expired() {
        let timers = MmeTimerMgr::new();
        let epoch = timers.start(ProcedureKind::AuthInfo, 9, Duration::from_secs(1));
        assert!(timers.poll_expired(Instant::now()).is_empty());

        let fired = timers.poll_expired(Instant::now() + Duration::from_secs(2));
        assert_eq!(
            fired,
            vec![EmmTimerEvent {
                kind: ProcedureKind::AuthInfo,
                ue_id: 9,
                epoch,
            }]
        );
    }

    #[test]
    fn test_stop_all_ue_timers() {
        let timers = MmeTimerMgr::new();
        timers.start(ProcedureKind::Authentication, 1, Duration::from_secs(6));
        timers.start(ProcedureKind::AuthInfo, 1, Duration::from_secs(6));
        timers.start(ProcedureKind::Identification, 2, Duration::from_secs(6));
        assert_eq!(timers.stop_all_ue_timers(1), 2);
        assert_eq!(timers.armed_count(), 1);
    }
}
