//! Recovery watchdog policy
//!
//! Pure decision logic evaluated on every supervisor tick. The side effects
//! (link toggling, detach/reattach, sleeps) live in [`crate::supervisor`].

use crate::config::WatchdogSettings;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Recovery tuning, fixed for the process lifetime
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    pub grace_period: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub kick_delay: Duration,
    pub detach_duration: Duration,
    pub settle_duration: Duration,
}

impl From<&WatchdogSettings> for RecoveryPolicy {
    fn from(settings: &WatchdogSettings) -> Self {
        Self {
            grace_period: settings.grace_period,
            max_attempts: settings.max_attempts,
            initial_backoff: settings.initial_backoff,
            max_backoff: settings.max_backoff,
            kick_delay: settings.kick_delay,
            detach_duration: settings.detach_duration,
            settle_duration: settings.settle_duration,
        }
    }
}

impl RecoveryPolicy {
    /// How long after a reattach a Mounted still counts as its result
    pub fn reenumeration_window(&self) -> Duration {
        self.settle_duration + self.grace_period
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from(&WatchdogSettings::default())
    }
}

/// Per-mount-cycle recovery bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryState {
    pub attempts: u32,
    pub backoff: Duration,
    pub last_recovery_at: Option<Instant>,
}

impl RecoveryState {
    pub fn new(initial_backoff: Duration) -> Self {
        Self {
            attempts: 0,
            backoff: initial_backoff,
            last_recovery_at: None,
        }
    }

    /// Back to `{0, initial_backoff, none}`
    pub fn reset(&mut self, initial_backoff: Duration) {
        *self = Self::new(initial_backoff);
    }

    /// Count a recovery starting at `now`
    pub fn begin_attempt(&mut self, now: Instant) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_recovery_at = Some(now);
    }

    /// Double the backoff, capped at `max_backoff`
    pub fn escalate_backoff(&mut self, max_backoff: Duration) {
        self.backoff = self.backoff.saturating_mul(2).min(max_backoff);
    }

    pub fn exhausted(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }

    fn backoff_elapsed(&self, now: Instant) -> bool {
        self.last_recovery_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.backoff)
    }
}

/// Inputs the watchdog looks at on each tick
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub stack_ready: bool,
    pub mounted: bool,
    pub link_up: bool,
    pub mounted_at: Option<Instant>,
    pub last_rx_at: Option<Instant>,
}

/// What the supervisor should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    None,
    /// Link down, short pause, link up
    Kick,
    /// Full detach/reattach sequence
    Recover,
}

/// Decide the action for one tick
pub fn evaluate(
    policy: &RecoveryPolicy,
    observed: &Observation,
    state: &RecoveryState,
    now: Instant,
) -> WatchdogAction {
    if !observed.stack_ready || !observed.mounted {
        return WatchdogAction::None;
    }

    // The no-RX check waits for the next tick, after the kick has run
    if !observed.link_up {
        return WatchdogAction::Kick;
    }

    let (Some(mounted_at), None) = (observed.mounted_at, observed.last_rx_at) else {
        return WatchdogAction::None;
    };

    let since_mount = now.saturating_duration_since(mounted_at);
    if since_mount >= policy.grace_period
        && !state.exhausted(policy.max_attempts)
        && state.backoff_elapsed(now)
    {
        WatchdogAction::Recover
    } else {
        WatchdogAction::None
    }
}

/// Recovery figures for diagnostics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RecoverySummary {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl From<&RecoveryState> for RecoverySummary {
    fn from(state: &RecoveryState) -> Self {
        Self {
            attempts: state.attempts,
            backoff_ms: state.backoff.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RecoveryPolicy {
        RecoveryPolicy {
            grace_period: Duration::from_secs(2),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(2500),
            max_backoff: Duration::from_millis(15000),
            kick_delay: Duration::from_millis(200),
            detach_duration: Duration::from_secs(1),
            settle_duration: Duration::from_millis(1500),
        }
    }

    fn waiting_for_rx(mounted_at: Instant) -> Observation {
        Observation {
            stack_ready: true,
            mounted: true,
            link_up: true,
            mounted_at: Some(mounted_at),
            last_rx_at: None,
        }
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = policy();
        let mut state = RecoveryState::new(policy.initial_backoff);
        let now = Instant::now();

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(state.backoff.as_millis() as u64);
            state.begin_attempt(now);
            state.escalate_backoff(policy.max_backoff);
        }

        assert_eq!(seen, vec![2500, 5000, 10000, 15000, 15000, 15000]);
    }

    #[test]
    fn test_reset_restores_initial_values() {
        let policy = policy();
        let mut state = RecoveryState::new(policy.initial_backoff);
        state.begin_attempt(Instant::now());
        state.escalate_backoff(policy.max_backoff);

        state.reset(policy.initial_backoff);
        assert_eq!(state, RecoveryState::new(policy.initial_backoff));
    }

    #[test]
    fn test_inactive_without_stack_or_mount() {
        let policy = policy();
        let state = RecoveryState::new(policy.initial_backoff);
        let now = Instant::now();

        let mut observed = waiting_for_rx(now);
        observed.stack_ready = false;
        observed.link_up = false;
        assert_eq!(evaluate(&policy, &observed, &state, now), WatchdogAction::None);

        observed.stack_ready = true;
        observed.mounted = false;
        assert_eq!(evaluate(&policy, &observed, &state, now), WatchdogAction::None);
    }

    #[test]
    fn test_link_down_while_mounted_kicks() {
        let policy = policy();
        let state = RecoveryState::new(policy.initial_backoff);
        let now = Instant::now();

        let mut observed = waiting_for_rx(now);
        observed.link_up = false;
        assert_eq!(evaluate(&policy, &observed, &state, now), WatchdogAction::Kick);
    }

    #[test]
    fn test_kick_takes_precedence_over_overdue_recovery() {
        let policy = policy();
        let state = RecoveryState::new(policy.initial_backoff);
        let mounted_at = Instant::now();
        let mut observed = waiting_for_rx(mounted_at);
        observed.link_up = false;

        let overdue = mounted_at + Duration::from_secs(10);
        assert_eq!(evaluate(&policy, &observed, &state, overdue), WatchdogAction::Kick);
    }

    #[test]
    fn test_reenumeration_window_covers_settle_and_grace() {
        let policy = policy();
        assert_eq!(policy.reenumeration_window(), Duration::from_millis(3500));
        assert!(policy.reenumeration_window() > policy.settle_duration);
    }

    #[test]
    fn test_recovery_after_grace_period() {
        let policy = policy();
        let state = RecoveryState::new(policy.initial_backoff);
        let mounted_at = Instant::now();
        let observed = waiting_for_rx(mounted_at);

        let early = mounted_at + Duration::from_millis(1999);
        assert_eq!(evaluate(&policy, &observed, &state, early), WatchdogAction::None);

        let due = mounted_at + Duration::from_secs(2);
        assert_eq!(evaluate(&policy, &observed, &state, due), WatchdogAction::Recover);
    }

    #[test]
    fn test_rx_seen_disables_recovery() {
        let policy = policy();
        let state = RecoveryState::new(policy.initial_backoff);
        let mounted_at = Instant::now();
        let mut observed = waiting_for_rx(mounted_at);
        observed.last_rx_at = Some(mounted_at + Duration::from_millis(10));

        let later = mounted_at + Duration::from_secs(60);
        assert_eq!(evaluate(&policy, &observed, &state, later), WatchdogAction::None);
    }

    #[test]
    fn test_backoff_window_respected() {
        let policy = policy();
        let mut state = RecoveryState::new(policy.initial_backoff);
        let start = Instant::now();
        state.begin_attempt(start);
        state.escalate_backoff(policy.max_backoff);

        let observed = waiting_for_rx(start);
        let inside = start + Duration::from_millis(4999);
        assert_eq!(evaluate(&policy, &observed, &state, inside), WatchdogAction::None);

        let after = start + Duration::from_millis(5000);
        assert_eq!(evaluate(&policy, &observed, &state, after), WatchdogAction::Recover);
    }

    #[test]
    fn test_attempts_capped() {
        let policy = policy();
        let mut state = RecoveryState::new(policy.initial_backoff);
        let start = Instant::now();
        for _ in 0..policy.max_attempts {
            state.begin_attempt(start);
        }

        let observed = waiting_for_rx(start);
        let much_later = start + Duration::from_secs(3600);
        assert!(state.exhausted(policy.max_attempts));
        assert_eq!(
            evaluate(&policy, &observed, &state, much_later),
            WatchdogAction::None
        );
    }
}
