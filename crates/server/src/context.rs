//! Shared bridge state
//!
//! One context object is created at startup and handed to every component.
//! Each piece of state has a single owning writer:
//! - mount state, link flag, mount timing and recovery state: the link
//!   supervisor (through [`crate::link::LinkController`])
//! - packet counters, first-RX/first-TX tracking and `last_rx_at`: the
//!   packet bridge
//! - stack readiness: whoever attaches the IP stack

use crate::watchdog::{Observation, RecoveryState, RecoverySummary};
use common::{EventKind, EventRecorder, LogRingBuffer};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, trace};

/// Device state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountState {
    Unmounted,
    Mounted,
    Suspended,
}

impl MountState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MountState::Mounted,
            2 => MountState::Suspended,
            _ => MountState::Unmounted,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            MountState::Unmounted => 0,
            MountState::Mounted => 1,
            MountState::Suspended => 2,
        }
    }
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountState::Unmounted => write!(f, "unmounted"),
            MountState::Mounted => write!(f, "mounted"),
            MountState::Suspended => write!(f, "suspended"),
        }
    }
}

/// Process-lifetime packet counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacketCounters {
    pub rx_count: u64,
    pub tx_count: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Received frames not forwarded to the IP stack
    pub rx_dropped: u64,
    /// Outbound frames lost after every send attempt failed
    pub tx_failed: u64,
}

/// Timestamps of the current mount cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountTiming {
    pub mounted_at: Option<Instant>,
    pub last_rx_at: Option<Instant>,
}

/// Shared state of the bridge core
pub struct BridgeContext {
    stack_ready: AtomicBool,
    mount_state: AtomicU8,
    link_up: AtomicBool,
    first_rx_done: AtomicBool,
    first_tx_done: AtomicBool,
    timing: Mutex<MountTiming>,
    recovery: Mutex<RecoveryState>,
    counters: Mutex<PacketCounters>,
    lock_timeout: Duration,
    events: Arc<EventRecorder>,
    logs: Arc<LogRingBuffer>,
}

impl BridgeContext {
    pub fn new(
        events: Arc<EventRecorder>,
        logs: Arc<LogRingBuffer>,
        initial_backoff: Duration,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            stack_ready: AtomicBool::new(false),
            mount_state: AtomicU8::new(MountState::Unmounted.as_u8()),
            link_up: AtomicBool::new(false),
            first_rx_done: AtomicBool::new(false),
            first_tx_done: AtomicBool::new(false),
            timing: Mutex::new(MountTiming::default()),
            recovery: Mutex::new(RecoveryState::new(initial_backoff)),
            counters: Mutex::new(PacketCounters::default()),
            lock_timeout,
            events,
            logs,
        }
    }

    pub fn events(&self) -> &Arc<EventRecorder> {
        &self.events
    }

    pub fn logs(&self) -> &Arc<LogRingBuffer> {
        &self.logs
    }

    // ========================================================================
    // Stack readiness
    // ========================================================================

    pub fn stack_ready(&self) -> bool {
        self.stack_ready.load(Ordering::Acquire)
    }

    /// Set once; only the first call records `STACK_READY`
    pub fn mark_stack_ready(&self) {
        if self
            .stack_ready
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("IP stack ready");
            self.events.record(EventKind::StackReady, None);
        }
    }

    // ========================================================================
    // Mount and link state
    // ========================================================================

    pub fn mount_state(&self) -> MountState {
        MountState::from_u8(self.mount_state.load(Ordering::Acquire))
    }

    pub fn is_mounted(&self) -> bool {
        self.mount_state() == MountState::Mounted
    }

    pub fn link_up(&self) -> bool {
        self.link_up.load(Ordering::Acquire)
    }

    /// Whether outbound frames may be handed to the transport
    pub fn can_transmit(&self) -> bool {
        self.is_mounted() && self.link_up()
    }

    pub(crate) fn set_mount_state(&self, state: MountState) {
        self.mount_state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn store_link(&self, up: bool) {
        self.link_up.store(up, Ordering::Release);
    }

    // ========================================================================
    // Mount cycle timing
    // ========================================================================

    pub fn timing(&self) -> MountTiming {
        *self.timing.lock()
    }

    /// Start a new mount cycle at `now`
    pub(crate) fn begin_mount_cycle(&self, now: Instant) {
        *self.timing.lock() = MountTiming {
            mounted_at: Some(now),
            last_rx_at: None,
        };
        self.clear_first_traffic();
    }

    /// Forget everything derived from the previous mount
    pub(crate) fn end_mount_cycle(&self) {
        *self.timing.lock() = MountTiming::default();
        self.clear_first_traffic();
    }

    /// Restart the grace window after a forced re-enumeration
    pub(crate) fn restart_grace(&self, now: Instant) {
        let mut timing = self.timing.lock();
        timing.mounted_at = Some(now);
        timing.last_rx_at = None;
    }

    /// Record an inbound frame at `now`
    pub(crate) fn note_rx(&self, now: Instant) {
        match self.timing.try_lock_for(self.lock_timeout) {
            Some(mut timing) => timing.last_rx_at = Some(now),
            None => trace!("Timing lock busy, last_rx_at not updated"),
        }
    }

    fn clear_first_traffic(&self) {
        self.first_rx_done.store(false, Ordering::Release);
        self.first_tx_done.store(false, Ordering::Release);
    }

    /// True exactly once per mount cycle
    pub(crate) fn claim_first_rx(&self) -> bool {
        !self.first_rx_done.swap(true, Ordering::AcqRel)
    }

    /// True exactly once per mount cycle
    pub(crate) fn claim_first_tx(&self) -> bool {
        !self.first_tx_done.swap(true, Ordering::AcqRel)
    }

    // ========================================================================
    // Recovery state
    // ========================================================================

    pub fn recovery(&self) -> RecoveryState {
        *self.recovery.lock()
    }

    pub(crate) fn update_recovery<R>(&self, f: impl FnOnce(&mut RecoveryState) -> R) -> R {
        f(&mut *self.recovery.lock())
    }

    pub fn recovery_summary(&self) -> RecoverySummary {
        RecoverySummary::from(&*self.recovery.lock())
    }

    /// Snapshot of everything the watchdog evaluates
    pub fn observe(&self) -> Observation {
        let timing = self.timing();
        Observation {
            stack_ready: self.stack_ready(),
            mounted: self.is_mounted(),
            link_up: self.link_up(),
            mounted_at: timing.mounted_at,
            last_rx_at: timing.last_rx_at,
        }
    }

    // ========================================================================
    // Packet counters
    // ========================================================================

    fn with_counters(&self, f: impl FnOnce(&mut PacketCounters)) {
        match self.counters.try_lock_for(self.lock_timeout) {
            Some(mut counters) => f(&mut *counters),
            None => trace!("Counter lock busy, update skipped"),
        }
    }

    pub(crate) fn count_rx(&self, len: usize) {
        self.with_counters(|c| {
            c.rx_count += 1;
            c.rx_bytes += len as u64;
        });
    }

    pub(crate) fn count_rx_dropped(&self) {
        self.with_counters(|c| c.rx_dropped += 1);
    }

    pub(crate) fn count_tx(&self, len: usize) {
        self.with_counters(|c| {
            c.tx_count += 1;
            c.tx_bytes += len as u64;
        });
    }

    pub(crate) fn count_tx_failed(&self) {
        self.with_counters(|c| c.tx_failed += 1);
    }

    /// Current counter values (zeros if the lock is busy)
    pub fn counters(&self) -> PacketCounters {
        self.counters
            .try_lock_for(self.lock_timeout)
            .map(|c| *c)
            .unwrap_or_default()
    }
}
