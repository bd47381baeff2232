//! Link supervision and recovery scenarios
//!
//! Runs the full core against the simulated host under a paused clock.
//!
//! Run with: `cargo test -p server --test recovery_tests`

use common::{EventKind, EventRecorder, LogRingBuffer};
use server::config::ServerConfig;
use server::sim::SimulatedSystem;
use server::MountState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn config(stale_enumerations: u32) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.simulation.stale_enumerations = stale_enumerations;
    config
}

fn start(config: &ServerConfig) -> SimulatedSystem {
    SimulatedSystem::start(
        config,
        Arc::new(EventRecorder::default()),
        Arc::new(LogRingBuffer::default()),
    )
}

async fn plug_in(system: &SimulatedSystem) {
    system.host.plug_in().await;
}

fn kinds(system: &SimulatedSystem) -> Vec<EventKind> {
    system
        .ctx
        .events()
        .records()
        .into_iter()
        .map(|r| r.kind)
        .collect()
}

/// `expected` appears in `actual` in order, not necessarily adjacent
fn is_subsequence(expected: &[EventKind], actual: &[EventKind]) -> bool {
    let mut rest = actual.iter();
    expected.iter().all(|e| rest.any(|a| a == e))
}

// ============================================================================
// Happy Path
// ============================================================================

mod cooperative_host {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_link_sync_kick_leads_to_address() {
        let system = start(&config(0));
        plug_in(&system).await;

        sleep(Duration::from_secs(2)).await;

        let events = system.ctx.events();
        assert!(events.has(EventKind::AddressAssigned));
        assert_eq!(system.host.detach_count(), 0);
        assert!(system.ctx.link_up());
        assert_eq!(system.ctx.mount_state(), MountState::Mounted);
        assert!(is_subsequence(
            &[
                EventKind::StackReady,
                EventKind::UsbMounted,
                EventKind::LinkUp,
                EventKind::FirstRx,
                EventKind::DhcpDiscoverSeen,
                EventKind::DhcpOfferSeen,
                EventKind::FirstTx,
                EventKind::DhcpRequestSeen,
                EventKind::DhcpAckSeen,
                EventKind::AddressAssigned,
            ],
            &kinds(&system)
        ));

        let counters = system.ctx.counters();
        assert_eq!(counters.rx_count, 2);
        assert_eq!(counters.tx_count, 2);
        assert_eq!(counters.rx_dropped, 0);

        // RX arrived, so the watchdog stays quiet from here on
        sleep(Duration::from_secs(30)).await;
        assert_eq!(system.host.detach_count(), 0);
        assert_eq!(system.ctx.recovery().attempts, 0);

        system.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_kicks_link() {
        let system = start(&config(0));
        plug_in(&system).await;
        sleep(Duration::from_secs(2)).await;

        system.host.suspend(true);
        sleep(Duration::from_millis(10)).await;
        assert!(!system.ctx.link_up());
        assert_eq!(system.ctx.mount_state(), MountState::Suspended);

        system.host.resume();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(system.ctx.mount_state(), MountState::Mounted);
        assert!(system.ctx.link_up());
        let last_link_up = system
            .ctx
            .events()
            .records()
            .into_iter()
            .filter(|r| r.kind == EventKind::LinkUp)
            .last()
            .unwrap();
        assert_eq!(last_link_up.detail.as_deref(), Some("resumed"));
        assert_eq!(system.host.link_notifications().last(), Some(&true));

        system.shutdown();
    }
}

// ============================================================================
// Late IP Stack
// ============================================================================

mod late_stack {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stack_ready_after_mount_kicks_link() {
        let mut config = config(0);
        config.simulation.stack_start_delay = Duration::from_secs(1);
        let system = start(&config);
        plug_in(&system).await;

        // Mounted, but nothing brings the link up without a stack
        sleep(Duration::from_millis(700)).await;
        assert_eq!(system.ctx.mount_state(), MountState::Mounted);
        assert!(!system.ctx.stack_ready());
        assert!(!system.ctx.link_up());
        assert!(!system.ctx.events().has(EventKind::LinkUp));

        sleep(Duration::from_secs(2)).await;

        assert!(system.ctx.stack_ready());
        assert!(system.ctx.link_up());
        let events = system.ctx.events();
        assert!(events.has(EventKind::AddressAssigned));
        let reasons: Vec<_> = events
            .records()
            .into_iter()
            .filter(|r| r.kind == EventKind::LinkUp)
            .filter_map(|r| r.detail)
            .collect();
        assert_eq!(reasons, vec!["link-sync"]);
        assert!(is_subsequence(
            &[
                EventKind::UsbMounted,
                EventKind::StackReady,
                EventKind::LinkUp,
                EventKind::FirstRx,
            ],
            &kinds(&system)
        ));
        assert_eq!(system.host.detach_count(), 0);

        system.shutdown();
    }
}

// ============================================================================
// Recovery
// ============================================================================

mod stale_host {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_no_rx_triggers_detach_reattach() {
        let system = start(&config(1));
        plug_in(&system).await;

        // Inside the grace period: link kicked, host silent, no recovery yet
        sleep(Duration::from_millis(1500)).await;
        assert!(system.ctx.link_up());
        assert_eq!(system.host.detach_count(), 0);
        assert!(!system.ctx.events().has(EventKind::FirstRx));

        sleep(Duration::from_secs(6)).await;

        assert_eq!(system.host.detach_count(), 1);
        assert_eq!(system.host.attach_count(), 1);
        assert_eq!(system.host.enumerations(), 2);
        assert!(system.ctx.events().has(EventKind::AddressAssigned));

        let recovery = system.ctx.recovery();
        assert_eq!(recovery.attempts, 1);
        assert_eq!(recovery.backoff, Duration::from_millis(5000));

        assert!(is_subsequence(
            &[
                EventKind::UsbMounted,
                EventKind::LinkUp,
                EventKind::UsbUnmounted,
                EventKind::UsbMounted,
                EventKind::LinkUp,
                EventKind::FirstRx,
                EventKind::AddressAssigned,
            ],
            &kinds(&system)
        ));

        let reasons: Vec<_> = system
            .ctx
            .events()
            .records()
            .into_iter()
            .filter(|r| r.kind == EventKind::LinkUp)
            .filter_map(|r| r.detail)
            .collect();
        assert_eq!(reasons, vec!["link-sync", "post-reattach"]);

        system.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_capped_until_next_mount() {
        let system = start(&config(u32::MAX));
        plug_in(&system).await;

        sleep(Duration::from_secs(180)).await;

        let max = ServerConfig::default().watchdog.max_attempts;
        assert_eq!(system.host.detach_count(), max);
        let recovery = system.ctx.recovery();
        assert_eq!(recovery.attempts, max);
        assert_eq!(recovery.backoff, Duration::from_secs(15));

        // Host-initiated replug starts a fresh cycle
        system.host.unplug();
        plug_in(&system).await;
        sleep(Duration::from_millis(10)).await;

        let recovery = system.ctx.recovery();
        assert_eq!(recovery.attempts, 0);
        assert_eq!(recovery.backoff, Duration::from_millis(2500));

        sleep(Duration::from_secs(3)).await;
        assert_eq!(system.host.detach_count(), max + 1);

        system.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_recoveries_respect_backoff() {
        let system = start(&config(u32::MAX));
        plug_in(&system).await;

        // First recovery at ~2.25s, second no sooner than 5s after it
        sleep(Duration::from_secs(3)).await;
        assert_eq!(system.host.detach_count(), 1);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(system.host.detach_count(), 1);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(system.host.detach_count(), 2);

        system.shutdown();
    }
}

// ============================================================================
// Slow Re-enumeration
// ============================================================================

mod slow_host {
    use super::*;

    fn slow_config(reenumeration_delay: Duration) -> ServerConfig {
        let mut config = config(u32::MAX);
        config.simulation.reenumeration_delay = reenumeration_delay;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_remount_keeps_backoff_and_cap() {
        // Mounted arrives 2s after reattach, after the settle delay is over
        let system = start(&slow_config(Duration::from_secs(2)));
        plug_in(&system).await;

        sleep(Duration::from_millis(5900)).await;
        assert_eq!(system.host.detach_count(), 1);
        assert_eq!(system.host.enumerations(), 2);
        assert_eq!(system.ctx.mount_state(), MountState::Mounted);
        let recovery = system.ctx.recovery();
        assert_eq!(recovery.attempts, 1);
        assert_eq!(recovery.backoff, Duration::from_millis(5000));

        // Second attempt at ~7.25s, third not before ~17.25s
        sleep(Duration::from_secs(9)).await;
        assert_eq!(system.host.detach_count(), 2);
        assert_eq!(system.ctx.recovery().backoff, Duration::from_millis(10000));

        sleep(Duration::from_secs(165)).await;
        let max = ServerConfig::default().watchdog.max_attempts;
        assert_eq!(system.host.detach_count(), max);
        let recovery = system.ctx.recovery();
        assert_eq!(recovery.attempts, max);
        assert_eq!(recovery.backoff, Duration::from_secs(15));

        system.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_remount_after_window_starts_fresh_cycle() {
        // Reattach at ~3.25s, window closes at ~6.75s, Mounted at ~8.25s
        let system = start(&slow_config(Duration::from_secs(5)));
        plug_in(&system).await;

        sleep(Duration::from_millis(7900)).await;
        assert_eq!(system.host.enumerations(), 1);
        assert_eq!(system.ctx.recovery().attempts, 1);

        sleep(Duration::from_millis(500)).await;
        assert_eq!(system.host.enumerations(), 2);
        let recovery = system.ctx.recovery();
        assert_eq!(recovery.attempts, 0);
        assert_eq!(recovery.backoff, Duration::from_millis(2500));

        system.shutdown();
    }
}
