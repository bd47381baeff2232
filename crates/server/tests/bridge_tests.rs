//! Packet bridge integration tests against the simulated collaborators
//!
//! Run with: `cargo test -p server --test bridge_tests`

use common::test_utils::{TEST_CLIENT_MAC, arp_frame, dhcp_offer_frame};
use common::{EventKind, EventRecorder, LogRingBuffer};
use server::config::ServerConfig;
use server::sim::SimulatedSystem;
use server::{RxOutcome, TxOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::sleep;

fn start() -> SimulatedSystem {
    let mut config = ServerConfig::default();
    config.simulation.stale_enumerations = 0;
    SimulatedSystem::start(
        &config,
        Arc::new(EventRecorder::default()),
        Arc::new(LogRingBuffer::default()),
    )
}

// ============================================================================
// TX Gating
// ============================================================================

mod tx_gating {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tx_while_unmounted_is_silent_success() {
        let system = start();

        let outcome = system
            .bridge
            .transmit(&dhcp_offer_frame(TEST_CLIENT_MAC, 1))
            .await;

        assert_eq!(outcome, TxOutcome::Suppressed);
        assert_eq!(system.ctx.counters().tx_count, 0);
        assert!(system.host.sent_frames().is_empty());
        assert!(!system.ctx.events().has(EventKind::FirstTx));

        system.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tx_flows_once_link_is_up() {
        let system = start();
        system.host.plug_in().await;
        sleep(Duration::from_secs(1)).await;
        assert!(system.ctx.link_up());

        let before = system.host.sent_frames().len();
        let outcome = system.bridge.transmit(&arp_frame()).await;

        assert_eq!(outcome, TxOutcome::Sent { attempts: 1 });
        assert_eq!(system.host.sent_frames().len(), before + 1);

        system.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tx_after_unplug_is_suppressed() {
        let system = start();
        system.host.plug_in().await;
        sleep(Duration::from_secs(1)).await;
        let sent_before = system.ctx.counters().tx_count;

        system.host.unplug();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(
            system.bridge.transmit(&arp_frame()).await,
            TxOutcome::Suppressed
        );
        assert_eq!(system.ctx.counters().tx_count, sent_before);

        system.shutdown();
    }
}

// ============================================================================
// RX Path
// ============================================================================

mod rx_path {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rx_counts_survive_remount() {
        let system = start();
        system.host.plug_in().await;
        sleep(Duration::from_secs(1)).await;
        let first_cycle = system.ctx.counters();
        assert!(first_cycle.rx_count > 0);

        system.host.unplug();
        system.host.plug_in().await;
        sleep(Duration::from_millis(10)).await;

        assert!(system.ctx.timing().last_rx_at.is_none());
        assert_eq!(system.ctx.counters().rx_count, first_cycle.rx_count);

        assert_eq!(system.bridge.on_receive(&arp_frame()), RxOutcome::Forwarded);
        let first_rx = system
            .ctx
            .events()
            .records()
            .iter()
            .filter(|r| r.kind == EventKind::FirstRx)
            .count();
        assert_eq!(first_rx, 2);

        system.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stack_receives_copies() {
        let system = start();
        let mut frame = arp_frame();

        assert_eq!(system.bridge.on_receive(&frame), RxOutcome::Forwarded);
        frame.fill(0xAA);

        assert_eq!(system.stack.injected(), 1);
        assert_eq!(system.ctx.counters().rx_bytes, 60);

        system.shutdown();
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

mod diagnostics {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_and_log_stream() {
        let system = start();
        system.host.plug_in().await;
        sleep(Duration::from_secs(1)).await;

        let snapshot = system.diagnostics.snapshot();
        assert!(snapshot.link_up);
        assert!(snapshot.stack_ready);
        assert_eq!(snapshot.recovery.attempts, 0);

        let status: serde_json::Value =
            serde_json::from_str(&system.diagnostics.status_json().unwrap()).unwrap();
        assert_eq!(status["ADDRESS_ASSIGNED"], true);

        let (mut client, mut server) = tokio::io::duplex(1024);
        let diagnostics = system.diagnostics.clone();
        let stream = tokio::spawn(async move { diagnostics.stream_logs(&mut server).await });

        let mut buf = vec![0u8; 128];
        let n = client.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b": log stream connected"));

        system.ctx.logs().write("diagnostic line");
        let mut received = String::new();
        while !received.contains("data: diagnostic line") {
            let n = client.read(&mut buf).await.unwrap();
            received.push_str(&String::from_utf8_lossy(&buf[..n]));
        }

        drop(client);
        assert_eq!(stream.await.unwrap().unwrap(), 1);

        system.shutdown();
    }
}
