//! Read-only diagnostics for the application layer
//!
//! What a status page or debug endpoint needs: the event trace, sticky flags,
//! recent log lines, a live log stream and a state snapshot.

use crate::context::{BridgeContext, MountState, PacketCounters};
use crate::watchdog::RecoverySummary;
use common::{LogStreamConfig, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// Point-in-time view of the bridge
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticSnapshot {
    pub mount_state: MountState,
    pub link_up: bool,
    pub stack_ready: bool,
    pub counters: PacketCounters,
    pub recovery: RecoverySummary,
}

#[derive(Clone)]
pub struct Diagnostics {
    ctx: Arc<BridgeContext>,
    stream_config: LogStreamConfig,
}

impl Diagnostics {
    pub fn new(ctx: Arc<BridgeContext>, stream_config: LogStreamConfig) -> Self {
        Self { ctx, stream_config }
    }

    /// Event trace and flag summary; `None` if the recorder is busy
    pub fn events_text(&self) -> Option<String> {
        self.ctx.events().render_all()
    }

    /// Sticky flags as a JSON object
    pub fn status_json(&self) -> Option<String> {
        self.ctx.events().status_json()
    }

    /// Every retained log line, oldest first
    pub fn logs_dump(&self) -> Vec<String> {
        self.ctx.logs().dump_all()
    }

    /// Stream live log lines as SSE until the consumer goes away
    pub async fn stream_logs<W>(&self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        common::stream_logs(self.ctx.logs(), writer, self.stream_config).await
    }

    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            mount_state: self.ctx.mount_state(),
            link_up: self.ctx.link_up(),
            stack_ready: self.ctx.stack_ready(),
            counters: self.ctx.counters(),
            recovery: self.ctx.recovery_summary(),
        }
    }

    pub fn snapshot_json(&self) -> Option<String> {
        serde_json::to_string_pretty(&self.snapshot()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{EventKind, EventRecorder, LogRingBuffer};
    use std::time::Duration;

    fn diagnostics() -> Diagnostics {
        let ctx = Arc::new(BridgeContext::new(
            Arc::new(EventRecorder::default()),
            Arc::new(LogRingBuffer::default()),
            Duration::from_millis(2500),
            Duration::from_millis(50),
        ));
        Diagnostics::new(ctx, LogStreamConfig::default())
    }

    #[test]
    fn test_snapshot_json() {
        let diag = diagnostics();
        diag.ctx.mark_stack_ready();
        diag.ctx.count_rx(64);

        let json: serde_json::Value =
            serde_json::from_str(&diag.snapshot_json().unwrap()).unwrap();
        assert_eq!(json["mount_state"], "unmounted");
        assert_eq!(json["stack_ready"], true);
        assert_eq!(json["counters"]["rx_bytes"], 64);
        assert_eq!(json["recovery"]["backoff_ms"], 2500);
    }

    #[test]
    fn test_event_and_log_views() {
        let diag = diagnostics();
        diag.ctx.events().record(EventKind::LinkUp, Some("link-sync"));
        diag.ctx.logs().write("hello");

        assert!(diag.events_text().unwrap().contains("LINK_UP: link-sync"));
        assert!(diag.status_json().unwrap().contains("\"LINK_UP\": true"));
        assert_eq!(diag.logs_dump(), vec!["hello"]);
    }
}
