//! Sticky milestone event recorder
//!
//! Unlike the rolling log buffer, recorded events are never overwritten. The
//! list is bounded: once it is full further events are dropped from the
//! human-readable trace, but the per-kind flags keep answering "has this ever
//! happened" correctly until the process exits.

use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Default number of retained event records
pub const DEFAULT_EVENT_CAPACITY: usize = 30;

/// Default maximum detail length in bytes
pub const DEFAULT_DETAIL_MAX: usize = 63;

/// Lock wait for `record` / `has`
const RECORD_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

/// Lock wait for renders
const RENDER_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Milestones of the USB link / address acquisition handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    UsbMounted,
    UsbUnmounted,
    UsbSuspended,
    UsbResumed,
    LinkUp,
    StackReady,
    FirstRx,
    FirstTx,
    DhcpDiscoverSeen,
    DhcpOfferSeen,
    DhcpRequestSeen,
    DhcpAckSeen,
    AddressAssigned,
}

impl EventKind {
    /// Number of event kinds
    pub const COUNT: usize = 13;

    /// Every kind, in display order
    pub const ALL: [EventKind; Self::COUNT] = [
        EventKind::UsbMounted,
        EventKind::UsbUnmounted,
        EventKind::UsbSuspended,
        EventKind::UsbResumed,
        EventKind::LinkUp,
        EventKind::StackReady,
        EventKind::FirstRx,
        EventKind::FirstTx,
        EventKind::DhcpDiscoverSeen,
        EventKind::DhcpOfferSeen,
        EventKind::DhcpRequestSeen,
        EventKind::DhcpAckSeen,
        EventKind::AddressAssigned,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::UsbMounted => "USB_MOUNTED",
            EventKind::UsbUnmounted => "USB_UNMOUNTED",
            EventKind::UsbSuspended => "USB_SUSPENDED",
            EventKind::UsbResumed => "USB_RESUMED",
            EventKind::LinkUp => "LINK_UP",
            EventKind::StackReady => "STACK_READY",
            EventKind::FirstRx => "FIRST_RX",
            EventKind::FirstTx => "FIRST_TX",
            EventKind::DhcpDiscoverSeen => "DHCP_DISCOVER_SEEN",
            EventKind::DhcpOfferSeen => "DHCP_OFFER_SEEN",
            EventKind::DhcpRequestSeen => "DHCP_REQUEST_SEEN",
            EventKind::DhcpAckSeen => "DHCP_ACK_SEEN",
            EventKind::AddressAssigned => "ADDRESS_ASSIGNED",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// A single retained event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    /// Milliseconds since the recorder was created
    pub timestamp_ms: u64,
    pub kind: EventKind,
    pub detail: Option<String>,
}

/// Per-kind sticky flags, ordered by kind
pub type EventStatus = BTreeMap<EventKind, bool>;

struct Inner {
    records: Vec<EventRecord>,
    occurred: [bool; EventKind::COUNT],
}

/// Append-only bounded event list with sticky per-kind flags
pub struct EventRecorder {
    inner: Mutex<Inner>,
    capacity: usize,
    detail_max: usize,
    started: Instant,
}

impl EventRecorder {
    pub fn new(capacity: usize, detail_max: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: Vec::with_capacity(capacity),
                occurred: [false; EventKind::COUNT],
            }),
            capacity,
            detail_max,
            started: Instant::now(),
        }
    }

    /// Record an event
    ///
    /// The sticky flag is always set; the record itself is only kept while the
    /// list has room. Skipped entirely if the lock cannot be taken in time.
    pub fn record(&self, kind: EventKind, detail: Option<&str>) {
        let Some(mut inner) = self.inner.try_lock_for(RECORD_LOCK_TIMEOUT) else {
            trace!("Event recorder busy, skipping {}", kind);
            return;
        };

        inner.occurred[kind.index()] = true;

        if inner.records.len() < self.capacity {
            let timestamp_ms = self.started.elapsed().as_millis() as u64;
            let detail = detail.map(|d| truncate_str(d, self.detail_max).to_string());
            inner.records.push(EventRecord {
                timestamp_ms,
                kind,
                detail,
            });
        }
    }

    /// Whether `kind` has ever been recorded
    pub fn has(&self, kind: EventKind) -> bool {
        self.inner
            .try_lock_for(RECORD_LOCK_TIMEOUT)
            .map(|inner| inner.occurred[kind.index()])
            .unwrap_or(false)
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.inner
            .try_lock_for(RENDER_LOCK_TIMEOUT)
            .map(|inner| inner.records.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the retained records, oldest first
    pub fn records(&self) -> Vec<EventRecord> {
        self.inner
            .try_lock_for(RENDER_LOCK_TIMEOUT)
            .map(|inner| inner.records.clone())
            .unwrap_or_default()
    }

    /// Text dump of every retained record followed by the flag summary
    ///
    /// Returns `None` if the recorder is busy.
    pub fn render_all(&self) -> Option<String> {
        let inner = self.inner.try_lock_for(RENDER_LOCK_TIMEOUT)?;
        let mut out = String::with_capacity(64 * (inner.records.len() + EventKind::COUNT));

        let _ = writeln!(
            out,
            "=== CRITICAL EVENTS ({} recorded) ===\n",
            inner.records.len()
        );
        for record in &inner.records {
            match &record.detail {
                Some(detail) => {
                    let _ = writeln!(
                        out,
                        "[{:6} ms] {}: {}",
                        record.timestamp_ms, record.kind, detail
                    );
                }
                None => {
                    let _ = writeln!(out, "[{:6} ms] {}", record.timestamp_ms, record.kind);
                }
            }
        }

        let _ = writeln!(out, "\n=== STATUS FLAGS ===");
        for kind in EventKind::ALL {
            let flag = if inner.occurred[kind.index()] { "YES" } else { "NO" };
            let _ = writeln!(out, "{}: {}", kind, flag);
        }

        Some(out)
    }

    /// Every kind mapped to its sticky flag
    pub fn render_status(&self) -> Option<EventStatus> {
        let inner = self.inner.try_lock_for(RENDER_LOCK_TIMEOUT)?;
        Some(
            EventKind::ALL
                .iter()
                .map(|&kind| (kind, inner.occurred[kind.index()]))
                .collect(),
        )
    }

    /// JSON object of `"NAME": bool` for every kind
    pub fn status_json(&self) -> Option<String> {
        let status = self.render_status()?;
        serde_json::to_string_pretty(&status).ok()
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY, DEFAULT_DETAIL_MAX)
    }
}

/// Truncate to at most `max` bytes without splitting a character
pub(crate) fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
