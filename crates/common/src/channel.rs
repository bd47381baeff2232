//! Lifecycle event channel between the USB transport and the link supervisor
//!
//! Transport callbacks run on contexts that must not block, so the sending
//! side only ever uses `try_send`. The receiving side is consumed by exactly
//! one task: the link supervisor, which is the single writer of link state.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use std::fmt;

/// Capacity of the lifecycle channel
pub const TRANSPORT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle notifications raised by the USB transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// Host configured the device
    Mounted,
    /// Host released the device or the cable was pulled
    Unmounted,
    /// Host suspended the bus
    Suspended {
        /// Host allows the device to signal remote wakeup
        remote_wakeup: bool,
    },
    /// Host resumed the bus
    Resumed,
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Mounted => write!(f, "mounted"),
            TransportEvent::Unmounted => write!(f, "unmounted"),
            TransportEvent::Suspended { remote_wakeup } => {
                write!(f, "suspended (remote_wakeup={})", remote_wakeup)
            }
            TransportEvent::Resumed => write!(f, "resumed"),
        }
    }
}

/// Sending half, held by the transport (cheap to clone)
#[derive(Clone)]
pub struct TransportNotifier {
    tx: Sender<TransportEvent>,
}

impl TransportNotifier {
    /// Queue an event without blocking
    pub fn notify(&self, event: TransportEvent) -> crate::Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(ev) => {
                crate::Error::Channel(format!("transport event queue full, dropped {}", ev))
            }
            TrySendError::Closed(ev) => {
                crate::Error::Channel(format!("transport event queue closed, dropped {}", ev))
            }
        })
    }
}

/// Receiving half, consumed by the link supervisor
pub struct TransportEvents {
    rx: Receiver<TransportEvent>,
}

impl TransportEvents {
    /// Wait for the next event
    pub async fn recv(&self) -> crate::Result<TransportEvent> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take an already-queued event without waiting
    pub fn try_recv(&self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create the lifecycle channel
///
/// Returns (TransportNotifier for the transport, TransportEvents for the supervisor)
pub fn create_transport_channel() -> (TransportNotifier, TransportEvents) {
    let (tx, rx) = bounded(TRANSPORT_CHANNEL_CAPACITY);
    (TransportNotifier { tx }, TransportEvents { rx })
}
