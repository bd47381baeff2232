//! Collaborator seams: the USB network-class transport and the IP stack
//!
//! Both are held as `Arc<dyn ..>` so the real device drivers and the
//! simulated collaborators used in tests plug in the same way.

use async_trait::async_trait;
use protocol::OwnedFrame;
use thiserror::Error;

/// Transport-side failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport busy")]
    Busy,

    #[error("Transport operation timed out")]
    TimedOut,

    #[error("Device is detached from the bus")]
    Detached,
}

/// IP-stack-side failures when injecting a received frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("IP stack not ready")]
    NotReady,

    #[error("IP stack input queue full")]
    QueueFull,

    #[error("Frame rejected by IP stack: {0}")]
    Rejected(String),
}

/// USB network-class transport
///
/// Lifecycle notifications (mount, unmount, suspend, resume) are not part of
/// this trait: the transport raises them through a
/// [`common::TransportNotifier`]. Received frames are delivered by calling
/// [`crate::bridge::PacketBridge::on_receive`] directly.
#[async_trait]
pub trait UsbTransport: Send + Sync {
    /// Send one Ethernet frame to the host
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Out-of-band link state notification to the host
    fn notify_link(&self, up: bool) -> Result<(), TransportError>;

    /// Drop off the bus so the host forgets the device
    fn detach(&self) -> Result<(), TransportError>;

    /// Reconnect to the bus, causing a fresh enumeration
    fn attach(&self) -> Result<(), TransportError>;
}

/// Receiving side of the IP stack
///
/// `inject` takes ownership of the frame; the stack releases it by dropping
/// it once processed. It must not block.
pub trait IpStack: Send + Sync {
    fn inject(&self, frame: OwnedFrame) -> Result<(), StackError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            TransportError::TimedOut.to_string(),
            "Transport operation timed out"
        );
        assert_eq!(
            StackError::Rejected("bad checksum".into()).to_string(),
            "Frame rejected by IP stack: bad checksum"
        );
    }
}
