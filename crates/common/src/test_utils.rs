//! Test utilities shared by the bridge crates
//!
//! Frame builders produce minimal but well-formed Ethernet frames so tests can
//! exercise classification and gating without hand-assembling bytes.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{dhcp_discover_frame, TEST_CLIENT_MAC};
//! use protocol::{classify_dhcp, DhcpDirection};
//!
//! let frame = dhcp_discover_frame(TEST_CLIENT_MAC, 1);
//! assert_eq!(classify_dhcp(&frame), Some(DhcpDirection::ClientToServer));
//! ```

use protocol::{DhcpFrame, DhcpMessageType, EtherType, IP_PROTOCOL_UDP, MIN_FRAME_LEN};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Locally administered MAC used for the simulated host
pub const TEST_CLIENT_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x10];

/// Locally administered MAC used for the device side
pub const TEST_DEVICE_MAC: [u8; 6] = [0x02, 0x02, 0x84, 0x6A, 0x96, 0x00];

/// Device address handed out by the simulated stack
pub const TEST_DEVICE_IP: [u8; 4] = [192, 168, 7, 1];

/// Host address handed out by the simulated stack
pub const TEST_HOST_IP: [u8; 4] = [192, 168, 7, 2];

/// Build a DHCP DISCOVER as a host would send it (68 -> 67)
pub fn dhcp_discover_frame(client_mac: [u8; 6], xid: u32) -> Vec<u8> {
    DhcpFrame::client(DhcpMessageType::Discover, client_mac, xid).to_bytes()
}

/// Build a DHCP REQUEST as a host would send it (68 -> 67)
pub fn dhcp_request_frame(client_mac: [u8; 6], xid: u32) -> Vec<u8> {
    DhcpFrame::client(DhcpMessageType::Request, client_mac, xid).to_bytes()
}

/// Build a DHCP OFFER as the device would send it (67 -> 68)
pub fn dhcp_offer_frame(client_mac: [u8; 6], xid: u32) -> Vec<u8> {
    DhcpFrame::server(
        DhcpMessageType::Offer,
        TEST_DEVICE_MAC,
        TEST_DEVICE_IP,
        client_mac,
        xid,
        TEST_HOST_IP,
    )
    .to_bytes()
}

/// Build a DHCP ACK as the device would send it (67 -> 68)
pub fn dhcp_ack_frame(client_mac: [u8; 6], xid: u32) -> Vec<u8> {
    DhcpFrame::server(
        DhcpMessageType::Ack,
        TEST_DEVICE_MAC,
        TEST_DEVICE_IP,
        client_mac,
        xid,
        TEST_HOST_IP,
    )
    .to_bytes()
}

/// Build a minimum-size frame with the given EtherType and zeroed payload
pub fn ethernet_frame(ether_type: u16) -> Vec<u8> {
    let mut frame = vec![0u8; MIN_FRAME_LEN];
    frame[0..6].copy_from_slice(&[0xFF; 6]);
    frame[6..12].copy_from_slice(&TEST_CLIENT_MAC);
    frame[12..14].copy_from_slice(&ether_type.to_be_bytes());
    frame
}

/// Build an ARP frame
pub fn arp_frame() -> Vec<u8> {
    ethernet_frame(EtherType::ARP)
}

/// Build an IPv6 frame
pub fn ipv6_frame() -> Vec<u8> {
    ethernet_frame(EtherType::IPV6)
}

/// Build an IPv4/UDP frame with the given ports
pub fn udp_frame(src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut frame = ethernet_frame(EtherType::IPV4);
    frame[14] = 0x45;
    frame[23] = IP_PROTOCOL_UDP;
    frame[34..36].copy_from_slice(&src_port.to_be_bytes());
    frame[36..38].copy_from_slice(&dst_port.to_be_bytes());
    frame
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
