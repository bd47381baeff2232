//! Frame-level protocol helpers for usb-ncm-bridge
//!
//! This crate owns everything the bridge knows about the bytes it moves:
//! the owned, size-bounded frame type handed across the RX boundary, the
//! Ethernet/IPv4/UDP field inspection used to label DHCP traffic for
//! diagnostics, and a small DHCP message builder for the simulated
//! collaborators.
//!
//! # Example
//!
//! ```
//! use protocol::{DhcpDirection, DhcpFrame, DhcpMessageType, OwnedFrame};
//!
//! let bytes = DhcpFrame::client(DhcpMessageType::Discover, [2, 0, 0, 0, 0, 1], 42).to_bytes();
//! let frame = OwnedFrame::copy_from(&bytes, 2048).unwrap();
//! assert_eq!(frame.dhcp_direction(), Some(DhcpDirection::ClientToServer));
//! ```

pub mod classify;
pub mod dhcp;
pub mod error;
pub mod frame;

pub use classify::{
    DHCP_CLIENT_PORT, DHCP_SERVER_PORT, DhcpDirection, EtherType, IP_PROTOCOL_UDP, classify_dhcp,
    ether_type, udp_ports,
};
pub use dhcp::{DhcpFrame, DhcpMessageType};
pub use error::{ProtocolError, Result};
pub use frame::{MAX_ETHERNET_FRAME_LEN, MIN_FRAME_LEN, OwnedFrame};
