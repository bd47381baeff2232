//! Ethernet/IPv4/UDP field inspection
//!
//! Only the handful of fields needed to label traffic for diagnostics are read:
//!
//! ```text
//! offset 12..14  EtherType
//! offset 23      IPv4 protocol (assumes a 20 byte IPv4 header)
//! offset 34..36  UDP source port
//! offset 36..38  UDP destination port
//! ```
//!
//! Classification never affects forwarding; a frame that cannot be classified
//! is still bridged.

use std::fmt;

/// Offset of the EtherType field
pub const ETHERTYPE_OFFSET: usize = 12;

/// Offset of the IPv4 protocol field
pub const IP_PROTOCOL_OFFSET: usize = 23;

/// Offset of the UDP source port
pub const UDP_SRC_PORT_OFFSET: usize = 34;

/// Offset of the UDP destination port
pub const UDP_DST_PORT_OFFSET: usize = 36;

/// IPv4 protocol number for UDP
pub const IP_PROTOCOL_UDP: u8 = 17;

/// DHCP server port
pub const DHCP_SERVER_PORT: u16 = 67;

/// DHCP client port
pub const DHCP_CLIENT_PORT: u16 = 68;

const DHCP_MIN_LEN: usize = UDP_DST_PORT_OFFSET + 2;

/// Frame EtherType
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EtherType {
    Ipv4,
    Arp,
    Ipv6,
    Other(u16),
}

impl EtherType {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const IPV6: u16 = 0x86DD;

    pub fn from_u16(value: u16) -> Self {
        match value {
            Self::IPV4 => EtherType::Ipv4,
            Self::ARP => EtherType::Arp,
            Self::IPV6 => EtherType::Ipv6,
            other => EtherType::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            EtherType::Ipv4 => Self::IPV4,
            EtherType::Arp => Self::ARP,
            EtherType::Ipv6 => Self::IPV6,
            EtherType::Other(v) => v,
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtherType::Ipv4 => write!(f, "IPv4"),
            EtherType::Arp => write!(f, "ARP"),
            EtherType::Ipv6 => write!(f, "IPv6"),
            EtherType::Other(_) => write!(f, "UNKNOWN"),
        }
    }
}

/// Which side of a DHCP exchange a frame belongs to
///
/// Port numbers alone cannot tell DISCOVER from REQUEST, or OFFER from ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpDirection {
    /// UDP 68 -> 67
    ClientToServer,
    /// UDP 67 -> 68
    ServerToClient,
}

#[inline]
fn read_u16(frame: &[u8], offset: usize) -> Option<u16> {
    let bytes = frame.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Read the EtherType of a frame
pub fn ether_type(frame: &[u8]) -> Option<EtherType> {
    read_u16(frame, ETHERTYPE_OFFSET).map(EtherType::from_u16)
}

/// UDP (source, destination) ports of an IPv4/UDP frame
pub fn udp_ports(frame: &[u8]) -> Option<(u16, u16)> {
    if frame.len() < DHCP_MIN_LEN {
        return None;
    }
    if ether_type(frame)? != EtherType::Ipv4 || frame[IP_PROTOCOL_OFFSET] != IP_PROTOCOL_UDP {
        return None;
    }
    Some((
        read_u16(frame, UDP_SRC_PORT_OFFSET)?,
        read_u16(frame, UDP_DST_PORT_OFFSET)?,
    ))
}

/// Classify a frame as DHCP client or server traffic by UDP ports
pub fn classify_dhcp(frame: &[u8]) -> Option<DhcpDirection> {
    match udp_ports(frame)? {
        (DHCP_CLIENT_PORT, DHCP_SERVER_PORT) => Some(DhcpDirection::ClientToServer),
        (DHCP_SERVER_PORT, DHCP_CLIENT_PORT) => Some(DhcpDirection::ServerToClient),
        _ => None,
    }
}
