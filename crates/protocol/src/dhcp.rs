//! Minimal DHCP message helpers
//!
//! Used by the simulated host and address allocator to speak just enough DHCP
//! to walk through DISCOVER/OFFER/REQUEST/ACK. The bridge itself only looks at
//! UDP ports (see [`crate::classify`]).

use crate::classify::{
    DHCP_CLIENT_PORT, DHCP_SERVER_PORT, EtherType, IP_PROTOCOL_UDP, classify_dhcp,
};
use crate::error::{ProtocolError, Result};

const ETH_HEADER_LEN: usize = 14;
const UDP_HEADER_LEN: usize = 8;
const BOOTP_FIXED_LEN: usize = 236;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const OPTION_PAD: u8 = 0;
const OPTION_MESSAGE_TYPE: u8 = 53;
const OPTION_SERVER_ID: u8 = 54;
const OPTION_END: u8 = 255;

/// Broadcast MAC address
pub const BROADCAST_MAC: [u8; 6] = [0xFF; 6];

/// DHCP message type (option 53)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl DhcpMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
        }
    }

    /// True for messages a server sends (67 -> 68)
    pub fn is_server_message(self) -> bool {
        matches!(self, Self::Offer | Self::Ack | Self::Nak)
    }
}

/// Offset of the BOOTP payload, honouring the IPv4 header length
fn bootp_offset(frame: &[u8]) -> Result<usize> {
    let version_ihl = *frame.get(ETH_HEADER_LEN).ok_or(ProtocolError::Truncated {
        needed: ETH_HEADER_LEN + 1,
        actual: frame.len(),
    })?;
    let ihl = usize::from(version_ihl & 0x0F) * 4;
    Ok(ETH_HEADER_LEN + ihl + UDP_HEADER_LEN)
}

/// Extract the DHCP message type of a frame
///
/// Returns `Ok(None)` for frames that are not DHCP by port, or that carry no
/// message type option.
pub fn message_type(frame: &[u8]) -> Result<Option<DhcpMessageType>> {
    if classify_dhcp(frame).is_none() {
        return Ok(None);
    }

    let bootp = bootp_offset(frame)?;
    let options = bootp + BOOTP_FIXED_LEN + MAGIC_COOKIE.len();
    if frame.len() < options {
        return Err(ProtocolError::Truncated {
            needed: options,
            actual: frame.len(),
        });
    }
    if frame[options - MAGIC_COOKIE.len()..options] != MAGIC_COOKIE {
        return Ok(None);
    }

    let mut i = options;
    while i < frame.len() {
        match frame[i] {
            OPTION_PAD => i += 1,
            OPTION_END => break,
            code => {
                let len = usize::from(*frame.get(i + 1).ok_or(ProtocolError::Truncated {
                    needed: i + 2,
                    actual: frame.len(),
                })?);
                if code == OPTION_MESSAGE_TYPE && len == 1 {
                    let value = *frame.get(i + 2).ok_or(ProtocolError::Truncated {
                        needed: i + 3,
                        actual: frame.len(),
                    })?;
                    return Ok(DhcpMessageType::from_u8(value));
                }
                i += 2 + len;
            }
        }
    }
    Ok(None)
}

/// Extract the client hardware address from a DHCP frame
pub fn client_mac(frame: &[u8]) -> Result<[u8; 6]> {
    let chaddr = bootp_offset(frame)? + 28;
    let bytes = frame.get(chaddr..chaddr + 6).ok_or(ProtocolError::Truncated {
        needed: chaddr + 6,
        actual: frame.len(),
    })?;
    let mut mac = [0u8; 6];
    mac.copy_from_slice(bytes);
    Ok(mac)
}

/// Extract the transaction id from a DHCP frame
pub fn transaction_id(frame: &[u8]) -> Result<u32> {
    let xid = bootp_offset(frame)? + 4;
    let bytes = frame.get(xid..xid + 4).ok_or(ProtocolError::Truncated {
        needed: xid + 4,
        actual: frame.len(),
    })?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Builder for broadcast DHCP frames
#[derive(Debug, Clone)]
pub struct DhcpFrame {
    pub message_type: DhcpMessageType,
    pub transaction_id: u32,
    pub client_mac: [u8; 6],
    /// MAC of the sender (client MAC for client messages)
    pub source_mac: [u8; 6],
    /// Address offered/acknowledged (`yiaddr`), zero for client messages
    pub your_ip: [u8; 4],
    /// Server identifier, also used as the IPv4 source of server messages
    pub server_ip: [u8; 4],
}

impl DhcpFrame {
    pub fn client(message_type: DhcpMessageType, client_mac: [u8; 6], transaction_id: u32) -> Self {
        Self {
            message_type,
            transaction_id,
            client_mac,
            source_mac: client_mac,
            your_ip: [0; 4],
            server_ip: [0; 4],
        }
    }

    pub fn server(
        message_type: DhcpMessageType,
        server_mac: [u8; 6],
        server_ip: [u8; 4],
        client_mac: [u8; 6],
        transaction_id: u32,
        your_ip: [u8; 4],
    ) -> Self {
        Self {
            message_type,
            transaction_id,
            client_mac,
            source_mac: server_mac,
            your_ip,
            server_ip,
        }
    }

    /// Serialize into a complete Ethernet frame
    pub fn to_bytes(&self) -> Vec<u8> {
        let from_server = self.message_type.is_server_message();
        let (src_port, dst_port) = if from_server {
            (DHCP_SERVER_PORT, DHCP_CLIENT_PORT)
        } else {
            (DHCP_CLIENT_PORT, DHCP_SERVER_PORT)
        };
        let src_ip = if from_server { self.server_ip } else { [0; 4] };

        let mut payload = Vec::with_capacity(BOOTP_FIXED_LEN + 16);
        payload.push(if from_server { 2 } else { 1 }); // op
        payload.push(1); // htype: Ethernet
        payload.push(6); // hlen
        payload.push(0); // hops
        payload.extend_from_slice(&self.transaction_id.to_be_bytes());
        payload.extend_from_slice(&[0, 0]); // secs
        payload.extend_from_slice(&0x8000u16.to_be_bytes()); // broadcast flag
        payload.extend_from_slice(&[0; 4]); // ciaddr
        payload.extend_from_slice(&self.your_ip);
        payload.extend_from_slice(&[0; 4]); // siaddr
        payload.extend_from_slice(&[0; 4]); // giaddr
        payload.extend_from_slice(&self.client_mac);
        payload.extend_from_slice(&[0; 10]); // chaddr padding
        payload.extend_from_slice(&[0; 64 + 128]); // sname + file
        payload.extend_from_slice(&MAGIC_COOKIE);
        payload.extend_from_slice(&[OPTION_MESSAGE_TYPE, 1, self.message_type.as_u8()]);
        if from_server {
            payload.extend_from_slice(&[OPTION_SERVER_ID, 4]);
            payload.extend_from_slice(&self.server_ip);
        }
        payload.push(OPTION_END);

        let udp_len = (UDP_HEADER_LEN + payload.len()) as u16;
        let ip_len = 20 + udp_len;

        let mut ip = Vec::with_capacity(20);
        ip.push(0x45);
        ip.push(0);
        ip.extend_from_slice(&ip_len.to_be_bytes());
        ip.extend_from_slice(&[0, 0, 0, 0]); // id, flags/fragment
        ip.push(64); // ttl
        ip.push(IP_PROTOCOL_UDP);
        ip.extend_from_slice(&[0, 0]); // checksum placeholder
        ip.extend_from_slice(&src_ip);
        ip.extend_from_slice(&[255, 255, 255, 255]);
        let checksum = ipv4_checksum(&ip);
        ip[10..12].copy_from_slice(&checksum.to_be_bytes());

        let mut frame = Vec::with_capacity(ETH_HEADER_LEN + ip_len as usize);
        frame.extend_from_slice(&BROADCAST_MAC);
        frame.extend_from_slice(&self.source_mac);
        frame.extend_from_slice(&EtherType::IPV4.to_be_bytes());
        frame.extend_from_slice(&ip);
        frame.extend_from_slice(&src_port.to_be_bytes());
        frame.extend_from_slice(&dst_port.to_be_bytes());
        frame.extend_from_slice(&udp_len.to_be_bytes());
        frame.extend_from_slice(&[0, 0]); // UDP checksum optional over IPv4
        frame.extend_from_slice(&payload);
        frame
    }
}

fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|c| u32::from(u16::from_be_bytes([c[0], *c.get(1).unwrap_or(&0)])))
        .sum();
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
