//! Integration tests for frame inspection
//!
//! Covers the classification rules the bridge relies on for diagnostics:
//! - EtherType detection at offset 12
//! - DHCP direction by UDP ports (68->67, 67->68)
//! - DHCP message type extraction for the simulated collaborators
//! - Owned frame bounds

use protocol::dhcp::{client_mac, message_type, transaction_id};
use protocol::{
    DhcpDirection, DhcpFrame, DhcpMessageType, EtherType, MAX_ETHERNET_FRAME_LEN, OwnedFrame,
    ProtocolError, classify_dhcp, ether_type, udp_ports,
};

const CLIENT_MAC: [u8; 6] = [0x02, 0xAB, 0xCD, 0x00, 0x00, 0x01];
const SERVER_MAC: [u8; 6] = [0x02, 0x02, 0x11, 0x22, 0x33, 0x02];
const SERVER_IP: [u8; 4] = [192, 168, 7, 1];

fn arp_frame() -> Vec<u8> {
    let mut f = vec![0u8; 42];
    f[12..14].copy_from_slice(&EtherType::ARP.to_be_bytes());
    f
}

// ============================================================================
// EtherType Tests
// ============================================================================

mod ether_types {
    use super::*;

    #[test]
    fn test_arp_is_not_dhcp() {
        let frame = arp_frame();
        assert_eq!(ether_type(&frame), Some(EtherType::Arp));
        assert_eq!(classify_dhcp(&frame), None);
        assert_eq!(udp_ports(&frame), None);
    }

    #[test]
    fn test_dhcp_frame_is_ipv4() {
        let frame = DhcpFrame::client(DhcpMessageType::Discover, CLIENT_MAC, 1).to_bytes();
        assert_eq!(ether_type(&frame), Some(EtherType::Ipv4));
        assert_eq!(udp_ports(&frame), Some((68, 67)));
    }
}

// ============================================================================
// DHCP Classification Tests
// ============================================================================

mod dhcp_classification {
    use super::*;

    #[test]
    fn test_client_messages_classify_as_client_to_server() {
        for msg in [DhcpMessageType::Discover, DhcpMessageType::Request] {
            let frame = DhcpFrame::client(msg, CLIENT_MAC, 9).to_bytes();
            assert_eq!(classify_dhcp(&frame), Some(DhcpDirection::ClientToServer));
        }
    }

    #[test]
    fn test_offer_and_ack_are_indistinguishable_by_ports() {
        let offer = DhcpFrame::server(
            DhcpMessageType::Offer,
            SERVER_MAC,
            SERVER_IP,
            CLIENT_MAC,
            9,
            [192, 168, 7, 2],
        )
        .to_bytes();
        let ack = DhcpFrame::server(
            DhcpMessageType::Ack,
            SERVER_MAC,
            SERVER_IP,
            CLIENT_MAC,
            9,
            [192, 168, 7, 2],
        )
        .to_bytes();

        assert_eq!(classify_dhcp(&offer), classify_dhcp(&ack));
        assert_eq!(message_type(&offer).unwrap(), Some(DhcpMessageType::Offer));
        assert_eq!(message_type(&ack).unwrap(), Some(DhcpMessageType::Ack));
    }

    #[test]
    fn test_fields_survive_owned_copy() {
        let bytes = DhcpFrame::client(DhcpMessageType::Request, CLIENT_MAC, 0x1234_5678).to_bytes();
        let frame = OwnedFrame::copy_from(&bytes, MAX_ETHERNET_FRAME_LEN).unwrap();

        assert_eq!(client_mac(frame.as_bytes()).unwrap(), CLIENT_MAC);
        assert_eq!(transaction_id(frame.as_bytes()).unwrap(), 0x1234_5678);
        assert_eq!(frame.dhcp_direction(), Some(DhcpDirection::ClientToServer));
    }
}

// ============================================================================
// OwnedFrame Bounds Tests
// ============================================================================

mod owned_frame {
    use super::*;

    #[test]
    fn test_jumbo_frame_rejected() {
        let buf = vec![0u8; MAX_ETHERNET_FRAME_LEN + 1];
        let err = OwnedFrame::copy_from(&buf, MAX_ETHERNET_FRAME_LEN).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_ether_type_on_owned_frame() {
        let frame = OwnedFrame::copy_from(&arp_frame(), 2048).unwrap();
        assert_eq!(frame.ether_type(), Some(EtherType::Arp));
        assert_eq!(frame.dhcp_direction(), None);
    }
}
