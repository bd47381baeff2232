//! Simulated IP stack with a minimal DHCP responder
//!
//! Answers DISCOVER with OFFER and REQUEST with ACK from a small address
//! pool. Replies are queued on the outbound channel the packet bridge's TX
//! pump drains.

use crate::transport::{IpStack, StackError};
use async_channel::{Sender, TrySendError};
use common::{EventKind, EventRecorder};
use parking_lot::Mutex;
use protocol::{DhcpFrame, DhcpMessageType, OwnedFrame, dhcp};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace, warn};

/// Device address and DHCP server identifier
pub const SERVER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 7, 1);

/// MAC address of the device side
pub const DEVICE_MAC: [u8; 6] = [0x02, 0x02, 0x84, 0x6A, 0x96, 0x00];

/// First and last leasable host octet
const POOL_FIRST: u8 = 2;
const POOL_LAST: u8 = 10;

#[derive(Default)]
struct Leases {
    by_mac: HashMap<[u8; 6], Ipv4Addr>,
    next: u8,
}

impl Leases {
    fn lease_for(&mut self, mac: [u8; 6]) -> Option<Ipv4Addr> {
        if let Some(ip) = self.by_mac.get(&mac) {
            return Some(*ip);
        }
        let octet = POOL_FIRST.checked_add(self.next)?;
        if octet > POOL_LAST {
            return None;
        }
        self.next += 1;
        let [a, b, c, _] = SERVER_IP.octets();
        let ip = Ipv4Addr::new(a, b, c, octet);
        self.by_mac.insert(mac, ip);
        Some(ip)
    }
}

pub struct SimulatedStack {
    events: Arc<EventRecorder>,
    outbound: Sender<OwnedFrame>,
    mac: [u8; 6],
    leases: Mutex<Leases>,
    injected: AtomicU64,
}

impl SimulatedStack {
    pub fn new(events: Arc<EventRecorder>, outbound: Sender<OwnedFrame>, mac: [u8; 6]) -> Self {
        Self {
            events,
            outbound,
            mac,
            leases: Mutex::new(Leases::default()),
            injected: AtomicU64::new(0),
        }
    }

    /// Frames accepted so far
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    fn reply(
        &self,
        message_type: DhcpMessageType,
        client_mac: [u8; 6],
        xid: u32,
        lease: Ipv4Addr,
    ) -> Result<(), StackError> {
        let frame = DhcpFrame::server(
            message_type,
            self.mac,
            SERVER_IP.octets(),
            client_mac,
            xid,
            lease.octets(),
        )
        .to_bytes();
        let frame = OwnedFrame::from_vec(frame).map_err(|e| StackError::Rejected(e.to_string()))?;

        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => StackError::QueueFull,
            TrySendError::Closed(_) => StackError::NotReady,
        })
    }

    fn handle_dhcp(&self, frame: &OwnedFrame, message_type: DhcpMessageType) -> Result<(), StackError> {
        let bytes = frame.as_bytes();
        let reject = |e: protocol::ProtocolError| StackError::Rejected(e.to_string());
        let client_mac = dhcp::client_mac(bytes).map_err(reject)?;
        let xid = dhcp::transaction_id(bytes).map_err(reject)?;

        let reply_type = match message_type {
            DhcpMessageType::Discover => DhcpMessageType::Offer,
            DhcpMessageType::Request => {
                self.events.record(EventKind::DhcpRequestSeen, None);
                DhcpMessageType::Ack
            }
            other => {
                trace!("Ignoring DHCP {:?}", other);
                return Ok(());
            }
        };

        let Some(lease) = self.leases.lock().lease_for(client_mac) else {
            warn!("DHCP pool exhausted, ignoring {:?}", message_type);
            return Ok(());
        };

        self.reply(reply_type, client_mac, xid, lease)?;

        if reply_type == DhcpMessageType::Ack {
            let address = lease.to_string();
            info!("Address {} assigned", address);
            self.events.record(EventKind::DhcpAckSeen, None);
            self.events
                .record(EventKind::AddressAssigned, Some(&address));
        } else {
            debug!("Offering {} (xid {:#010x})", lease, xid);
        }
        Ok(())
    }
}

impl IpStack for SimulatedStack {
    fn inject(&self, frame: OwnedFrame) -> Result<(), StackError> {
        self.injected.fetch_add(1, Ordering::Relaxed);

        match dhcp::message_type(frame.as_bytes()) {
            Ok(Some(message_type)) => self.handle_dhcp(&frame, message_type),
            Ok(None) => {
                trace!("Accepted {} byte frame", frame.len());
                Ok(())
            }
            Err(e) => Err(StackError::Rejected(e.to_string())),
        }
    }
}
