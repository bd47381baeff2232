//! Simulated USB host
//!
//! Behaves like the hosts the recovery watchdog exists for: address
//! acquisition starts exactly once per link-up notification, and for the
//! first `stale_enumerations` enumerations link-up is ignored entirely, as if
//! the host had cached an earlier failure that only re-enumeration clears.
//! After a reattach the host takes `reenumeration_delay` to mount the device
//! again.

use crate::bridge::PacketBridge;
use crate::config::SimulationSettings;
use crate::transport::{TransportError, UsbTransport};
use async_trait::async_trait;
use common::{TransportEvent, TransportNotifier};
use parking_lot::Mutex;
use protocol::{DhcpFrame, DhcpMessageType, dhcp};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// MAC address the simulated host uses
pub const HOST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x10];

/// Most recent frames and link notifications kept for inspection
pub const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Default)]
struct HostState {
    attached: bool,
    enumerations: u32,
    link_notifications: VecDeque<bool>,
    sent: VecDeque<Vec<u8>>,
    sent_count: u64,
    detaches: u32,
    attaches: u32,
}

impl HostState {
    fn push_bounded<T>(history: &mut VecDeque<T>, item: T) {
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(item);
    }

    /// Mount the device and raise the event
    fn enumerate(state: &Mutex<HostState>, notifier: &TransportNotifier) {
        {
            let mut state = state.lock();
            state.attached = true;
            state.enumerations += 1;
            debug!("Simulated host: enumeration {}", state.enumerations);
        }
        raise(notifier, TransportEvent::Mounted);
    }
}

fn raise(notifier: &TransportNotifier, event: TransportEvent) {
    if let Err(e) = notifier.notify(event) {
        warn!("Simulated host could not raise {}: {}", event, e);
    }
}

pub struct SimulatedHost {
    notifier: TransportNotifier,
    bridge: OnceLock<Weak<PacketBridge>>,
    state: Arc<Mutex<HostState>>,
    mac: [u8; 6],
    next_xid: AtomicU32,
    stale_enumerations: u32,
    response_delay: Duration,
    plug_in_delay: Duration,
    reenumeration_delay: Duration,
}

impl SimulatedHost {
    pub fn new(notifier: TransportNotifier, mac: [u8; 6], settings: &SimulationSettings) -> Self {
        Self {
            notifier,
            bridge: OnceLock::new(),
            state: Arc::new(Mutex::new(HostState::default())),
            mac,
            next_xid: AtomicU32::new(0x3903_F326),
            stale_enumerations: settings.stale_enumerations,
            response_delay: settings.response_delay,
            plug_in_delay: settings.plug_in_delay,
            reenumeration_delay: settings.reenumeration_delay,
        }
    }

    /// Route host-to-device frames into `bridge`
    pub fn connect(&self, bridge: &Arc<PacketBridge>) {
        if self.bridge.set(Arc::downgrade(bridge)).is_err() {
            warn!("Simulated host already connected");
        }
    }

    /// Plug the cable in after the configured delay
    pub async fn plug_in(&self) {
        tokio::time::sleep(self.plug_in_delay).await;
        info!("Simulated host: cable plugged in");
        HostState::enumerate(&self.state, &self.notifier);
    }

    /// Host-initiated unplug
    pub fn unplug(&self) {
        self.state.lock().attached = false;
        info!("Simulated host: cable unplugged");
        self.raise(TransportEvent::Unmounted);
    }

    /// Put the bus to sleep
    pub fn suspend(&self, remote_wakeup: bool) {
        self.raise(TransportEvent::Suspended { remote_wakeup });
    }

    pub fn resume(&self) {
        self.raise(TransportEvent::Resumed);
    }

    /// Latest link notifications, oldest first
    pub fn link_notifications(&self) -> Vec<bool> {
        self.state.lock().link_notifications.iter().copied().collect()
    }

    /// Latest frames the device sent to the host, oldest first
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.iter().cloned().collect()
    }

    /// Frames the device sent to the host since start
    pub fn sent_count(&self) -> u64 {
        self.state.lock().sent_count
    }

    pub fn detach_count(&self) -> u32 {
        self.state.lock().detaches
    }

    pub fn attach_count(&self) -> u32 {
        self.state.lock().attaches
    }

    pub fn enumerations(&self) -> u32 {
        self.state.lock().enumerations
    }

    fn raise(&self, event: TransportEvent) {
        raise(&self.notifier, event);
    }

    /// Deliver a host-to-device frame after the response delay
    fn reply_later(&self, frame: Vec<u8>) {
        let Some(bridge) = self.bridge.get().cloned() else {
            debug!("Simulated host not connected to a bridge");
            return;
        };
        let delay = self.response_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(bridge) = bridge.upgrade() {
                bridge.on_receive(&frame);
            }
        });
    }

    fn xid(&self) -> u32 {
        self.next_xid.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl UsbTransport for SimulatedHost {
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            if !state.attached {
                return Err(TransportError::Detached);
            }
            HostState::push_bounded(&mut state.sent, frame.to_vec());
            state.sent_count += 1;
        }

        if let Ok(Some(DhcpMessageType::Offer)) = dhcp::message_type(frame) {
            let xid = dhcp::transaction_id(frame).unwrap_or_else(|_| self.xid());
            debug!("Simulated host: OFFER received, sending REQUEST");
            self.reply_later(DhcpFrame::client(DhcpMessageType::Request, self.mac, xid).to_bytes());
        }
        Ok(())
    }

    fn notify_link(&self, up: bool) -> Result<(), TransportError> {
        let (attached, enumeration) = {
            let mut state = self.state.lock();
            HostState::push_bounded(&mut state.link_notifications, up);
            (state.attached, state.enumerations)
        };

        // A detached host never sees the notification
        if !attached || !up {
            return Ok(());
        }

        if enumeration <= self.stale_enumerations {
            debug!(
                "Simulated host: ignoring link-up on stale enumeration {}",
                enumeration
            );
        } else {
            debug!("Simulated host: link up, sending DISCOVER");
            self.reply_later(
                DhcpFrame::client(DhcpMessageType::Discover, self.mac, self.xid()).to_bytes(),
            );
        }
        Ok(())
    }

    fn detach(&self) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            state.detaches += 1;
            state.attached = false;
        }
        info!("Simulated host: device detached");
        self.raise(TransportEvent::Unmounted);
        Ok(())
    }

    fn attach(&self) -> Result<(), TransportError> {
        self.state.lock().attaches += 1;
        info!("Simulated host: device reattached");
        if self.reenumeration_delay.is_zero() {
            HostState::enumerate(&self.state, &self.notifier);
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        let notifier = self.notifier.clone();
        let delay = self.reenumeration_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            HostState::enumerate(&state, &notifier);
        });
        Ok(())
    }
}
