//! Packet bridge between the USB transport and the IP stack
//!
//! RX: the transport calls [`PacketBridge::on_receive`] with a buffer it will
//! reuse, so the frame is copied into an [`OwnedFrame`] before it is handed to
//! the IP stack. TX: the IP stack queues frames that [`PacketBridge::run_tx`]
//! sends with bounded retries, or calls [`PacketBridge::transmit`] directly.

use crate::config::BridgeSettings;
use crate::context::BridgeContext;
use crate::transport::{IpStack, TransportError, UsbTransport};
use async_channel::Receiver;
use common::EventKind;
use protocol::{DhcpDirection, OwnedFrame, ether_type};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

/// Why a received frame was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoStack,
    Empty,
    Oversize,
    StackRejected,
}

/// Result of one RX call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    Forwarded,
    Dropped(DropReason),
}

/// Result of one TX call
///
/// The IP stack never sees a failure: every variant counts as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Sent { attempts: u32 },
    /// Not mounted or link down; nothing was sent
    Suppressed,
    /// Every attempt failed; the frame is lost
    Failed,
}

pub struct PacketBridge {
    ctx: Arc<BridgeContext>,
    transport: Arc<dyn UsbTransport>,
    stack: OnceLock<Arc<dyn IpStack>>,
    tx_attempts: u32,
    tx_timeout: Duration,
    tx_retry_delay: Duration,
    max_frame_len: usize,
}

impl PacketBridge {
    pub fn new(
        ctx: Arc<BridgeContext>,
        transport: Arc<dyn UsbTransport>,
        settings: &BridgeSettings,
    ) -> Self {
        Self {
            ctx,
            transport,
            stack: OnceLock::new(),
            tx_attempts: settings.tx_attempts.max(1),
            tx_timeout: settings.tx_timeout,
            tx_retry_delay: settings.tx_retry_delay,
            max_frame_len: settings.max_frame_len,
        }
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    /// Attach the IP stack and mark it ready
    ///
    /// Only the first stack is kept; returns `false` if one was already
    /// attached.
    pub fn attach_stack(&self, stack: Arc<dyn IpStack>) -> bool {
        if self.stack.set(stack).is_err() {
            warn!("IP stack already attached, ignoring");
            return false;
        }
        self.ctx.mark_stack_ready();
        true
    }

    /// Entry point for frames received from the host
    ///
    /// Never blocks and never fails; frames that cannot be forwarded are
    /// counted in `rx_dropped`.
    pub fn on_receive(&self, buf: &[u8]) -> RxOutcome {
        self.ctx.count_rx(buf.len());
        self.ctx.note_rx(Instant::now());

        let kind = ether_type(buf)
            .map(|k| k.to_string())
            .unwrap_or_else(|| "runt".to_string());
        trace!("RX {} bytes ({})", buf.len(), kind);

        if self.ctx.claim_first_rx() {
            let detail = format!("len={} type={}", buf.len(), kind);
            info!("First RX since mount ({})", detail);
            self.ctx.events().record(EventKind::FirstRx, Some(&detail));
        }

        if protocol::classify_dhcp(buf) == Some(DhcpDirection::ClientToServer) {
            debug!("DHCP client frame from host ({} bytes)", buf.len());
            self.ctx.events().record(EventKind::DhcpDiscoverSeen, None);
        }

        let Some(stack) = self.stack.get() else {
            debug!("IP stack not attached, dropping RX frame");
            return self.drop_rx(DropReason::NoStack);
        };

        let frame = match OwnedFrame::copy_from(buf, self.max_frame_len) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping RX frame: {}", e);
                let reason = if buf.is_empty() {
                    DropReason::Empty
                } else {
                    DropReason::Oversize
                };
                return self.drop_rx(reason);
            }
        };

        match stack.inject(frame) {
            Ok(()) => RxOutcome::Forwarded,
            Err(e) => {
                warn!("IP stack refused RX frame: {}", e);
                self.drop_rx(DropReason::StackRejected)
            }
        }
    }

    fn drop_rx(&self, reason: DropReason) -> RxOutcome {
        self.ctx.count_rx_dropped();
        RxOutcome::Dropped(reason)
    }

    /// Send one frame to the host
    pub async fn transmit(&self, frame: &[u8]) -> TxOutcome {
        if !self.ctx.can_transmit() {
            trace!(
                "TX suppressed ({} bytes): {} link={}",
                frame.len(),
                self.ctx.mount_state(),
                self.ctx.link_up()
            );
            return TxOutcome::Suppressed;
        }

        if protocol::classify_dhcp(frame) == Some(DhcpDirection::ServerToClient) {
            debug!("DHCP server frame to host ({} bytes)", frame.len());
            self.ctx.events().record(EventKind::DhcpOfferSeen, None);
        }

        if self.ctx.claim_first_tx() {
            let detail = format!("len={}", frame.len());
            info!("First TX since mount ({})", detail);
            self.ctx.events().record(EventKind::FirstTx, Some(&detail));
        }

        for attempt in 1..=self.tx_attempts {
            match self.send_once(frame).await {
                Ok(()) => {
                    self.ctx.count_tx(frame.len());
                    trace!("TX {} bytes (attempt {})", frame.len(), attempt);
                    return TxOutcome::Sent { attempts: attempt };
                }
                Err(e) => debug!("TX attempt {} failed: {}", attempt, e),
            }

            if attempt < self.tx_attempts {
                time::sleep(self.tx_retry_delay).await;
            }
        }

        warn!(
            "TX of {} bytes failed after {} attempts, frame dropped",
            frame.len(),
            self.tx_attempts
        );
        self.ctx.count_tx_failed();
        TxOutcome::Failed
    }

    /// One send bounded by the TX timeout
    async fn send_once(&self, frame: &[u8]) -> Result<(), TransportError> {
        time::timeout(self.tx_timeout, self.transport.send(frame))
            .await
            .unwrap_or(Err(TransportError::TimedOut))
    }

    /// Drain the IP stack's outbound queue until it closes
    pub async fn run_tx(self: Arc<Self>, outbound: Receiver<OwnedFrame>) {
        debug!("TX pump started");
        while let Ok(frame) = outbound.recv().await {
            self.transmit(frame.as_bytes()).await;
        }
        debug!("TX pump stopped");
    }
}
