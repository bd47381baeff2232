//! Link State Controller
//!
//! Every change of the host-visible link flag goes through [`LinkController::set_link`].
//! The controller is owned by the link supervisor task, which makes that task
//! the single writer of the link flag.

use crate::context::{BridgeContext, MountState};
use crate::transport::UsbTransport;
use common::EventKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct LinkController {
    ctx: Arc<BridgeContext>,
    transport: Arc<dyn UsbTransport>,
    initial_backoff: Duration,
}

impl LinkController {
    pub fn new(
        ctx: Arc<BridgeContext>,
        transport: Arc<dyn UsbTransport>,
        initial_backoff: Duration,
    ) -> Self {
        Self {
            ctx,
            transport,
            initial_backoff,
        }
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    pub fn transport(&self) -> &Arc<dyn UsbTransport> {
        &self.transport
    }

    /// Announce the link state to the host
    ///
    /// The notification is always sent, even when the flag does not change:
    /// the host treats each link-up as a fresh trigger.
    pub fn set_link(&self, up: bool, reason: &str) {
        let was_up = self.ctx.link_up();
        self.ctx.store_link(up);

        if let Err(e) = self.transport.notify_link(up) {
            warn!("Link notification ({}) failed: {}", up, e);
        }

        if up {
            info!("Link up ({})", reason);
            self.ctx.events().record(EventKind::LinkUp, Some(reason));
        } else if was_up {
            info!("Link down ({})", reason);
        } else {
            debug!("Link held down ({})", reason);
        }
    }

    /// Host configured the device
    ///
    /// `reset_recovery` is false when the mount is the result of the
    /// watchdog's own detach/reattach, so backoff keeps growing across the
    /// attempts of one cycle.
    pub fn handle_mounted(&self, reset_recovery: bool) {
        info!("USB mounted");
        self.set_link(false, "mounted");
        self.ctx.set_mount_state(MountState::Mounted);
        self.ctx.begin_mount_cycle(Instant::now());
        if reset_recovery {
            self.ctx
                .update_recovery(|state| state.reset(self.initial_backoff));
        }
        self.ctx.events().record(EventKind::UsbMounted, None);
    }

    pub fn handle_unmounted(&self) {
        info!("USB unmounted");
        self.set_link(false, "unmounted");
        self.ctx.set_mount_state(MountState::Unmounted);
        self.ctx.end_mount_cycle();
        self.ctx.events().record(EventKind::UsbUnmounted, None);
    }

    pub fn handle_suspended(&self, remote_wakeup: bool) {
        info!("USB suspended (remote_wakeup={})", remote_wakeup);
        self.set_link(false, "suspended");
        if self.ctx.mount_state() == MountState::Mounted {
            self.ctx.set_mount_state(MountState::Suspended);
        }
        let detail = if remote_wakeup {
            "remote_wakeup=1"
        } else {
            "remote_wakeup=0"
        };
        self.ctx
            .events()
            .record(EventKind::UsbSuspended, Some(detail));
    }

    /// Host resumed the bus
    ///
    /// Returns whether a link kick should follow (mounted with the IP stack
    /// ready).
    pub fn handle_resumed(&self) -> bool {
        info!("USB resumed");
        if self.ctx.mount_state() == MountState::Suspended {
            self.ctx.set_mount_state(MountState::Mounted);
        }
        self.ctx.events().record(EventKind::UsbResumed, None);
        self.ctx.is_mounted() && self.ctx.stack_ready()
    }
}
