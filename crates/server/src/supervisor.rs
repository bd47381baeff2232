//! Link supervisor task
//!
//! Consumes transport lifecycle events and runs the recovery watchdog on a
//! fixed tick. It is the only task that touches the link flag, so kicks and
//! recovery sequences are never interleaved with another toggle. Events that
//! arrive while a sequence is sleeping are applied as they come in; a kick
//! requested by a resume is deferred until the sequence has finished.

use crate::link::LinkController;
use crate::watchdog::{self, RecoveryPolicy, WatchdogAction};
use common::{TransportEvent, TransportEvents};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct LinkSupervisor {
    link: LinkController,
    events: TransportEvents,
    policy: RecoveryPolicy,
    tick: Duration,
    /// A Mounted before this deadline comes from our own reattach
    reenumeration_deadline: Option<Instant>,
    pending_kick: bool,
    events_closed: bool,
}

impl LinkSupervisor {
    pub fn new(
        link: LinkController,
        events: TransportEvents,
        policy: RecoveryPolicy,
        tick: Duration,
    ) -> Self {
        Self {
            link,
            events,
            policy,
            tick,
            reenumeration_deadline: None,
            pending_kick: false,
            events_closed: false,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run for the process lifetime
    ///
    /// Once every transport notifier is gone the watchdog keeps ticking on
    /// the last known state.
    pub async fn run(mut self) {
        info!(
            "Link supervisor started (tick {:?}, grace {:?}, max {} recoveries)",
            self.tick, self.policy.grace_period, self.policy.max_attempts
        );

        let mut ticker = time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.on_tick().await;
                }

                event = self.events.recv(), if !self.events_closed => {
                    match event {
                        Ok(event) => self.apply(event),
                        Err(e) => {
                            warn!("Transport event channel closed: {}", e);
                            self.events_closed = true;
                        }
                    }
                }
            }

            let ctx = self.link.context();
            if std::mem::take(&mut self.pending_kick) && ctx.is_mounted() && ctx.stack_ready() {
                self.kick("resumed").await;
            }
        }
    }

    /// Apply one lifecycle event
    fn apply(&mut self, event: TransportEvent) {
        debug!("Transport event: {}", event);
        match event {
            TransportEvent::Mounted => {
                let own = self
                    .reenumeration_deadline
                    .take()
                    .is_some_and(|deadline| Instant::now() <= deadline);
                if own {
                    debug!("Mounted after our own reattach, keeping recovery state");
                }
                self.link.handle_mounted(!own);
            }
            TransportEvent::Unmounted => self.link.handle_unmounted(),
            TransportEvent::Suspended { remote_wakeup } => {
                self.link.handle_suspended(remote_wakeup)
            }
            TransportEvent::Resumed => {
                if self.link.handle_resumed() {
                    self.pending_kick = true;
                }
            }
        }
    }

    async fn on_tick(&mut self) {
        let now = Instant::now();
        let ctx = self.link.context();
        let action = watchdog::evaluate(&self.policy, &ctx.observe(), &ctx.recovery(), now);

        match action {
            WatchdogAction::None => {}
            WatchdogAction::Kick => {
                debug!("Mounted with stack ready but link down");
                self.kick("link-sync").await;
            }
            WatchdogAction::Recover => self.recover().await,
        }
    }

    /// Link down, pause, link up
    async fn kick(&mut self, reason: &str) {
        self.link.set_link(false, reason);
        self.sleep_draining(self.policy.kick_delay).await;

        if self.link.context().is_mounted() {
            self.link.set_link(true, reason);
        } else {
            debug!("Device no longer mounted, link kick ({}) abandoned", reason);
        }
    }

    /// Forced detach/reattach after no RX within the grace period
    async fn recover(&mut self) {
        let ctx = self.link.context().clone();
        let now = Instant::now();
        let since_mount = ctx
            .timing()
            .mounted_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();
        let attempt = ctx.update_recovery(|state| {
            state.begin_attempt(now);
            state.attempts
        });

        warn!(
            "No RX {}ms after mount, recovery attempt {}/{}",
            since_mount.as_millis(),
            attempt,
            self.policy.max_attempts
        );
        self.link.set_link(false, "no-rx-timeout");

        if let Err(e) = self.link.transport().detach() {
            warn!("Detach failed: {}", e);
        }
        self.sleep_draining(self.policy.detach_duration).await;

        // Slow hosts re-enumerate well after the settle delay; the marker
        // stays until their Mounted arrives or the window closes.
        let attached_at = Instant::now();
        self.reenumeration_deadline = Some(attached_at + self.policy.reenumeration_window());
        if let Err(e) = self.link.transport().attach() {
            warn!("Reattach failed: {}", e);
            self.reenumeration_deadline = None;
        }

        ctx.restart_grace(attached_at);
        self.sleep_draining(self.policy.settle_duration).await;

        if ctx.is_mounted() && ctx.stack_ready() {
            self.kick("post-reattach").await;
        } else {
            debug!("Not mounted after reattach, skipping post-reattach kick");
        }

        let backoff = ctx.update_recovery(|state| {
            state.escalate_backoff(self.policy.max_backoff);
            state.backoff
        });
        if attempt >= self.policy.max_attempts {
            warn!(
                "Recovery attempts exhausted ({}), waiting for the next mount",
                attempt
            );
        } else {
            info!("Next recovery no sooner than {}ms", backoff.as_millis());
        }
    }

    /// Sleep for `duration` while still applying lifecycle events
    async fn sleep_draining(&mut self, duration: Duration) {
        let sleep = time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => break,

                event = self.events.recv(), if !self.events_closed => {
                    match event {
                        Ok(event) => self.apply(event),
                        Err(_) => self.events_closed = true,
                    }
                }
            }
        }
    }
}
