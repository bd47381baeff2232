//! Full bridge wired to the simulated collaborators

use crate::bridge::PacketBridge;
use crate::config::ServerConfig;
use crate::context::BridgeContext;
use crate::diagnostics::Diagnostics;
use crate::link::LinkController;
use crate::sim::host::HOST_MAC;
use crate::sim::stack::DEVICE_MAC;
use crate::sim::{SimulatedHost, SimulatedStack};
use crate::supervisor::LinkSupervisor;
use crate::watchdog::RecoveryPolicy;
use common::{EventRecorder, LogRingBuffer, create_transport_channel};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Capacity of the IP stack's outbound frame queue
const OUTBOUND_QUEUE: usize = 64;

pub struct SimulatedSystem {
    pub ctx: Arc<BridgeContext>,
    pub bridge: Arc<PacketBridge>,
    pub host: Arc<SimulatedHost>,
    pub stack: Arc<SimulatedStack>,
    pub diagnostics: Diagnostics,
    supervisor: JoinHandle<()>,
    tx_pump: JoinHandle<()>,
    stack_start: Option<JoinHandle<()>>,
}

impl SimulatedSystem {
    /// Build and start every component; must run inside a Tokio runtime
    ///
    /// The host is not plugged in yet, see [`SimulatedHost::plug_in`].
    pub fn start(
        config: &ServerConfig,
        events: Arc<EventRecorder>,
        logs: Arc<LogRingBuffer>,
    ) -> Self {
        let policy = RecoveryPolicy::from(&config.watchdog);
        let ctx = Arc::new(BridgeContext::new(
            Arc::clone(&events),
            logs,
            policy.initial_backoff,
            config.diagnostics.lock_timeout,
        ));

        let (notifier, transport_events) = create_transport_channel();
        let host = Arc::new(SimulatedHost::new(notifier, HOST_MAC, &config.simulation));

        let bridge = Arc::new(PacketBridge::new(
            Arc::clone(&ctx),
            host.clone(),
            &config.bridge,
        ));
        host.connect(&bridge);

        let (outbound_tx, outbound_rx) = async_channel::bounded(OUTBOUND_QUEUE);
        let stack = Arc::new(SimulatedStack::new(events, outbound_tx, DEVICE_MAC));
        let stack_start = Self::start_stack(&bridge, &stack, config.simulation.stack_start_delay);
        let tx_pump = tokio::spawn(Arc::clone(&bridge).run_tx(outbound_rx));

        let link = LinkController::new(Arc::clone(&ctx), host.clone(), policy.initial_backoff);
        let supervisor =
            LinkSupervisor::new(link, transport_events, policy, config.watchdog.tick).spawn();

        let diagnostics = Diagnostics::new(Arc::clone(&ctx), config.diagnostics.stream_config());

        info!("Bridge core started with simulated host and IP stack");
        Self {
            ctx,
            bridge,
            host,
            stack,
            diagnostics,
            supervisor,
            tx_pump,
            stack_start,
        }
    }

    /// Attach the stack now, or from a task once `delay` has passed
    fn start_stack(
        bridge: &Arc<PacketBridge>,
        stack: &Arc<SimulatedStack>,
        delay: Duration,
    ) -> Option<JoinHandle<()>> {
        if delay.is_zero() {
            bridge.attach_stack(stack.clone());
            return None;
        }

        let bridge = Arc::clone(bridge);
        let stack = Arc::clone(stack);
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("Simulated IP stack up after {:?}", delay);
            bridge.attach_stack(stack);
        }))
    }

    /// Stop the supervisor and TX pump
    pub fn shutdown(self) {
        self.supervisor.abort();
        self.tx_pump.abort();
        if let Some(stack_start) = self.stack_start {
            stack_start.abort();
        }
        info!("Bridge core stopped");
    }
}
