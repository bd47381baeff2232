//! usb-ncm-bridge server
//!
//! Core of a USB network-class device: the link state controller and its
//! recovery watchdog, the packet bridge between the USB transport and the IP
//! stack, and the diagnostics built on the sticky event recorder and log ring
//! buffer.
//!
//! Components share one [`context::BridgeContext`]. Transport lifecycle
//! events reach the [`supervisor::LinkSupervisor`], the only writer of the
//! link flag; received frames go straight to [`bridge::PacketBridge`].

pub mod bridge;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod link;
pub mod sim;
pub mod supervisor;
pub mod transport;
pub mod watchdog;

pub use bridge::{DropReason, PacketBridge, RxOutcome, TxOutcome};
pub use config::ServerConfig;
pub use context::{BridgeContext, MountState, PacketCounters};
pub use diagnostics::{DiagnosticSnapshot, Diagnostics};
pub use link::LinkController;
pub use supervisor::LinkSupervisor;
pub use transport::{IpStack, StackError, TransportError, UsbTransport};
pub use watchdog::{RecoveryPolicy, RecoveryState, WatchdogAction};
