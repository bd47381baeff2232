//! Common utilities for usb-ncm-bridge
//!
//! This crate provides the pieces shared by the bridge server and its tests:
//! the sticky event recorder, the log ring buffer and its streaming endpoint,
//! the transport lifecycle channel, error handling and logging setup.

pub mod channel;
pub mod error;
pub mod event_log;
pub mod log_ring;
pub mod log_stream;
pub mod logging;
pub mod test_utils;

pub use channel::{TransportEvent, TransportEvents, TransportNotifier, create_transport_channel};
pub use error::{Error, Result};
pub use event_log::{EventKind, EventRecord, EventRecorder, EventStatus};
pub use log_ring::{LogRingBuffer, ReaderGuard, ReaderId};
pub use log_stream::{LogStreamConfig, stream_logs};
pub use logging::setup_logging;
