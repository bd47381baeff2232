//! Simulated collaborators
//!
//! Stand-ins for the USB host and the IP stack so the whole core can run on
//! a development machine and under a paused test clock.

pub mod host;
pub mod stack;
pub mod system;

pub use host::SimulatedHost;
pub use stack::SimulatedStack;
pub use system::SimulatedSystem;
