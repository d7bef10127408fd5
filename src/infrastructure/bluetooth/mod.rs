//! Bluetooth Module
//!
//! Drives an ELK-BLEDOM style LED strip over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     LedController                        │
//! │  (Public facade - validates, encodes, reads snapshots)   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ commands
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                  ConnectionManager                       │
//! │  (Single task: phases, timers, heartbeat, reconnect)     │
//! └──────┬──────────────────────┬───────────────────────────┘
//!        │                      │ requests / events
//!        ▼                      ▼
//! ┌────────────┐        ┌───────────────┐     ┌──────────┐
//! │  Scanner   │        │ BleTransport  │     │ Protocol │
//! │ - filter   │        │ - btleplug    │     │ - frames │
//! │ - dedup    │        │ - test fakes  │     │ - UUIDs  │
//! └────────────┘        └───────────────┘     └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Command frames and profile UUIDs
//! - [`scanner`] - Advertisement filtering and the discovered-device list
//! - [`transport`] - Transport capability and its event vocabulary
//! - [`connection`] - Connection state machine
//! - [`service`] - Public facade
//! - `btleplug_transport` - Transport backed by btleplug (feature `btleplug`)

#[cfg(feature = "btleplug")]
pub mod btleplug_transport;
pub mod connection;
#[cfg(test)]
pub(crate) mod fake_transport;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transport;

// Re-export main service for convenience
pub use service::LedController;
