//! Bluetooth Module
//!
//! Talks to Wii Remotes over two L2CAP channels per controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     PollingService                        │
//! │  (tick loop over every connected Device)                  │
//! └─────────────────────┬────────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌────────────┐  ┌────────────┐  ┌────────────┐
//! │  Scanner   │  │ Connection │  │   Device   │
//! │            │  │            │  │            │
//! │ - inquiry  │  │ - retries  │  │ - state    │
//! │ - name     │  │ - command/ │  │ - rumble   │
//! │   filter   │  │   report   │  │   latch    │
//! └────────────┘  └────────────┘  └─────┬──────┘
//!                                       ▼
//!                                 ┌────────────┐
//!                                 │  Protocol  │
//!                                 │ - encode   │
//!                                 │ - decode   │
//!                                 └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Report constants, command encoding and report decoding
//! - [`transport`] - Traits for the socket layer this crate does not own
//! - [`memory`] - In-process transport for tests and dry runs
//! - [`scanner`] - Discovery and name filtering
//! - [`connection`] - Channel establishment with retry
//! - [`device`] - One connected controller
//! - [`service`] - Polling coordinator

pub mod connection;
pub mod device;
pub mod memory;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transport;

pub use connection::{find_and_connect, ConnectionConfig, Connector, PeerOutcome};
pub use device::Device;
pub use service::PollingService;
