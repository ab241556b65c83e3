//! Wii Remote link layer
//!
//! Finds controllers, opens their command and report channels, and keeps a
//! live [`ControllerState`](domain::controller::ControllerState) per
//! controller from a single polling thread.
//!
//! The socket layer (inquiry, name resolution, L2CAP connect) is supplied
//! by the caller through the traits in
//! [`infrastructure::bluetooth::transport`].

pub mod domain;
pub mod infrastructure;

pub use domain::models::{Buttons, DiscoveredPeer, PeerAddress, Status};
pub use infrastructure::bluetooth::{
    find_and_connect, ConnectionConfig, Connector, Device, PeerOutcome, PollingService,
};
