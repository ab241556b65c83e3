//! Connection Module
//!
//! Turns discovered peers into connected [`Device`]s: name check, then the
//! command channel, then the report channel, each with bounded retry.

use crate::domain::models::{DiscoveredPeer, PeerAddress};
use crate::infrastructure::bluetooth::device::Device;
use crate::infrastructure::bluetooth::protocol::{COMMAND_PSM, REPORT_PSM};
use crate::infrastructure::bluetooth::scanner::{NameFilter, PeerScanner};
use crate::infrastructure::bluetooth::transport::{Channel, ChannelOpener, PeerResolver};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Names accepted as controllers
    pub filter: NameFilter,
    /// Connect attempts per channel, first one included
    pub max_attempts: u32,
    /// Pause after a failed attempt
    pub retry_delay: Duration,
    /// PSM of the channel commands are sent on
    pub command_psm: u16,
    /// PSM of the channel reports arrive on
    pub report_psm: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            filter: NameFilter::default(),
            max_attempts: 3,
            retry_delay: Duration::from_millis(300),
            command_psm: COMMAND_PSM,
            report_psm: REPORT_PSM,
        }
    }
}

/// Every attempt to open one channel failed
#[derive(Debug, Error)]
#[error("PSM {psm:#06x} unreachable after {attempts} attempt(s): {source}")]
pub struct ConnectError {
    pub psm: u16,
    pub attempts: u32,
    #[source]
    pub source: io::Error,
}

/// Why a discovered peer did not become a device
#[derive(Debug, Error)]
pub enum RejectReason {
    #[error("'{0}' is not a known controller name")]
    NameMismatch(String),

    #[error("already connected")]
    Duplicate,

    #[error("command channel: {0}")]
    CommandChannel(#[source] ConnectError),

    #[error("report channel: {0}")]
    ReportChannel(#[source] ConnectError),
}

/// Terminal state of one peer's connection attempt
#[derive(Debug)]
pub enum PeerOutcome<C: Channel> {
    Connected(Device<C>),
    Rejected {
        address: PeerAddress,
        reason: RejectReason,
    },
}

impl<C: Channel> PeerOutcome<C> {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn into_device(self) -> Option<Device<C>> {
        match self {
            Self::Connected(device) => Some(device),
            Self::Rejected { .. } => None,
        }
    }
}

/// Connection handler
pub struct Connector<O: ChannelOpener> {
    opener: O,
    config: ConnectionConfig,
}

impl<O: ChannelOpener> Connector<O> {
    pub fn new(opener: O, config: ConnectionConfig) -> Self {
        Self { opener, config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    pub fn into_opener(self) -> O {
        self.opener
    }

    /// Take one discovered peer to `Connected` or `Rejected`
    ///
    /// Waits up to `retry_delay * (max_attempts - 1)` per channel.
    pub async fn establish(&mut self, peer: &DiscoveredPeer) -> PeerOutcome<O::Channel> {
        let address = peer.address;

        if !self.config.filter.matches(&peer.name) {
            debug!("Ignoring '{}' ({})", peer.name, address);
            return PeerOutcome::Rejected {
                address,
                reason: RejectReason::NameMismatch(peer.name.clone()),
            };
        }
        info!("Connecting to '{}' at {}", peer.name, address);

        let command = match self.open_with_retry(address, self.config.command_psm).await {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to open command channel to {}: {}", address, e);
                return PeerOutcome::Rejected {
                    address,
                    reason: RejectReason::CommandChannel(e),
                };
            }
        };

        let report = match self.open_with_retry(address, self.config.report_psm).await {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to open report channel to {}: {}", address, e);
                drop(command);
                debug!("Closed command channel to {}", address);
                return PeerOutcome::Rejected {
                    address,
                    reason: RejectReason::ReportChannel(e),
                };
            }
        };

        info!("Successfully connected to {}", address);
        PeerOutcome::Connected(Device::new(address, command, report))
    }

    /// Open one channel, retrying after `retry_delay` on failure
    pub async fn open_with_retry(
        &mut self,
        address: PeerAddress,
        psm: u16,
    ) -> Result<O::Channel, ConnectError> {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.opener.open(address, psm) {
                Ok(channel) => return Ok(channel),
                Err(e) => {
                    warn!(
                        "Connection attempt {} to {} (PSM {:#06x}) failed with error {:x}: {}",
                        attempt,
                        address,
                        psm,
                        e.raw_os_error().unwrap_or(0),
                        e
                    );
                    if attempt >= attempts {
                        return Err(ConnectError {
                            psm,
                            attempts,
                            source: e,
                        });
                    }
                }
            }
            tokio::time::sleep(self.config.retry_delay).await;
            attempt += 1;
        }
    }

    /// Establish every peer in turn; rejected peers are logged and skipped
    pub async fn connect_all(
        &mut self,
        peers: impl IntoIterator<Item = DiscoveredPeer>,
    ) -> Vec<Device<O::Channel>> {
        let mut devices: Vec<Device<O::Channel>> = Vec::new();

        for peer in peers {
            let outcome = if devices.iter().any(|d| d.address() == peer.address) {
                PeerOutcome::Rejected {
                    address: peer.address,
                    reason: RejectReason::Duplicate,
                }
            } else {
                self.establish(&peer).await
            };

            match outcome {
                PeerOutcome::Connected(device) => devices.push(device),
                PeerOutcome::Rejected {
                    address,
                    reason: reason @ (RejectReason::NameMismatch(_) | RejectReason::Duplicate),
                } => debug!("Skipped {}: {}", address, reason),
                PeerOutcome::Rejected { address, reason } => {
                    warn!("Rejected {}: {}", address, reason)
                }
            }
        }

        devices
    }
}

/// Scan once and connect to every controller found
///
/// An empty result is not an error here; deciding what to do with zero
/// controllers is up to the caller.
pub async fn find_and_connect<R, O>(
    scanner: &mut PeerScanner<R>,
    connector: &mut Connector<O>,
    scan_duration: Duration,
) -> io::Result<Vec<Device<O::Channel>>>
where
    R: PeerResolver,
    O: ChannelOpener,
{
    let peers = scanner.scan(scan_duration)?;
    let devices = connector.connect_all(peers).await;
    info!("{} controller(s) connected", devices.len());
    Ok(devices)
}
