//! Peer Scanner
//!
//! Runs discovery through a [`PeerResolver`] and keeps the peers whose
//! advertised name is on the allow-list.

use crate::domain::models::DiscoveredPeer;
use crate::infrastructure::bluetooth::protocol::KNOWN_NAMES;
use crate::infrastructure::bluetooth::transport::PeerResolver;
use std::io;
use std::time::Duration;
use tracing::{debug, info};

/// Exact-match filter on advertised names
///
/// Third-party controllers often lack the vendor and product IDs in SDP,
/// so the name is the only reliable marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    allowed: Vec<String>,
}

impl Default for NameFilter {
    fn default() -> Self {
        Self::new(KNOWN_NAMES.iter().map(|name| name.to_string()))
    }
}

impl NameFilter {
    pub fn new(allowed: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Case-sensitive, whole-string comparison
    pub fn matches(&self, name: &str) -> bool {
        self.allowed.iter().any(|allowed| allowed == name)
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }
}

/// Discovery front end over a resolver
pub struct PeerScanner<R: PeerResolver> {
    resolver: R,
    filter: NameFilter,
}

impl<R: PeerResolver> PeerScanner<R> {
    pub fn new(resolver: R, filter: NameFilter) -> Self {
        Self { resolver, filter }
    }

    /// Run one inquiry and return every discovered peer, matching or not
    ///
    /// Callers pass these to the connector, which applies the same filter;
    /// use [`PeerScanner::scan_matching`] for just the controllers.
    pub fn scan(&mut self, duration: Duration) -> io::Result<Vec<DiscoveredPeer>> {
        info!("Scanning for controllers ({:?})...", duration);
        let peers = self.resolver.resolve_peers(duration)?;
        debug!("Inquiry returned {} named peers", peers.len());
        Ok(peers)
    }

    /// Run one inquiry and keep only allow-listed names
    pub fn scan_matching(&mut self, duration: Duration) -> io::Result<Vec<DiscoveredPeer>> {
        let peers = self.scan(duration)?;
        Ok(peers
            .into_iter()
            .filter(|peer| {
                let keep = self.filter.matches(&peer.name);
                if keep {
                    info!("Found '{}' with address {}", peer.name, peer.address);
                } else {
                    debug!("Skipping '{}' ({})", peer.name, peer.address);
                }
                keep
            })
            .collect())
    }

    pub fn filter(&self) -> &NameFilter {
        &self.filter
    }

    pub fn into_resolver(self) -> R {
        self.resolver
    }
}
