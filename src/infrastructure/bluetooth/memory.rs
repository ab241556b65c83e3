//! In-process transport
//!
//! Scripted peers that implement the transport traits without a radio.
//! Used by the tests and for dry runs of the polling loop.

use crate::domain::models::{DiscoveredPeer, PeerAddress};
use crate::infrastructure::bluetooth::transport::{Channel, ChannelOpener, PeerResolver};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Linux `ECONNREFUSED`
const CONNECTION_REFUSED: i32 = 111;
/// Linux `EHOSTDOWN`
const HOST_DOWN: i32 = 112;
/// Linux `ENOTCONN`
const NOT_CONNECTED: i32 = 107;

#[derive(Debug, Default)]
struct PeerShared {
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<(u16, Vec<u8>)>,
    /// Remaining failures per PSM; `u32::MAX` fails forever
    open_failures: HashMap<u16, u32>,
    open_attempts: HashMap<u16, u32>,
    open_channels: HashMap<u16, u32>,
    fail_sends: bool,
}

/// Handle on one simulated controller
///
/// Clones share the same peer, so a test can keep one while the transport
/// owns another.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    address: PeerAddress,
    name: Option<String>,
    shared: Arc<Mutex<PeerShared>>,
}

impl MemoryPeer {
    pub fn new(address: PeerAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: Some(name.into()),
            shared: Arc::default(),
        }
    }

    /// A peer that never answers name resolution
    pub fn nameless(address: PeerAddress) -> Self {
        Self {
            address,
            name: None,
            shared: Arc::default(),
        }
    }

    pub fn address(&self) -> PeerAddress {
        self.address
    }

    fn lock(&self) -> MutexGuard<'_, PeerShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a report for the next receive on any of the peer's channels
    pub fn push_report(&self, bytes: &[u8]) {
        self.lock().inbound.push_back(bytes.to_vec());
    }

    /// Frames sent to the peer on `psm`, oldest first
    pub fn sent_frames(&self, psm: u16) -> Vec<Vec<u8>> {
        self.lock()
            .sent
            .iter()
            .filter(|(p, _)| *p == psm)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    /// Refuse the next `count` connects on `psm`
    pub fn fail_opens(&self, psm: u16, count: u32) {
        self.lock().open_failures.insert(psm, count);
    }

    /// Refuse every connect on `psm`
    pub fn refuse(&self, psm: u16) {
        self.fail_opens(psm, u32::MAX);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn open_attempts(&self, psm: u16) -> u32 {
        self.lock().open_attempts.get(&psm).copied().unwrap_or(0)
    }

    /// Whether a channel on `psm` is currently open
    pub fn is_open(&self, psm: u16) -> bool {
        self.lock().open_channels.get(&psm).copied().unwrap_or(0) > 0
    }

    fn connect(&self, psm: u16) -> io::Result<MemoryChannel> {
        let mut shared = self.lock();
        *shared.open_attempts.entry(psm).or_default() += 1;

        if let Some(remaining) = shared.open_failures.get_mut(&psm) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(io::Error::from_raw_os_error(CONNECTION_REFUSED));
            }
        }

        *shared.open_channels.entry(psm).or_default() += 1;
        Ok(MemoryChannel {
            psm,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Channel end held by the local side
#[derive(Debug)]
pub struct MemoryChannel {
    psm: u16,
    shared: Arc<Mutex<PeerShared>>,
}

impl MemoryChannel {
    fn lock(&self) -> MutexGuard<'_, PeerShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Channel for MemoryChannel {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let psm = self.psm;
        let mut shared = self.lock();
        if shared.fail_sends {
            return Err(io::Error::from_raw_os_error(NOT_CONNECTED));
        }
        shared.sent.push((psm, frame.to_vec()));
        Ok(())
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(report) = self.lock().inbound.pop_front() else {
            return Ok(0);
        };
        // SOCK_SEQPACKET semantics: the rest of an oversized packet is lost
        let n = report.len().min(buf.len());
        buf[..n].copy_from_slice(&report[..n]);
        Ok(n)
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        let psm = self.psm;
        if let Some(open) = self.lock().open_channels.get_mut(&psm) {
            *open = open.saturating_sub(1);
        }
        debug!("Closed in-memory channel {:#06x}", psm);
    }
}

/// A set of simulated peers acting as both resolver and opener
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    peers: Vec<MemoryPeer>,
    resolve_calls: u32,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&mut self, peer: MemoryPeer) {
        self.peers.push(peer);
    }

    pub fn with_peer(mut self, peer: MemoryPeer) -> Self {
        self.add_peer(peer);
        self
    }

    pub fn resolve_calls(&self) -> u32 {
        self.resolve_calls
    }
}

impl PeerResolver for MemoryTransport {
    fn resolve_peers(&mut self, _scan_duration: Duration) -> io::Result<Vec<DiscoveredPeer>> {
        self.resolve_calls += 1;
        Ok(self
            .peers
            .iter()
            .filter_map(|peer| {
                peer.name
                    .as_ref()
                    .map(|name| DiscoveredPeer::new(peer.address, name.clone()))
            })
            .collect())
    }
}

impl ChannelOpener for MemoryTransport {
    type Channel = MemoryChannel;

    fn open(&mut self, peer: PeerAddress, psm: u16) -> io::Result<MemoryChannel> {
        match self.peers.iter().find(|p| p.address == peer) {
            Some(p) => p.connect(psm),
            None => Err(io::Error::from_raw_os_error(HOST_DOWN)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> PeerAddress {
        PeerAddress::new([last, 0, 0, 0, 0, 0])
    }

    #[test]
    fn test_resolver_skips_nameless_peers() {
        let mut transport = MemoryTransport::new()
            .with_peer(MemoryPeer::new(addr(1), "Nintendo RVL-CNT-01"))
            .with_peer(MemoryPeer::nameless(addr(2)));

        let peers = transport.resolve_peers(Duration::from_secs(1)).unwrap();
        assert_eq!(peers, vec![DiscoveredPeer::new(addr(1), "Nintendo RVL-CNT-01")]);
        assert_eq!(transport.resolve_calls(), 1);
    }

    #[test]
    fn test_channel_closes_on_drop() {
        let peer = MemoryPeer::new(addr(1), "x");
        let mut transport = MemoryTransport::new().with_peer(peer.clone());

        let channel = transport.open(addr(1), 0x11).unwrap();
        assert!(peer.is_open(0x11));
        drop(channel);
        assert!(!peer.is_open(0x11));
    }

    #[test]
    fn test_scripted_open_failures() {
        let peer = MemoryPeer::new(addr(1), "x");
        peer.fail_opens(0x13, 1);
        let mut transport = MemoryTransport::new().with_peer(peer.clone());

        let err = transport.open(addr(1), 0x13).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(CONNECTION_REFUSED));
        assert!(transport.open(addr(1), 0x13).is_ok());
        assert_eq!(peer.open_attempts(0x13), 2);

        let err = transport.open(addr(9), 0x13).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(HOST_DOWN));
    }

    #[test]
    fn test_receive_is_non_blocking() {
        let peer = MemoryPeer::new(addr(1), "x");
        let mut transport = MemoryTransport::new().with_peer(peer.clone());
        let mut channel = transport.open(addr(1), 0x13).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(channel.try_recv(&mut buf).unwrap(), 0);

        peer.push_report(&[0xA1, 0x30, 0x00, 0x08, 0xFF]);
        assert_eq!(channel.try_recv(&mut buf).unwrap(), 4);
        assert_eq!(buf, [0xA1, 0x30, 0x00, 0x08]);
        assert_eq!(channel.try_recv(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_sends_are_recorded_per_psm() {
        let peer = MemoryPeer::new(addr(1), "x");
        let mut transport = MemoryTransport::new().with_peer(peer.clone());
        let mut channel = transport.open(addr(1), 0x11).unwrap();

        channel.send(&[0xA2, 0x15, 0x00]).unwrap();
        assert_eq!(peer.sent_frames(0x11), vec![vec![0xA2, 0x15, 0x00]]);
        assert!(peer.sent_frames(0x13).is_empty());

        peer.fail_sends(true);
        assert!(channel.send(&[0xA2, 0x15, 0x00]).is_err());
        assert_eq!(peer.sent_frames(0x11).len(), 1);
    }
}
