//! Transport Seams
//!
//! Socket creation, inquiry and name resolution live outside this crate.
//! These traits describe what the rest of the bluetooth module needs from
//! them.

use crate::domain::models::{DiscoveredPeer, PeerAddress};
use std::io;
use std::time::Duration;

/// One open L2CAP channel
///
/// The channel is closed when the value is dropped, so ownership of the
/// value is ownership of the descriptor.
pub trait Channel {
    /// Send one frame. Best effort, never retried by callers.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Receive without blocking
    ///
    /// Returns `Ok(0)` when nothing is queued. Implementations may also
    /// return an [`io::ErrorKind::WouldBlock`] error for the same case.
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens channels to a peer by PSM
pub trait ChannelOpener {
    type Channel: Channel;

    /// Connect once. Errors carry the platform error code
    /// ([`io::Error::raw_os_error`]) where there is one.
    fn open(&mut self, peer: PeerAddress, psm: u16) -> io::Result<Self::Channel>;
}

/// Enumerates nearby peers and their advertised names
pub trait PeerResolver {
    /// Run one inquiry. Peers that do not answer name resolution in time are
    /// left out. Order is unspecified.
    fn resolve_peers(&mut self, scan_duration: Duration) -> io::Result<Vec<DiscoveredPeer>>;
}
