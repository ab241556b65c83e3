//! Connected Controller
//!
//! A [`Device`] owns both L2CAP channels of one controller together with
//! its [`ControllerState`]. Every outbound frame goes through
//! [`Device::transmit`], which stamps the rumble latch on it.

use crate::domain::controller::ControllerState;
use crate::domain::models::{Buttons, PeerAddress, Status};
use crate::infrastructure::bluetooth::protocol::{
    self, DecodeError, Decoded, InputReport, OutputFrame, MAX_REPORT_LEN,
};
use crate::infrastructure::bluetooth::transport::Channel;
use std::io;
use thiserror::Error;
use tracing::{trace, warn};

/// A failed poll of one device
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("protocol violation: {0}")]
    Protocol(#[from] DecodeError),
}

/// One connected controller
///
/// Not `Clone`: the channels are closed exactly once, when the device is
/// dropped. The report channel is declared first so it closes first.
pub struct Device<C: Channel> {
    address: PeerAddress,
    report_channel: C,
    command_channel: C,
    state: ControllerState,
    send_failures: u64,
    protocol_violations: u64,
}

impl<C: Channel> Device<C> {
    pub fn new(address: PeerAddress, command_channel: C, report_channel: C) -> Self {
        Self {
            address,
            report_channel,
            command_channel,
            state: ControllerState::new(),
            send_failures: 0,
            protocol_violations: 0,
        }
    }

    pub fn address(&self) -> PeerAddress {
        self.address
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn buttons(&self) -> Buttons {
        self.state.buttons()
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    pub fn rumble(&self) -> bool {
        self.state.rumble()
    }

    /// Sends that failed since the device was connected
    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }

    /// Inbound frames rejected by the decoder
    pub fn protocol_violations(&self) -> u64 {
        self.protocol_violations
    }

    /// Receive at most one report without blocking and fold it into the state
    ///
    /// An empty or one-byte read is the normal idle case and returns
    /// `Ok(Decoded::Ignored)`.
    pub fn update(&mut self) -> Result<Decoded, DeviceError> {
        let mut buffer = [0u8; MAX_REPORT_LEN];
        let received = match self.report_channel.try_recv(&mut buffer) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => return Err(DeviceError::Receive(e)),
        };

        let report = protocol::decode(&buffer[..received]).map_err(|e| {
            self.protocol_violations += 1;
            DeviceError::from(e)
        })?;
        self.state.apply(&report);
        Ok(report)
    }

    /// Set the rumble latch and tell the controller
    pub fn set_rumble(&mut self, on: bool) {
        self.state.set_rumble(on);
        self.transmit(protocol::encode_set_rumble(on));
    }

    pub fn set_leds(&mut self, mask: u8) {
        self.transmit(protocol::encode_set_leds(mask));
    }

    pub fn set_report_mode(&mut self, report: InputReport, continuous: bool) {
        self.transmit(protocol::encode_set_report_mode(report, continuous));
    }

    pub fn request_status(&mut self) {
        self.transmit(protocol::encode_request_status());
    }

    /// Stamp the rumble latch on `frame` and send it
    ///
    /// Failures are counted and logged, never retried.
    pub fn transmit(&mut self, mut frame: OutputFrame) -> bool {
        protocol::apply_rumble_bit(&mut frame, self.state.rumble());
        trace!("[{}] -> {:02X?}", self.address, frame.as_bytes());

        match self.command_channel.send(frame.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                self.send_failures += 1;
                warn!(
                    "[{}] send of command {:#04x} failed ({} so far): {}",
                    self.address,
                    frame.report(),
                    self.send_failures,
                    e
                );
                false
            }
        }
    }
}

impl<C: Channel> std::fmt::Debug for Device<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.address)
            .field("state", &self.state)
            .field("send_failures", &self.send_failures)
            .field("protocol_violations", &self.protocol_violations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::memory::{MemoryChannel, MemoryPeer, MemoryTransport};
    use crate::infrastructure::bluetooth::protocol::{COMMAND_PSM, REPORT_PSM};
    use crate::infrastructure::bluetooth::transport::ChannelOpener;

    fn connected() -> (MemoryPeer, Device<MemoryChannel>) {
        let address = PeerAddress::new([1, 2, 3, 4, 5, 6]);
        let peer = MemoryPeer::new(address, "Nintendo RVL-CNT-01");
        let mut transport = MemoryTransport::new().with_peer(peer.clone());
        let command = transport.open(address, COMMAND_PSM).unwrap();
        let report = transport.open(address, REPORT_PSM).unwrap();
        (peer, Device::new(address, command, report))
    }

    #[test]
    fn test_rumble_latch_rides_on_every_command() {
        let (peer, mut device) = connected();

        device.set_rumble(true);
        device.set_leds(0x1);
        device.request_status();
        device.set_report_mode(InputReport::Buttons, false);
        device.set_rumble(false);
        device.request_status();

        assert_eq!(
            peer.sent_frames(COMMAND_PSM),
            vec![
                vec![0xA2, 0x10, 0x01],
                vec![0xA2, 0x11, 0x11],
                vec![0xA2, 0x15, 0x01],
                vec![0xA2, 0x12, 0x01, 0x30],
                vec![0xA2, 0x10, 0x00],
                vec![0xA2, 0x15, 0x00],
            ]
        );
        assert!(peer.sent_frames(REPORT_PSM).is_empty());
    }

    #[test]
    fn test_update_idle_and_reports() {
        let (peer, mut device) = connected();

        assert!(matches!(device.update(), Ok(Decoded::Ignored)));
        assert_eq!(device.buttons(), Buttons::NONE);

        peer.push_report(&[0xA1]);
        assert!(matches!(device.update(), Ok(Decoded::Ignored)));

        peer.push_report(&[0xA1, 0x30, 0x00, 0x80]);
        assert!(matches!(device.update(), Ok(Decoded::Buttons(_))));
        assert!(device.buttons().contains(Buttons::HOME));

        peer.push_report(&[0xA1, 0x20, 0x00, 0x00, 0x20, 0x00, 0x00, 0x99]);
        device.update().unwrap();
        assert_eq!(device.buttons(), Buttons::NONE);
        assert_eq!(device.status().battery_level, 0x99);
        assert_eq!(device.status().led_state, 0x2);
    }

    #[test]
    fn test_protocol_violation_is_counted_and_state_kept() {
        let (peer, mut device) = connected();
        peer.push_report(&[0xA1, 0x30, 0x00, 0x08]);
        device.update().unwrap();

        peer.push_report(&[0x55, 0x30, 0xFF, 0xFF]);
        let err = device.update().unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(DecodeError::BadSentinel(0x55))));
        assert_eq!(device.protocol_violations(), 1);
        assert_eq!(device.buttons(), Buttons::A);
    }

    #[test]
    fn test_send_failures_are_counted() {
        let (peer, mut device) = connected();
        peer.fail_sends(true);
        device.request_status();
        assert!(!device.transmit(protocol::encode_set_leds(0)));
        assert_eq!(device.send_failures(), 2);

        peer.fail_sends(false);
        device.request_status();
        assert_eq!(device.send_failures(), 2);
        assert_eq!(peer.sent_frames(COMMAND_PSM).len(), 1);
    }

    #[test]
    fn test_drop_closes_both_channels() {
        let (peer, device) = connected();
        assert!(peer.is_open(COMMAND_PSM));
        assert!(peer.is_open(REPORT_PSM));
        drop(device);
        assert!(!peer.is_open(COMMAND_PSM));
        assert!(!peer.is_open(REPORT_PSM));
    }
}
