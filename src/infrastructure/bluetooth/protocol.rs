//! Wiimote Report Protocol
//!
//! This module contains the wire format for talking to the controller:
//! outbound command frames and inbound report decoding. Nothing in here
//! touches a channel.

use crate::domain::models::{Buttons, Status};
use thiserror::Error;
use tracing::trace;

/// First byte of every frame we send (HID "data output")
pub const OUTPUT_SENTINEL: u8 = 0xA2;

/// First byte of every frame the controller sends (HID "data input")
pub const INPUT_SENTINEL: u8 = 0xA1;

/// Largest inbound report this layer reads in one receive
pub const MAX_REPORT_LEN: usize = 23;

/// Largest outbound frame produced by the encoders below
pub const MAX_OUTPUT_LEN: usize = 4;

/// L2CAP PSM of the command (HID control) channel
pub const COMMAND_PSM: u16 = 0x11;

/// L2CAP PSM of the report (HID interrupt) channel
pub const REPORT_PSM: u16 = 0x13;

/// Advertised names of genuine controllers and the later "-TR" revision
pub const KNOWN_NAMES: [&str; 2] = ["Nintendo RVL-CNT-01", "Nintendo RVL-CNT-01-TR"];

/// Byte offset of the rumble latch in every outbound frame
const RUMBLE_BYTE: usize = 2;

/// Outbound command kinds (byte 1 of an outbound frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputReport {
    Rumble = 0x10,
    Led = 0x11,
    ReportMode = 0x12,
    StatusRequest = 0x15,
    /// Reserved, not encoded by this crate
    WriteMemory = 0x16,
    /// Reserved, not encoded by this crate
    ReadMemory = 0x17,
}

/// Inbound report kinds (byte 1 of an inbound frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InputReport {
    Status = 0x20,
    /// Known but never decoded here
    ReadMemory = 0x21,
    Buttons = 0x30,
}

impl InputReport {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x20 => Some(Self::Status),
            0x21 => Some(Self::ReadMemory),
            0x30 => Some(Self::Buttons),
            _ => None,
        }
    }

    /// Minimum frame length (sentinel and kind included) needed to decode
    fn min_frame_len(self) -> usize {
        match self {
            // sentinel, kind, 2 button bytes
            Self::Buttons => 4,
            // ... plus flags, 2 reserved, battery
            Self::Status => 8,
            Self::ReadMemory => 2,
        }
    }
}

/// An outbound command frame, ready for the rumble latch and transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFrame {
    bytes: [u8; MAX_OUTPUT_LEN],
    len: usize,
}

impl OutputFrame {
    fn new(report: OutputReport, payload: &[u8]) -> Self {
        let mut bytes = [0u8; MAX_OUTPUT_LEN];
        bytes[0] = OUTPUT_SENTINEL;
        bytes[1] = report as u8;
        bytes[2..2 + payload.len()].copy_from_slice(payload);
        Self {
            bytes,
            len: 2 + payload.len(),
        }
    }

    /// Command kind carried in byte 1
    pub fn report(&self) -> u8 {
        self.bytes[1]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether bit 0 of byte 2 is set
    pub fn rumble_bit(&self) -> bool {
        self.bytes[RUMBLE_BYTE] & 0x01 != 0
    }
}

/// Select the report kind the controller streams and whether it streams
/// continuously (bit 2 of byte 2) or only on change.
pub fn encode_set_report_mode(report: InputReport, continuous: bool) -> OutputFrame {
    let flags = if continuous { 0x04 } else { 0x00 };
    OutputFrame::new(OutputReport::ReportMode, &[flags, report as u8])
}

/// Set the four player LEDs. Only the low nibble of `mask` is used.
pub fn encode_set_leds(mask: u8) -> OutputFrame {
    OutputFrame::new(OutputReport::Led, &[(mask & 0x0F) << 4])
}

pub fn encode_set_rumble(on: bool) -> OutputFrame {
    OutputFrame::new(OutputReport::Rumble, &[on as u8])
}

pub fn encode_request_status() -> OutputFrame {
    OutputFrame::new(OutputReport::StatusRequest, &[0x00])
}

/// Write the rumble latch into bit 0 of byte 2.
///
/// The controller reads that bit from every output report, so this must
/// run on every frame right before it is sent.
pub fn apply_rumble_bit(frame: &mut OutputFrame, rumble: bool) {
    let byte = &mut frame.bytes[RUMBLE_BYTE];
    *byte = (*byte & !0x01) | rumble as u8;
}

/// A decoded inbound report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Buttons(Buttons),
    Status { buttons: Buttons, status: Status },
    /// No data this tick, or a report kind this layer does not consume
    Ignored,
}

/// Inbound bytes that are not a well-formed report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected leading byte {0:#04x} (expected 0xa1)")]
    BadSentinel(u8),

    #[error("{report:?} report truncated: {actual} bytes, need {expected}")]
    Truncated {
        report: InputReport,
        expected: usize,
        actual: usize,
    },
}

/// Forward-only reader over a received frame
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn u16_le(&mut self) -> Option<u16> {
        let bytes = self.buf.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        if self.pos + n > self.buf.len() {
            return None;
        }
        self.pos += n;
        Some(())
    }
}

/// Decode one inbound frame
///
/// # Frame Layout
///
/// ```text
/// [0]     : 0xA1 sentinel
/// [1]     : report kind
///
/// Buttons (0x30):
/// [2-3]   : button mask (u16 little-endian, 0x60E0 masked off)
///
/// Status (0x20):
/// [2-3]   : button mask, as above
/// [4]     : bit 0 battery low
///           bit 1 extension connected
///           bit 2 speaker enabled
///           bit 3 IR camera enabled
///           bits 4-7 LED state
/// [5-6]   : reserved
/// [7]     : battery level (raw 0-255)
/// ```
///
/// Fewer than two bytes is the idle case and yields [`Decoded::Ignored`].
pub fn decode(bytes: &[u8]) -> Result<Decoded, DecodeError> {
    if bytes.len() < 2 {
        return Ok(Decoded::Ignored);
    }

    trace!("Raw report: {:02X?}", bytes);

    let mut cursor = Cursor::new(bytes);
    let sentinel = cursor.u8().unwrap_or_default();
    if sentinel != INPUT_SENTINEL {
        return Err(DecodeError::BadSentinel(sentinel));
    }

    let kind = cursor.u8().unwrap_or_default();
    let report = match InputReport::from_byte(kind) {
        Some(InputReport::ReadMemory) | None => return Ok(Decoded::Ignored),
        Some(report) => report,
    };

    let truncated = DecodeError::Truncated {
        report,
        expected: report.min_frame_len(),
        actual: bytes.len(),
    };

    let buttons = cursor
        .u16_le()
        .map(Buttons::from_wire)
        .ok_or(truncated)?;

    match report {
        InputReport::Buttons => Ok(Decoded::Buttons(buttons)),
        InputReport::Status => {
            let flags = cursor.u8().ok_or(truncated)?;
            cursor.skip(2).ok_or(truncated)?;
            let battery_level = cursor.u8().ok_or(truncated)?;
            Ok(Decoded::Status {
                buttons,
                status: Status::from_parts(flags, battery_level),
            })
        }
        InputReport::ReadMemory => Ok(Decoded::Ignored),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(
            encode_set_report_mode(InputReport::Status, true).as_bytes(),
            &[0xA2, 0x12, 0x04, 0x20]
        );
        assert_eq!(
            encode_set_report_mode(InputReport::Buttons, false).as_bytes(),
            &[0xA2, 0x12, 0x00, 0x30]
        );
        assert_eq!(encode_set_leds(0b0101).as_bytes(), &[0xA2, 0x11, 0x50]);
        assert_eq!(encode_set_rumble(true).as_bytes(), &[0xA2, 0x10, 0x01]);
        assert_eq!(encode_set_rumble(false).as_bytes(), &[0xA2, 0x10, 0x00]);
        assert_eq!(encode_request_status().as_bytes(), &[0xA2, 0x15, 0x00]);
    }

    #[test]
    fn test_led_mask_ignores_high_nibble() {
        assert_eq!(encode_set_leds(0xF3).as_bytes(), &[0xA2, 0x11, 0x30]);
    }

    #[test]
    fn test_rumble_bit_follows_latch_on_every_command() {
        let frames = [
            encode_set_report_mode(InputReport::Status, true),
            encode_set_leds(0x0F),
            encode_set_rumble(false),
            encode_request_status(),
        ];
        for latch in [true, false, true] {
            for frame in frames {
                let mut frame = frame;
                apply_rumble_bit(&mut frame, latch);
                assert_eq!(frame.rumble_bit(), latch, "frame {:02X?}", frame.as_bytes());
            }
        }
    }

    #[test]
    fn test_rumble_bit_leaves_other_payload_bits() {
        let mut frame = encode_set_report_mode(InputReport::Status, true);
        apply_rumble_bit(&mut frame, true);
        assert_eq!(frame.as_bytes(), &[0xA2, 0x12, 0x05, 0x20]);
        apply_rumble_bit(&mut frame, false);
        assert_eq!(frame.as_bytes(), &[0xA2, 0x12, 0x04, 0x20]);
    }

    #[test]
    fn test_decode_buttons_masks_accelerometer_bits() {
        let decoded = decode(&[0xA1, 0x30, 0xFF, 0xFF]).unwrap();
        assert_eq!(decoded, Decoded::Buttons(Buttons::from_bits(0x9F1F)));
    }

    #[test]
    fn test_decode_buttons_little_endian() {
        // A in the high byte, LEFT in the low byte
        let decoded = decode(&[0xA1, 0x30, 0x01, 0x08]).unwrap();
        let Decoded::Buttons(buttons) = decoded else {
            panic!("expected buttons, got {decoded:?}");
        };
        assert!(buttons.contains(Buttons::LEFT));
        assert!(buttons.contains(Buttons::A));
        assert!(!buttons.contains(Buttons::B));
    }

    #[test]
    fn test_decode_status_report() {
        let frame = [0xA1, 0x20, 0xFF, 0xFF, 0b0001_0011, 0x00, 0x00, 0xC8];
        let decoded = decode(&frame).unwrap();
        let Decoded::Status { buttons, status } = decoded else {
            panic!("expected status, got {decoded:?}");
        };
        assert_eq!(buttons.bits(), 0x9F1F);
        assert!(status.battery_low);
        assert!(status.extension_connected);
        assert!(!status.speaker_enabled);
        assert!(!status.ir_enabled);
        assert_eq!(status.led_state, 0x1);
        assert_eq!(status.battery_level, 0xC8);
    }

    #[test]
    fn test_decode_short_buffers_are_idle() {
        assert_eq!(decode(&[]), Ok(Decoded::Ignored));
        assert_eq!(decode(&[0xA1]), Ok(Decoded::Ignored));
        // even a garbage single byte is just "no data"
        assert_eq!(decode(&[0x00]), Ok(Decoded::Ignored));
    }

    #[test]
    fn test_decode_bad_sentinel_is_violation() {
        assert_eq!(
            decode(&[0xA2, 0x30, 0x00, 0x00]),
            Err(DecodeError::BadSentinel(0xA2))
        );
    }

    #[test]
    fn test_decode_unconsumed_kinds_are_ignored() {
        assert_eq!(decode(&[0xA1, 0x21, 0x00, 0x00, 0x00]), Ok(Decoded::Ignored));
        assert_eq!(decode(&[0xA1, 0x33, 0x00, 0x00, 0x80, 0x80, 0x80]), Ok(Decoded::Ignored));
    }

    #[test]
    fn test_decode_truncated_report() {
        assert_eq!(
            decode(&[0xA1, 0x30, 0x08]),
            Err(DecodeError::Truncated {
                report: InputReport::Buttons,
                expected: 4,
                actual: 3,
            })
        );
        assert!(matches!(
            decode(&[0xA1, 0x20, 0x00, 0x00, 0x00, 0x00]),
            Err(DecodeError::Truncated { report: InputReport::Status, expected: 8, .. })
        ));
    }

    #[test]
    fn test_decode_tolerates_trailing_bytes() {
        let mut frame = [0u8; MAX_REPORT_LEN];
        frame[..4].copy_from_slice(&[0xA1, 0x30, 0x00, 0x80]);
        assert_eq!(
            decode(&frame),
            Ok(Decoded::Buttons(Buttons::HOME))
        );
    }
}
