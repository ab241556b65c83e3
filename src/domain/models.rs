use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bits of the button word that actually carry accelerometer LSBs
pub const RESERVED_BUTTON_BITS: u16 = 0x60E0;

/// Bluetooth device address (BD_ADDR)
///
/// Stored in wire order, least significant byte first, and displayed the
/// usual way round: `b[5]:b[4]:b[3]:b[2]:b[1]:b[0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PeerAddress(pub [u8; 6]);

impl PeerAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid Bluetooth address: {0:?}")]
pub struct AddressParseError(pub String);

impl FromStr for PeerAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AddressParseError(s.to_string());
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        // text is most significant byte first
        for slot in bytes.iter_mut().rev() {
            let part = parts.next().ok_or_else(err)?;
            if part.len() != 2 {
                return Err(err());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| err())?;
        }
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Self(bytes))
    }
}

/// A peer returned by discovery, before any channel is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub address: PeerAddress,
    pub name: String,
}

impl DiscoveredPeer {
    pub fn new(address: PeerAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
        }
    }
}

/// Core button state as reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Buttons(u16);

impl Buttons {
    pub const NONE: Self = Self(0);
    pub const LEFT: Self = Self(1 << 0);
    pub const RIGHT: Self = Self(1 << 1);
    pub const DOWN: Self = Self(1 << 2);
    pub const UP: Self = Self(1 << 3);
    pub const PLUS: Self = Self(1 << 4);
    pub const TWO: Self = Self(1 << 8);
    pub const ONE: Self = Self(1 << 9);
    pub const B: Self = Self(1 << 10);
    pub const A: Self = Self(1 << 11);
    pub const MINUS: Self = Self(1 << 12);
    pub const HOME: Self = Self(1 << 15);

    /// Build from the raw wire word, dropping the accelerometer bits
    pub const fn from_wire(raw: u16) -> Self {
        Self(raw & !RESERVED_BUTTON_BITS)
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// True when every button in `other` is held
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Buttons {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Last status report from the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    pub battery_low: bool,
    pub extension_connected: bool,
    pub speaker_enabled: bool,
    pub ir_enabled: bool,
    /// LED nibble, bit 0 is the leftmost LED
    pub led_state: u8,
    /// Raw battery level, no calibration
    pub battery_level: u8,
}

impl Status {
    /// Unpack the flags byte of a status report
    pub fn from_parts(flags: u8, battery_level: u8) -> Self {
        Self {
            battery_low: flags & 0x01 != 0,
            extension_connected: flags & 0x02 != 0,
            speaker_enabled: flags & 0x04 != 0,
            ir_enabled: flags & 0x08 != 0,
            led_state: flags >> 4,
            battery_level,
        }
    }
}
