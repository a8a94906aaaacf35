//! A very simple u4/nibble implementation.
//!
//! HID++2.0 packs the function ID and the software ID of a message into a
//! single byte, one nibble each.

/// Represents an unsigned 4-bit value (nibble) encoded as a byte.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct U4(u8);

impl U4 {
    /// The largest value a nibble can hold.
    pub const MAX: U4 = U4(0x0f);

    /// Constructs a nibble from the 4 low/rightmost bits of a byte.
    pub const fn from_lo(raw: u8) -> Self {
        Self(raw & 0x0f)
    }

    /// Constructs a nibble from the 4 high/leftmost bits of a byte.
    pub const fn from_hi(raw: u8) -> Self {
        Self(raw >> 4)
    }

    /// Constructs a byte with the nibble set as the 4 low/rightmost bits.
    pub const fn to_lo(self) -> u8 {
        self.0
    }

    /// Constructs a byte with the nibble set as the 4 high/leftmost bits.
    pub const fn to_hi(self) -> u8 {
        self.0 << 4
    }

    /// Returns the nibble following this one, wrapping around to `0x1` after
    /// `0xf`.
    ///
    /// `0x0` is skipped because HID++2.0 reserves a zero software ID for
    /// notifications sent by the device itself.
    pub const fn next_nonzero(self) -> Self {
        if self.0 >= 0x0f {
            Self(0x01)
        } else {
            Self(self.0 + 1)
        }
    }
}

impl TryFrom<u8> for U4 {
    type Error = u8;

    /// Converts a byte to a nibble, failing with the original value if it does
    /// not fit into 4 bits.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > Self::MAX.0 {
            return Err(value);
        }

        Ok(Self(value))
    }
}

/// Combines two nibbles to a byte, with `a` being set to the 4 leftmost and
/// `b` being set to the 4 rightmost bits.
pub const fn combine(a: U4, b: U4) -> u8 {
    a.to_hi() | b.to_lo()
}

/// Splits a byte into its high and low nibble.
pub const fn split(raw: u8) -> (U4, U4) {
    (U4::from_hi(raw), U4::from_lo(raw))
}
