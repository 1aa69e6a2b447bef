//! Handling of message identifiers and frames

mod frame;

pub use frame::Frame;

use crate::reg::{IdReg, RegisterValue};
use embedded_can::{ExtendedId, Id, StandardId};

/// Message object identifier
///
/// A CAN identifier packed together with its format flags:
///
/// | bits  | content                                    |
/// |-------|--------------------------------------------|
/// | 31    | extended format                            |
/// | 30    | remote frame                               |
/// | 29    | error frame                                |
/// | 28:18 | 11-bit standard identifier                 |
/// | 17:0  | 18-bit extension, meaningful only if extended |
///
/// The lower 29 bits of an extended identifier are therefore the bus level
/// 29-bit identifier. For standard identifiers the extension field is ignored
/// by all comparisons.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mobid(u32);

impl Mobid {
    /// Extended format flag
    pub const IDE: u32 = 1 << 31;
    /// Remote frame flag
    pub const RTR: u32 = 1 << 30;
    /// Error frame flag
    pub const ERR: u32 = 1 << 29;
    /// Position of the standard identifier
    pub const STD_SHIFT: u32 = 18;
    /// Standard identifier field
    pub const STD_MASK: u32 = 0x7FF << Self::STD_SHIFT;
    /// Extension field
    pub const EXT_MASK: u32 = 0x3FFFF;

    /// Wraps a raw packed identifier
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw packed identifier
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Data frame with a standard identifier. Bits above the 11th are dropped.
    pub const fn standard(std: u16) -> Self {
        Self(((std as u32) << Self::STD_SHIFT) & Self::STD_MASK)
    }

    /// Data frame with an extended identifier made of the 11 upper bits `std`
    /// and the 18 lower bits `ext`
    pub const fn extended(std: u16, ext: u32) -> Self {
        Self(Self::standard(std).0 | (ext & Self::EXT_MASK) | Self::IDE)
    }

    /// Remote frame with a standard identifier
    pub const fn standard_remote(std: u16) -> Self {
        Self(Self::standard(std).0 | Self::RTR)
    }

    /// Remote frame with an extended identifier
    pub const fn extended_remote(std: u16, ext: u32) -> Self {
        Self(Self::extended(std, ext).0 | Self::RTR)
    }

    /// `true` for the 29-bit identifier format
    pub const fn is_extended(self) -> bool {
        self.0 & Self::IDE != 0
    }

    /// `true` for remote frames
    pub const fn is_remote(self) -> bool {
        self.0 & Self::RTR != 0
    }

    /// The 11-bit standard identifier (upper bits of an extended one)
    pub const fn standard_id(self) -> u16 {
        ((self.0 & Self::STD_MASK) >> Self::STD_SHIFT) as u16
    }

    /// The 18-bit extension field
    pub const fn extension(self) -> u32 {
        self.0 & Self::EXT_MASK
    }

    /// Differing bits, with the extension ignored unless `other` is extended.
    fn diff(self, other: Self) -> u32 {
        let diff = self.0 ^ other.0;
        if other.is_extended() {
            diff
        } else {
            diff & !Self::EXT_MASK
        }
    }

    /// `true` if both identifiers are the same
    ///
    /// The extension field only takes part when `other` is extended, so the
    /// comparison is not symmetric.
    pub fn compare(self, other: Self) -> bool {
        self.diff(other) == 0
    }

    /// `true` if `self` belongs to the group described by `other` and `mask`
    ///
    /// Only bits set in `mask` are compared. As with [`Self::compare`], the
    /// extension field is ignored when `other` is a standard identifier.
    pub fn compare_masked(self, other: Self, mask: u32) -> bool {
        self.diff(other) & mask == 0
    }

    /// `true` if the standard identifier fields match, regardless of format
    /// and extension
    ///
    /// Useful for higher layer protocols that treat the upper 11 bits of an
    /// extended identifier like a standard one.
    pub fn compare_standard_only(self, other: Self) -> bool {
        (self.0 ^ other.0) & Self::STD_MASK == 0
    }

    /// Like [`Self::compare_standard_only`], limited to the bits set in `mask`
    pub fn compare_standard_only_masked(self, other: Self, mask: u32) -> bool {
        (self.0 ^ other.0) & Self::STD_MASK & mask == 0
    }

    /// Encoding used by the mailbox identifier registers
    pub fn to_id_register(self) -> IdReg {
        let mut reg = IdReg::default();
        reg.set_ide(self.is_extended());
        reg.set_rtr(self.is_remote());
        reg.set_stid(self.standard_id());
        reg.set_exid(self.extension());
        reg
    }

    /// Decodes a mailbox identifier register or a 32-bit filter word
    pub fn from_id_register(reg: IdReg) -> Self {
        let mut raw = ((u32::from(reg.stid()) << Self::STD_SHIFT) & Self::STD_MASK)
            | (reg.exid() & Self::EXT_MASK);
        if reg.ide() {
            raw |= Self::IDE;
        }
        if reg.rtr() {
            raw |= Self::RTR;
        }
        Self(raw)
    }

    /// Content of a 32-bit filter register matching this identifier
    ///
    /// The lowest bit is always zero, it has no identifier meaning.
    pub fn filter32(self) -> u32 {
        self.to_id_register().bits() & !1
    }

    /// Content of a 16-bit filter half matching this identifier
    ///
    /// The standard identifier is placed at bit 6 and the three most
    /// significant extension bits at bits 2:0, with the format and remote
    /// flags at bits 3 and 4. With a standard identifier above `0x3FF` the
    /// encoding spills into bit 16.
    pub fn filter16(self) -> u32 {
        let mut word = (u32::from(self.standard_id()) << 6) | (self.extension() >> 15);
        if self.is_extended() {
            word |= 0x08;
        }
        if self.is_remote() {
            word |= 0x10;
        }
        word
    }
}

impl From<Id> for Mobid {
    fn from(id: Id) -> Self {
        match id {
            Id::Standard(id) => Self::standard(id.as_raw()),
            Id::Extended(id) => Self(id.as_raw() | Self::IDE),
        }
    }
}

impl From<Mobid> for Id {
    fn from(mobid: Mobid) -> Self {
        if mobid.is_extended() {
            // The mask ensures the ID is in range for a 29-bit integer
            Id::Extended(unsafe {
                ExtendedId::new_unchecked(mobid.raw() & ExtendedId::MAX.as_raw())
            })
        } else {
            // The mask ensures the ID is in range for a 11-bit integer
            Id::Standard(unsafe {
                StandardId::new_unchecked(mobid.standard_id() & StandardId::MAX.as_raw())
            })
        }
    }
}

/// Packs a payload into the low and high data register words
pub fn pack_payload(data: &[u8; 8]) -> (u32, u32) {
    (
        u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
    )
}

/// Unpacks the low and high data register words into a payload
pub fn unpack_payload(low: u32, high: u32) -> [u8; 8] {
    let low = low.to_le_bytes();
    let high = high.to_le_bytes();
    [
        low[0], low[1], low[2], low[3], high[0], high[1], high[2], high[3],
    ]
}
