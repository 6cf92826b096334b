use std::fmt;

use crate::error::EmuError;

/// Operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Width {
    Byte,
    Word,
    Dword,
    Qword,
}

impl Width {
    pub const ALL: [Width; 4] = [Width::Byte, Width::Word, Width::Dword, Width::Qword];

    pub const fn bits(self) -> u32 {
        match self {
            Width::Byte => 8,
            Width::Word => 16,
            Width::Dword => 32,
            Width::Qword => 64,
        }
    }

    pub const fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }

    pub const fn mask(self) -> u64 {
        match self {
            Width::Qword => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    pub const fn sign_bit(self) -> u64 {
        1u64 << (self.bits() - 1)
    }

    pub fn from_bits(bits: u32) -> Result<Self, EmuError> {
        match bits {
            8 => Ok(Width::Byte),
            16 => Ok(Width::Word),
            32 => Ok(Width::Dword),
            64 => Ok(Width::Qword),
            _ => Err(EmuError::InvalidOperandWidth { bits }),
        }
    }

    pub fn from_bytes(len: usize) -> Result<Self, EmuError> {
        let bits = u32::try_from(len.saturating_mul(8)).unwrap_or(u32::MAX);
        Self::from_bits(bits)
    }

    pub const fn truncate(self, value: u64) -> u64 {
        value & self.mask()
    }

    pub const fn sign_extend(self, value: u64) -> u64 {
        let shift = 64 - self.bits();
        (((value << shift) as i64) >> shift) as u64
    }

    /// Little-endian encoding of the low `self.bytes()` bytes of `value`.
    pub fn encode(self, value: u64) -> Vec<u8> {
        value.to_le_bytes()[..self.bytes()].to_vec()
    }

    /// Size keyword used in memory operands (`BYTE PTR [...]`).
    pub const fn ptr_name(self) -> &'static str {
        match self {
            Width::Byte => "BYTE",
            Width::Word => "WORD",
            Width::Dword => "DWORD",
            Width::Qword => "QWORD",
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Interprets up to 8 little-endian bytes as an unsigned value.
pub fn decode_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | (u64::from(b) << (i * 8)))
}
