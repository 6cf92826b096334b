use serde::{Deserialize, Serialize};

use crate::error::EmuError;
use crate::width::Width;

/// General purpose register slot, in hardware encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    pub const ALL: [Gpr; 16] = [
        Gpr::Rax,
        Gpr::Rcx,
        Gpr::Rdx,
        Gpr::Rbx,
        Gpr::Rsp,
        Gpr::Rbp,
        Gpr::Rsi,
        Gpr::Rdi,
        Gpr::R8,
        Gpr::R9,
        Gpr::R10,
        Gpr::R11,
        Gpr::R12,
        Gpr::R13,
        Gpr::R14,
        Gpr::R15,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    /// Intel name of this slot viewed at `width`.
    pub const fn name(self, width: Width) -> &'static str {
        let column = match width {
            Width::Byte => 0,
            Width::Word => 1,
            Width::Dword => 2,
            Width::Qword => 3,
        };
        NAMES[self.index()][column]
    }
}

const NAMES: [[&str; 4]; 16] = [
    ["AL", "AX", "EAX", "RAX"],
    ["CL", "CX", "ECX", "RCX"],
    ["DL", "DX", "EDX", "RDX"],
    ["BL", "BX", "EBX", "RBX"],
    ["SPL", "SP", "ESP", "RSP"],
    ["BPL", "BP", "EBP", "RBP"],
    ["SIL", "SI", "ESI", "RSI"],
    ["DIL", "DI", "EDI", "RDI"],
    ["R8B", "R8W", "R8D", "R8"],
    ["R9B", "R9W", "R9D", "R9"],
    ["R10B", "R10W", "R10D", "R10"],
    ["R11B", "R11W", "R11D", "R11"],
    ["R12B", "R12W", "R12D", "R12"],
    ["R13B", "R13W", "R13D", "R13"],
    ["R14B", "R14W", "R14D", "R14"],
    ["R15B", "R15W", "R15D", "R15"],
];

const HIGH_NAMES: [&str; 4] = ["AH", "CH", "DH", "BH"];

/// A sized view over one [`Gpr`] slot.
///
/// `high` selects the legacy `AH`/`CH`/`DH`/`BH` view (bits 8..16); it is only meaningful for the
/// first four slots at byte width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub gpr: Gpr,
    pub width: Width,
    pub high: bool,
}

impl Register {
    pub const fn new(gpr: Gpr, width: Width) -> Self {
        Self {
            gpr,
            width,
            high: false,
        }
    }

    /// `AH`, `CH`, `DH` or `BH`.
    pub fn high_byte(gpr: Gpr) -> Option<Self> {
        (gpr.index() < HIGH_NAMES.len()).then_some(Self {
            gpr,
            width: Width::Byte,
            high: true,
        })
    }

    pub const fn qword(gpr: Gpr) -> Self {
        Self::new(gpr, Width::Qword)
    }

    pub fn name(&self) -> &'static str {
        if self.high {
            HIGH_NAMES[self.gpr.index() & 3]
        } else {
            self.gpr.name(self.width)
        }
    }

    /// The same slot viewed at `width`.
    ///
    /// High-byte views only exist at byte width.
    pub fn resized(self, width: Width) -> Result<Self, EmuError> {
        if self.high && width != Width::Byte {
            return Err(EmuError::InvalidOperandWidth { bits: width.bits() });
        }
        Ok(Self { width, ..self })
    }

    const fn shift(&self) -> u32 {
        if self.high {
            8
        } else {
            0
        }
    }
}

/// How narrow register writes treat the untouched bits of the 64-bit slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteRule {
    /// x86-64 behavior: 32-bit writes zero-extend into the slot, 8/16-bit writes merge.
    #[default]
    Architectural,
    /// Every narrow write merges, including 32-bit ones.
    PreserveUpper,
}

/// The sixteen 64-bit general purpose registers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterFile {
    slots: [u64; 16],
    rule: WriteRule,
}

impl RegisterFile {
    pub fn new(rule: WriteRule) -> Self {
        Self {
            slots: [0; 16],
            rule,
        }
    }

    pub fn rule(&self) -> WriteRule {
        self.rule
    }

    pub fn set_rule(&mut self, rule: WriteRule) {
        self.rule = rule;
    }

    pub fn gpr(&self, gpr: Gpr) -> u64 {
        self.slots[gpr.index()]
    }

    pub fn set_gpr(&mut self, gpr: Gpr, value: u64) {
        self.slots[gpr.index()] = value;
    }

    pub fn read(&self, reg: Register) -> u64 {
        (self.slots[reg.gpr.index()] >> reg.shift()) & reg.width.mask()
    }

    pub fn write(&mut self, reg: Register, value: u64) {
        let slot = &mut self.slots[reg.gpr.index()];
        match (reg.width, self.rule) {
            (Width::Qword, _) => *slot = value,
            (Width::Dword, WriteRule::Architectural) => *slot = value & Width::Dword.mask(),
            (width, _) => {
                let shift = reg.shift();
                let mask = width.mask() << shift;
                *slot = (*slot & !mask) | ((value & width.mask()) << shift);
            }
        }
    }
}
