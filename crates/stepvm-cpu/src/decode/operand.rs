use std::fmt::Write as _;

use crate::context::Context;
use crate::error::EmuError;
use crate::regs::{Gpr, Register};
use crate::width::{decode_le, Width};

/// `[base + index*scale + disp]`, or `[RIP + disp]` when `rip` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOperand {
    pub base: Option<Gpr>,
    pub index: Option<Gpr>,
    pub scale: u8,
    pub disp: i64,
    /// Address of the following instruction for RIP-relative operands.
    pub rip: Option<u64>,
    /// 32-bit address size (`0x67` prefix): the effective address is truncated.
    pub addr32: bool,
    /// Size of the memory access.
    pub width: Width,
}

impl MemoryOperand {
    pub fn address(&self, ctx: &Context) -> u64 {
        let base = match (self.rip, self.base) {
            (Some(next_ip), _) => next_ip,
            (None, Some(gpr)) => ctx.gpr(gpr),
            (None, None) => 0,
        };
        let index = self
            .index
            .map_or(0, |gpr| ctx.gpr(gpr).wrapping_mul(u64::from(self.scale)));
        let addr = base.wrapping_add(index).wrapping_add(self.disp as u64);
        if self.addr32 {
            Width::Dword.truncate(addr)
        } else {
            addr
        }
    }

    fn render(&self, width: Width) -> String {
        let addr_width = if self.addr32 { Width::Dword } else { Width::Qword };
        let mut out = format!("{} PTR [", width.ptr_name());
        let mut has_term = false;
        if self.rip.is_some() {
            out.push_str("RIP");
            has_term = true;
        } else if let Some(base) = self.base {
            out.push_str(base.name(addr_width));
            has_term = true;
        }
        if let Some(index) = self.index {
            if has_term {
                out.push('+');
            }
            out.push_str(index.name(addr_width));
            if self.scale > 1 {
                let _ = write!(out, "*{}", self.scale);
            }
            has_term = true;
        }
        if !has_term {
            let _ = write!(out, "0x{:X}", self.disp as u64);
        } else if self.disp > 0 {
            let _ = write!(out, "+0x{:X}", self.disp);
        } else if self.disp < 0 {
            let _ = write!(out, "-0x{:X}", self.disp.unsigned_abs());
        }
        out.push(']');
        out
    }
}

/// One operand of a decoded instruction, with its addressing mode resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(Register),
    Memory(MemoryOperand),
    /// Immediate already sign- or zero-extended to 64 bits.
    Immediate { value: u64, width: Width },
    /// Absolute target of a relative branch.
    Relative(u64),
}

impl Operand {
    /// Width the operand was encoded with.
    pub fn width(&self) -> Width {
        match self {
            Operand::Register(reg) => reg.width,
            Operand::Memory(mem) => mem.width,
            Operand::Immediate { width, .. } => *width,
            Operand::Relative(_) => Width::Qword,
        }
    }

    /// Reads the operand as `width` little-endian bytes.
    pub fn read(&self, ctx: &Context, width: Width) -> Result<Vec<u8>, EmuError> {
        Ok(match self {
            Operand::Register(reg) => width.encode(ctx.read_register(reg.resized(width)?)),
            Operand::Memory(mem) => ctx.memory.read_bytes(mem.address(ctx), width.bytes()),
            Operand::Immediate { value, .. } => width.encode(*value),
            Operand::Relative(target) => width.encode(*target),
        })
    }

    /// Reads the operand as an unsigned value of `width`.
    pub fn value(&self, ctx: &Context, width: Width) -> Result<u64, EmuError> {
        self.read(ctx, width).map(|bytes| decode_le(&bytes))
    }

    /// Resolves the storage location a write to this operand would hit.
    pub fn locate(&self, ctx: &Context, ip: u64) -> Result<Location, EmuError> {
        match self {
            Operand::Register(reg) => Ok(Location::Register(*reg)),
            Operand::Memory(mem) => Ok(Location::Memory(mem.address(ctx))),
            Operand::Immediate { .. } => {
                Err(EmuError::unsupported(ip, "immediate operand is not writable"))
            }
            Operand::Relative(_) => {
                Err(EmuError::unsupported(ip, "branch target is not writable"))
            }
        }
    }

    /// Intel-syntax text of the operand when accessed at `width`.
    pub fn render(&self, width: Width) -> String {
        match self {
            Operand::Register(reg) => reg.resized(width).unwrap_or(*reg).name().to_owned(),
            Operand::Memory(mem) => mem.render(width),
            Operand::Immediate { value, .. } => format!("0x{:X}", width.truncate(*value)),
            Operand::Relative(target) => format!("0x{target:X}"),
        }
    }
}

/// A writable storage location, resolved against a particular context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Register(Register),
    Memory(u64),
}

impl Location {
    /// Validates a write of `bytes` here without performing it.
    pub fn commit(self, bytes: &[u8]) -> Result<Commit, EmuError> {
        let width = Width::from_bytes(bytes.len())?;
        self.commit_value(width, decode_le(bytes))
    }

    pub fn commit_value(self, width: Width, value: u64) -> Result<Commit, EmuError> {
        if let Location::Register(reg) = self {
            reg.resized(width)?;
        }
        Ok(Commit {
            location: self,
            width,
            value: width.truncate(value),
        })
    }
}

/// A validated, not yet applied write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub location: Location,
    pub width: Width,
    pub value: u64,
}

impl Commit {
    pub fn apply(&self, ctx: &mut Context) {
        match self.location {
            Location::Register(reg) => {
                // Width was checked in `Location::commit_value`.
                let reg = Register {
                    width: self.width,
                    ..reg
                };
                ctx.write_register(reg, self.value);
            }
            Location::Memory(addr) => ctx.write_memory(addr, self.width, self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(base: Option<Gpr>, index: Option<Gpr>, scale: u8, disp: i64) -> MemoryOperand {
        MemoryOperand {
            base,
            index,
            scale,
            disp,
            rip: None,
            addr32: false,
            width: Width::Byte,
        }
    }

    #[test]
    fn effective_address_combines_all_terms() {
        let mut ctx = Context::default();
        ctx.set_gpr(Gpr::Rbp, 0x1000);
        ctx.set_gpr(Gpr::Rcx, 3);
        let op = mem(Some(Gpr::Rbp), Some(Gpr::Rcx), 4, -2);
        assert_eq!(op.address(&ctx), 0x1000 + 12 - 2);

        let rip_rel = MemoryOperand {
            rip: Some(0x40),
            ..mem(None, None, 1, 0x10)
        };
        assert_eq!(rip_rel.address(&ctx), 0x50);
    }

    #[test]
    fn memory_operands_render_intel_style() {
        assert_eq!(
            Operand::Memory(mem(Some(Gpr::Rbp), Some(Gpr::Rcx), 1, 0)).render(Width::Byte),
            "BYTE PTR [RBP+RCX]"
        );
        assert_eq!(
            Operand::Memory(mem(Some(Gpr::Rsp), None, 1, -8)).render(Width::Qword),
            "QWORD PTR [RSP-0x8]"
        );
        assert_eq!(
            Operand::Memory(mem(None, None, 1, 0x2000)).render(Width::Dword),
            "DWORD PTR [0x2000]"
        );
    }

    #[test]
    fn immediates_render_truncated_hex() {
        let imm = Operand::Immediate {
            value: u64::MAX,
            width: Width::Qword,
        };
        assert_eq!(imm.render(Width::Byte), "0xFF");
        assert_eq!(imm.read(&Context::default(), Width::Word).unwrap(), vec![0xff, 0xff]);
    }

    #[test]
    fn immediates_cannot_be_written() {
        let imm = Operand::Immediate {
            value: 1,
            width: Width::Byte,
        };
        assert!(matches!(
            imm.locate(&Context::default(), 0x10),
            Err(EmuError::UnsupportedAddressingMode { ip: 0x10, .. })
        ));
    }

    #[test]
    fn commit_rejects_bad_lengths_and_wide_high_byte_writes() {
        let ah = Register::high_byte(Gpr::Rax).unwrap();
        assert_eq!(
            Location::Register(ah).commit(&[1, 2]),
            Err(EmuError::InvalidOperandWidth { bits: 16 })
        );
        assert_eq!(
            Location::Memory(0).commit(&[1, 2, 3]),
            Err(EmuError::InvalidOperandWidth { bits: 24 })
        );
    }

    #[test]
    fn commit_applies_to_register_and_memory() {
        let mut ctx = Context::default();
        Location::Register(Register::new(Gpr::Rdx, Width::Word))
            .commit(&[0x34, 0x12])
            .unwrap()
            .apply(&mut ctx);
        assert_eq!(ctx.gpr(Gpr::Rdx), 0x1234);

        Location::Memory(0x80)
            .commit(&[0xaa, 0xbb])
            .unwrap()
            .apply(&mut ctx);
        assert_eq!(ctx.memory.read_bytes(0x80, 2), vec![0xaa, 0xbb]);
    }
}
