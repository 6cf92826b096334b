//! Instruction decoding.
//!
//! Bytes are decoded with `iced-x86` in 64-bit mode and immediately converted into the crate's own
//! operand model, so nothing downstream depends on the decoder backend.

mod operand;

use iced_x86::{Decoder, DecoderOptions, Instruction, OpKind, Register as IcedRegister};

use crate::context::Context;
use crate::error::EmuError;
use crate::ops::Mnemonic;
use crate::regs::{Gpr, Register};
use crate::width::Width;

pub use operand::{Commit, Location, MemoryOperand, Operand};

/// Longest legal x86 instruction.
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// A decoded instruction with its addressing modes resolved.
///
/// Besides describing the instruction it acts as the capability object executors use to touch
/// their operands: [`disassemble`](Self::disassemble), [`fetch`](Self::fetch) and
/// [`set`](Self::set). The destination is always operand 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    ip: u64,
    bytes: Vec<u8>,
    mnemonic: Mnemonic,
    width: Width,
    operands: Vec<Operand>,
}

impl DecodedInstruction {
    /// Decodes one instruction from `bytes`, located at `ip`.
    pub fn decode(bytes: &[u8], ip: u64) -> Result<Self, EmuError> {
        let mut decoder = Decoder::with_ip(64, bytes, ip, DecoderOptions::NONE);
        let inst = decoder.decode();
        let len = inst.len();
        let unknown = || EmuError::UnknownOpcode {
            ip,
            bytes: bytes.iter().take(len.max(1)).copied().collect(),
        };

        if inst.is_invalid() {
            return Err(unknown());
        }
        let mnemonic = Mnemonic::from_iced(inst.mnemonic()).ok_or_else(unknown)?;
        if matches!(inst.segment_prefix(), IcedRegister::FS | IcedRegister::GS) {
            return Err(EmuError::unsupported(ip, "FS/GS segment override"));
        }

        let operands = (0..inst.op_count())
            .map(|i| convert_operand(&inst, i, ip))
            .collect::<Result<Vec<_>, _>>()?;

        let width = operands
            .iter()
            .find(|op| matches!(op, Operand::Register(_) | Operand::Memory(_)))
            .or_else(|| operands.first())
            .map_or(Width::Qword, Operand::width);

        Ok(Self {
            ip,
            bytes: bytes[..len].to_vec(),
            mnemonic,
            width,
            operands,
        })
    }

    /// Decodes the instruction at `ctx.rip`.
    pub fn decode_at(ctx: &Context) -> Result<Self, EmuError> {
        let bytes = ctx.memory.read_bytes(ctx.rip, MAX_INSTRUCTION_LEN);
        Self::decode(&bytes, ctx.rip)
    }

    pub fn ip(&self) -> u64 {
        self.ip
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn next_ip(&self) -> u64 {
        self.ip.wrapping_add(self.bytes.len() as u64)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mnemonic(&self) -> Mnemonic {
        self.mnemonic
    }

    /// Operand size of the instruction.
    pub fn width(&self) -> Width {
        self.width
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn dest(&self) -> Option<&Operand> {
        self.operands.first()
    }

    pub fn source(&self) -> Option<&Operand> {
        self.operands.get(1)
    }

    /// Intel-syntax text. Operands sized like the instruction are rendered at `width`; operands
    /// with their own size (`MOVZX` sources, byte immediates) keep it.
    pub fn disassemble(&self, width: Width) -> String {
        let operands: Vec<String> = self
            .operands
            .iter()
            .map(|op| {
                let op_width = if op.width() == self.width { width } else { op.width() };
                op.render(op_width)
            })
            .collect();
        if operands.is_empty() {
            self.mnemonic.name().to_owned()
        } else {
            format!("{} {}", self.mnemonic.name(), operands.join(", "))
        }
    }

    /// Reads every operand at `width`, destination first.
    pub fn fetch(&self, ctx: &Context, width: Width) -> Result<Vec<Vec<u8>>, EmuError> {
        self.operands.iter().map(|op| op.read(ctx, width)).collect()
    }

    /// Resolves the destination operand against `ctx`.
    pub fn destination(&self, ctx: &Context) -> Result<Location, EmuError> {
        self.dest()
            .ok_or_else(|| EmuError::unsupported(self.ip, "instruction has no destination"))?
            .locate(ctx, self.ip)
    }

    /// Writes `bytes` (whose length selects the width) to the destination.
    pub fn set(&self, ctx: &mut Context, bytes: &[u8]) -> Result<(), EmuError> {
        let commit = self.destination(ctx)?.commit(bytes)?;
        commit.apply(ctx);
        Ok(())
    }
}

fn convert_operand(inst: &Instruction, idx: u32, ip: u64) -> Result<Operand, EmuError> {
    let immediate = |width| Operand::Immediate {
        value: inst.immediate(idx),
        width,
    };

    Ok(match inst.op_kind(idx) {
        OpKind::Register => {
            let reg = inst.op_register(idx);
            Operand::Register(
                map_register(reg)
                    .ok_or_else(|| EmuError::unsupported(ip, format!("register {reg:?}")))?,
            )
        }
        OpKind::Memory => Operand::Memory(map_memory(inst, ip)?),
        OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => {
            Operand::Relative(inst.near_branch_target())
        }
        OpKind::Immediate8 | OpKind::Immediate8_2nd => immediate(Width::Byte),
        OpKind::Immediate16 | OpKind::Immediate8to16 => immediate(Width::Word),
        OpKind::Immediate32 | OpKind::Immediate8to32 => immediate(Width::Dword),
        OpKind::Immediate64 | OpKind::Immediate8to64 | OpKind::Immediate32to64 => {
            immediate(Width::Qword)
        }
        other => return Err(EmuError::unsupported(ip, format!("operand kind {other:?}"))),
    })
}

fn map_memory(inst: &Instruction, ip: u64) -> Result<MemoryOperand, EmuError> {
    let base = inst.memory_base();
    let index = inst.memory_index();
    let disp = inst.memory_displacement64();

    // iced reports RIP-relative displacements as the absolute target.
    let (base_gpr, rip, disp) = if matches!(base, IcedRegister::RIP | IcedRegister::EIP) {
        let next_ip = inst.next_ip();
        (None, Some(next_ip), disp.wrapping_sub(next_ip) as i64)
    } else {
        (address_gpr(base, ip)?, None, disp as i64)
    };

    Ok(MemoryOperand {
        base: base_gpr,
        index: address_gpr(index, ip)?,
        scale: inst.memory_index_scale() as u8,
        disp,
        rip,
        addr32: base.size() == 4 || index.size() == 4,
        width: Width::from_bytes(inst.memory_size().size()).unwrap_or(Width::Qword),
    })
}

fn address_gpr(reg: IcedRegister, ip: u64) -> Result<Option<Gpr>, EmuError> {
    if reg == IcedRegister::None {
        return Ok(None);
    }
    gpr_from_iced_register(reg)
        .map(Some)
        .ok_or_else(|| EmuError::unsupported(ip, format!("address register {reg:?}")))
}

fn map_register(reg: IcedRegister) -> Option<Register> {
    match reg {
        IcedRegister::AH => Register::high_byte(Gpr::Rax),
        IcedRegister::CH => Register::high_byte(Gpr::Rcx),
        IcedRegister::DH => Register::high_byte(Gpr::Rdx),
        IcedRegister::BH => Register::high_byte(Gpr::Rbx),
        _ => {
            let gpr = gpr_from_iced_register(reg)?;
            let width = Width::from_bytes(reg.size()).ok()?;
            Some(Register::new(gpr, width))
        }
    }
}

fn gpr_from_iced_register(reg: IcedRegister) -> Option<Gpr> {
    let index = match reg {
        IcedRegister::AL | IcedRegister::AX | IcedRegister::EAX | IcedRegister::RAX => 0,
        IcedRegister::CL | IcedRegister::CX | IcedRegister::ECX | IcedRegister::RCX => 1,
        IcedRegister::DL | IcedRegister::DX | IcedRegister::EDX | IcedRegister::RDX => 2,
        IcedRegister::BL | IcedRegister::BX | IcedRegister::EBX | IcedRegister::RBX => 3,
        IcedRegister::SPL | IcedRegister::SP | IcedRegister::ESP | IcedRegister::RSP => 4,
        IcedRegister::BPL | IcedRegister::BP | IcedRegister::EBP | IcedRegister::RBP => 5,
        IcedRegister::SIL | IcedRegister::SI | IcedRegister::ESI | IcedRegister::RSI => 6,
        IcedRegister::DIL | IcedRegister::DI | IcedRegister::EDI | IcedRegister::RDI => 7,
        IcedRegister::R8L | IcedRegister::R8W | IcedRegister::R8D | IcedRegister::R8 => 8,
        IcedRegister::R9L | IcedRegister::R9W | IcedRegister::R9D | IcedRegister::R9 => 9,
        IcedRegister::R10L | IcedRegister::R10W | IcedRegister::R10D | IcedRegister::R10 => 10,
        IcedRegister::R11L | IcedRegister::R11W | IcedRegister::R11D | IcedRegister::R11 => 11,
        IcedRegister::R12L | IcedRegister::R12W | IcedRegister::R12D | IcedRegister::R12 => 12,
        IcedRegister::R13L | IcedRegister::R13W | IcedRegister::R13D | IcedRegister::R13 => 13,
        IcedRegister::R14L | IcedRegister::R14W | IcedRegister::R14D | IcedRegister::R14 => 14,
        IcedRegister::R15L | IcedRegister::R15W | IcedRegister::R15D | IcedRegister::R15 => 15,
        _ => return None,
    };
    Gpr::from_index(index)
}
