//! Executable instruction semantics.
//!
//! Every supported instruction is a [`Mnemonic`]. Building an [`Opcode`] reads the operands
//! through the [`DecodedInstruction`] and computes the complete effect (destination writes, flag
//! update, control transfer) without touching the [`Context`]; [`Opcode::execute`] then commits
//! it. A failure while building therefore never leaves a half-executed instruction behind.

pub mod alu;
pub mod bitwise;
mod branch;
mod data;

use crate::context::Context;
use crate::decode::{Commit, DecodedInstruction, Location, Operand};
use crate::error::EmuError;
use crate::flags::FlagSet;
use crate::width::Width;

pub use branch::Condition;

/// The closed set of instructions the emulator executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Mov,
    Movzx,
    Movsx,
    Movsxd,
    Lea,
    Xchg,
    Push,
    Pop,
    Nop,
    Add,
    Adc,
    Sub,
    Sbb,
    Cmp,
    Neg,
    Inc,
    Dec,
    And,
    Or,
    Xor,
    Test,
    Not,
    Jmp,
    Jcc(Condition),
    Call,
    Ret,
    Hlt,
}

impl Mnemonic {
    pub fn from_iced(mnemonic: iced_x86::Mnemonic) -> Option<Self> {
        use iced_x86::Mnemonic as M;
        Some(match mnemonic {
            M::Mov => Self::Mov,
            M::Movzx => Self::Movzx,
            M::Movsx => Self::Movsx,
            M::Movsxd => Self::Movsxd,
            M::Lea => Self::Lea,
            M::Xchg => Self::Xchg,
            M::Push => Self::Push,
            M::Pop => Self::Pop,
            M::Nop => Self::Nop,
            M::Add => Self::Add,
            M::Adc => Self::Adc,
            M::Sub => Self::Sub,
            M::Sbb => Self::Sbb,
            M::Cmp => Self::Cmp,
            M::Neg => Self::Neg,
            M::Inc => Self::Inc,
            M::Dec => Self::Dec,
            M::And => Self::And,
            M::Or => Self::Or,
            M::Xor => Self::Xor,
            M::Test => Self::Test,
            M::Not => Self::Not,
            M::Jmp => Self::Jmp,
            M::Call => Self::Call,
            M::Ret => Self::Ret,
            M::Hlt => Self::Hlt,
            other => Self::Jcc(Condition::from_iced(other)?),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mov => "MOV",
            Self::Movzx => "MOVZX",
            Self::Movsx => "MOVSX",
            Self::Movsxd => "MOVSXD",
            Self::Lea => "LEA",
            Self::Xchg => "XCHG",
            Self::Push => "PUSH",
            Self::Pop => "POP",
            Self::Nop => "NOP",
            Self::Add => "ADD",
            Self::Adc => "ADC",
            Self::Sub => "SUB",
            Self::Sbb => "SBB",
            Self::Cmp => "CMP",
            Self::Neg => "NEG",
            Self::Inc => "INC",
            Self::Dec => "DEC",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Test => "TEST",
            Self::Not => "NOT",
            Self::Jmp => "JMP",
            Self::Jcc(cond) => cond.mnemonic(),
            Self::Call => "CALL",
            Self::Ret => "RET",
            Self::Hlt => "HLT",
        }
    }
}

/// Per-instruction execution parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeSettings {
    /// Operand width the instruction computes at.
    pub width: Width,
    /// Sign- rather than zero-extend narrower sources.
    pub sign_extend: bool,
}

impl OpcodeSettings {
    pub fn for_instruction(decoded: &DecodedInstruction) -> Self {
        Self {
            width: decoded.width(),
            sign_extend: matches!(decoded.mnemonic(), Mnemonic::Movsx | Mnemonic::Movsxd),
        }
    }
}

/// Where execution continues after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Continue,
    Jump(u64),
    Halt,
}

/// A fully computed, not yet committed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opcode {
    mnemonic: Mnemonic,
    settings: OpcodeSettings,
    commits: Vec<Commit>,
    flags: FlagSet,
    next: Next,
}

impl Opcode {
    /// Reads the operands of `decoded` from `ctx` and computes the instruction's effect.
    pub fn new(
        decoded: &DecodedInstruction,
        ctx: &Context,
        settings: OpcodeSettings,
    ) -> Result<Self, EmuError> {
        let mut op = Self {
            mnemonic: decoded.mnemonic(),
            settings,
            commits: Vec::new(),
            flags: FlagSet::new(),
            next: Next::Continue,
        };

        match op.mnemonic {
            Mnemonic::And | Mnemonic::Or | Mnemonic::Xor | Mnemonic::Test | Mnemonic::Not => {
                bitwise::prepare(&mut op, decoded, ctx)?
            }
            Mnemonic::Add
            | Mnemonic::Adc
            | Mnemonic::Sub
            | Mnemonic::Sbb
            | Mnemonic::Cmp
            | Mnemonic::Neg
            | Mnemonic::Inc
            | Mnemonic::Dec => alu::prepare(&mut op, decoded, ctx)?,
            Mnemonic::Mov
            | Mnemonic::Movzx
            | Mnemonic::Movsx
            | Mnemonic::Movsxd
            | Mnemonic::Lea
            | Mnemonic::Xchg
            | Mnemonic::Push
            | Mnemonic::Pop
            | Mnemonic::Nop => data::prepare(&mut op, decoded, ctx)?,
            Mnemonic::Jmp | Mnemonic::Jcc(_) | Mnemonic::Call | Mnemonic::Ret | Mnemonic::Hlt => {
                branch::prepare(&mut op, decoded, ctx)?
            }
        }
        Ok(op)
    }

    pub fn mnemonic(&self) -> Mnemonic {
        self.mnemonic
    }

    pub fn settings(&self) -> OpcodeSettings {
        self.settings
    }

    /// Pending writes, in commit order.
    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    pub fn flags(&self) -> &FlagSet {
        &self.flags
    }

    pub fn next(&self) -> Next {
        self.next
    }

    /// Value that will be written to the destination, if the instruction writes one.
    pub fn result(&self) -> Option<u64> {
        self.commits.first().map(|commit| commit.value)
    }

    /// Commits the computed effect.
    pub fn execute(self, ctx: &mut Context) -> Next {
        for commit in &self.commits {
            commit.apply(ctx);
        }
        ctx.set_flags(&self.flags);
        self.next
    }

    fn write(&mut self, location: Location, width: Width, value: u64) -> Result<(), EmuError> {
        self.commits.push(location.commit_value(width, value)?);
        Ok(())
    }

    /// Queues a write of `value` to the instruction's destination at the operating width.
    fn write_dest(
        &mut self,
        decoded: &DecodedInstruction,
        ctx: &Context,
        value: u64,
    ) -> Result<(), EmuError> {
        let location = decoded.destination(ctx)?;
        self.write(location, self.settings.width, value)
    }
}

fn operand(decoded: &DecodedInstruction, index: usize) -> Result<&Operand, EmuError> {
    decoded.operands().get(index).ok_or_else(|| {
        EmuError::unsupported(
            decoded.ip(),
            format!("{} is missing operand {index}", decoded.mnemonic().name()),
        )
    })
}
