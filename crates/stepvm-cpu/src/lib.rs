//! Virtual x86-64 CPU for the stepvm debugger.
//!
//! The crate is organised leaves-first:
//! - [`regs`], [`flags`] and [`context`] hold the architectural state ([`Context`]), which owns its
//!   [`stepvm_mem::MemorySpace`] and is deep-copied by `Clone`.
//! - [`decode`] turns instruction bytes into a [`DecodedInstruction`], an addressing-mode-resolved
//!   capability object (disassemble / fetch / set).
//! - [`ops`] computes an [`Opcode`] from a decoded instruction without touching the context, and
//!   commits it on [`Opcode::execute`].
//! - [`control`] drives fetch/decode/execute with run, single-step and breakpoint handling.

#![forbid(unsafe_code)]

pub mod context;
pub mod control;
pub mod decode;
mod error;
pub mod flags;
pub mod ops;
pub mod regs;
mod width;

pub use context::Context;
pub use control::{ControlUnit, CuState, ExecMode, Retired, RunOutcome, RunRequest, StopReason};
pub use decode::{DecodedInstruction, Location, MemoryOperand, Operand};
pub use error::EmuError;
pub use flags::{Flag, FlagSet, RFlags};
pub use ops::{Condition, Mnemonic, Next, Opcode, OpcodeSettings};
pub use regs::{Gpr, Register, RegisterFile, WriteRule};
pub use width::{decode_le, Width};
