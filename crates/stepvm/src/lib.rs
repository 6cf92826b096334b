//! Step-debugger front-end API over the stepvm CPU.
//!
//! A [`Vm`] owns one virtual machine: a [`Handle`] whose worker thread is the only place the live
//! [`Context`] is mutated, the [`ControlUnit`] driving it, and the configuration it was built
//! with. Inspection always works off deep copies ([`Handle::clone_context`]) or the cheap
//! [`ShallowContext`]; a [`Disassembler`] renders a static listing from its own copy.

#![forbid(unsafe_code)]

mod config;
mod disassembler;
mod error;
mod handle;
pub mod programs;
mod vm;

pub use config::VmConfig;
pub use disassembler::{DisassembledItem, Disassembler};
pub use error::VmError;
pub use handle::{ContextLock, Handle, ShallowContext};
pub use vm::{RunReport, Vm, VmEvent};

pub use stepvm_cpu::{
    Context, ControlUnit, EmuError, Flag, Gpr, StopReason, Width, WriteRule,
};
pub use stepvm_mem::{MemoryError, MemorySpace, DEFAULT_STACK_BASE};
