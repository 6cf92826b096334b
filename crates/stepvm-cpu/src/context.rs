use std::collections::BTreeSet;

use stepvm_mem::MemorySpace;

use crate::flags::{Flag, FlagSet, RFlags};
use crate::regs::{Gpr, Register, RegisterFile, WriteRule};
use crate::width::{decode_le, Width};

/// Complete architectural state of one virtual machine.
///
/// The context owns its memory; `Clone` (and [`Context::deep_copy`]) produce a fully independent
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub registers: RegisterFile,
    pub rflags: RFlags,
    pub rip: u64,
    pub memory: MemorySpace,
    pub breakpoints: BTreeSet<u64>,
}

impl Context {
    /// Fresh state over `memory`: registers and flags cleared, `rip` at the entry point.
    pub fn new(memory: MemorySpace) -> Self {
        Self::with_rule(memory, WriteRule::default())
    }

    pub fn with_rule(memory: MemorySpace, rule: WriteRule) -> Self {
        Self {
            registers: RegisterFile::new(rule),
            rflags: RFlags::default(),
            rip: memory.entry_point(),
            memory,
            breakpoints: BTreeSet::new(),
        }
    }

    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    pub fn gpr(&self, gpr: Gpr) -> u64 {
        self.registers.gpr(gpr)
    }

    pub fn set_gpr(&mut self, gpr: Gpr, value: u64) {
        self.registers.set_gpr(gpr, value);
    }

    pub fn read_register(&self, reg: Register) -> u64 {
        self.registers.read(reg)
    }

    pub fn write_register(&mut self, reg: Register, value: u64) {
        self.registers.write(reg, value);
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.rflags.contains(flag.bit())
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        self.rflags.set(flag.bit(), value);
    }

    pub fn set_flags(&mut self, update: &FlagSet) {
        update.apply(&mut self.rflags);
    }

    /// Every modelled flag with its current value.
    pub fn flags(&self) -> Vec<(Flag, bool)> {
        Flag::ALL.iter().map(|&f| (f, self.flag(f))).collect()
    }

    pub fn read_memory(&self, addr: u64, width: Width) -> u64 {
        decode_le(&self.memory.read_bytes(addr, width.bytes()))
    }

    pub fn write_memory(&mut self, addr: u64, width: Width, value: u64) {
        self.memory.write_range(addr, &width.encode(value));
    }

    /// Returns `false` if the breakpoint was already set.
    pub fn add_breakpoint(&mut self, addr: u64) -> bool {
        self.breakpoints.insert(addr)
    }

    pub fn remove_breakpoint(&mut self, addr: u64) -> bool {
        self.breakpoints.remove(&addr)
    }

    pub fn is_breakpoint(&self, addr: u64) -> bool {
        self.breakpoints.contains(&addr)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(MemorySpace::default())
    }
}
