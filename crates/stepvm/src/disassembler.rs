use std::fmt;

use stepvm_cpu::{Context, ControlUnit, EmuError, ExecMode, RunRequest};
use stepvm_mem::MAIN_SEGMENT;

use crate::handle::Handle;

const CURRENT_MARKER: &str = "←RIP";
const NO_MARKER: &str = "    ";

/// One line of a program listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassembledItem {
    pub address: u64,
    pub text: String,
    /// The live machine's instruction pointer was at `address` when the line was produced.
    pub current: bool,
}

impl fmt::Display for DisassembledItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.current {
            CURRENT_MARKER
        } else {
            NO_MARKER
        };
        write!(
            f,
            "{:#018X} {marker}               {}",
            self.address, self.text
        )
    }
}

/// Builds a static listing by sweeping a private copy of a machine's context.
///
/// The sweep is linear: branches are evaluated but not taken, so every instruction of the
/// program is listed once even when the program loops.
pub struct Disassembler<'a> {
    handle: &'a Handle,
    context: Context,
    control: ControlUnit,
}

impl<'a> Disassembler<'a> {
    pub fn new(handle: &'a Handle) -> Self {
        Self {
            context: handle.clone_context(),
            handle,
            control: ControlUnit::new(ExecMode::Disassemble),
        }
    }

    /// Address the next [`step`](Self::step) will render.
    pub fn position(&self) -> u64 {
        self.context.rip
    }

    /// Renders up to `count` instructions, stopping early at the end of the program.
    pub fn step(&mut self, count: usize) -> Result<Vec<DisassembledItem>, EmuError> {
        let live_ip = self.handle.instruction_pointer();
        let mut items = Vec::new();
        for _ in 0..count {
            let address = self.context.rip;
            let outcome = self.control.run(&mut self.context, RunRequest::step())?;
            let Some(text) = outcome.last_disassembled.filter(|_| outcome.executed > 0) else {
                break;
            };
            items.push(DisassembledItem {
                address,
                text,
                current: address == live_ip,
            });
        }
        Ok(items)
    }

    /// Renders the whole `.main` segment from the entry point.
    pub fn step_all(&mut self) -> Result<Vec<DisassembledItem>, EmuError> {
        let memory = &self.context.memory;
        let end = memory
            .segment(MAIN_SEGMENT)
            .map_or(memory.end(), |segment| segment.range.end);
        self.context.rip = memory.entry_point();

        let mut items = Vec::new();
        while self.context.rip < end {
            let step = self.step(1)?;
            if step.is_empty() {
                break;
            }
            items.extend(step);
        }
        tracing::debug!(instructions = items.len(), "disassembled program");
        Ok(items)
    }
}
