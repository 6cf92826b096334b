use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::decode::DecodedInstruction;
use crate::error::EmuError;
use crate::flags::FlagSet;
use crate::ops::{Next, Opcode, OpcodeSettings};
use crate::regs::{Gpr, Register};
use crate::width::Width;

/// Where the control unit is in its fetch/execute cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CuState {
    Idle,
    Fetching,
    Executing,
    /// Stopped on the breakpoint at this address.
    Paused(u64),
    /// Ran off the end of the program or executed `HLT`.
    ///
    /// After `HLT` the instruction pointer is past it, so the next request resumes there. Past the
    /// end of the program every request is a no-op.
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Normal execution.
    Execute,
    /// Linear sweep: every instruction is evaluated but control transfers fall through and `HLT`
    /// does not stop the run.
    Disassemble,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StopReason {
    Stepped,
    Breakpoint { rip: u64 },
    EndOfMemory,
    Halted,
    LimitReached,
}

/// Parameters of one run segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub single_step: bool,
    /// Maximum instructions to execute before stopping with [`StopReason::LimitReached`].
    pub limit: Option<u64>,
}

impl RunRequest {
    pub fn step() -> Self {
        Self {
            single_step: true,
            limit: None,
        }
    }

    pub fn run() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }
}

/// Summary of a finished run segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub stop: StopReason,
    pub executed: u64,
    /// Instruction pointer after the run.
    pub ip: u64,
    pub last_disassembled: Option<String>,
}

/// One executed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retired {
    pub ip: u64,
    pub text: String,
    pub next_ip: u64,
    halted: bool,
}

/// Drives the fetch/decode/execute cycle over a [`Context`].
///
/// A run segment is started with [`ControlUnit::begin`] and advanced one instruction at a time
/// with [`ControlUnit::cycle`], which lets a caller hold the context lock for a single
/// instruction only. [`ControlUnit::run`] does both in one call.
///
/// After every instruction the stop conditions are checked in order: `HLT`, end of memory,
/// single-step, breakpoint at the new instruction pointer, instruction limit.
#[derive(Debug, Clone)]
pub struct ControlUnit {
    mode: ExecMode,
    state: CuState,
    request: RunRequest,
    executed: u64,
    last: Option<Retired>,
}

impl Default for ControlUnit {
    fn default() -> Self {
        Self::new(ExecMode::Execute)
    }
}

impl ControlUnit {
    pub fn new(mode: ExecMode) -> Self {
        Self {
            mode,
            state: CuState::Idle,
            request: RunRequest::default(),
            executed: 0,
            last: None,
        }
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn state(&self) -> CuState {
        self.state
    }

    /// The most recently executed instruction.
    pub fn last_retired(&self) -> Option<&Retired> {
        self.last.as_ref()
    }

    /// Returns the unit to `Idle`, forgetting the last run.
    pub fn reset(&mut self) {
        self.state = CuState::Idle;
        self.executed = 0;
        self.last = None;
    }

    pub fn begin(&mut self, request: RunRequest) {
        self.request = request;
        self.executed = 0;
        self.last = None;
        self.state = CuState::Fetching;
    }

    /// Executes one instruction of the current run segment.
    ///
    /// Returns `Some` once the segment has stopped. Calling this on a unit that is not mid-run
    /// starts a new segment with the previous request.
    pub fn cycle(&mut self, ctx: &mut Context) -> Result<Option<RunOutcome>, EmuError> {
        if self.state != CuState::Fetching {
            self.begin(self.request);
        }

        if self.executed == 0 && ctx.rip >= ctx.memory.end() {
            return Ok(Some(self.finish(ctx, StopReason::EndOfMemory)));
        }

        let retired = match self.execute_one(ctx) {
            Ok(retired) => retired,
            Err(err) => {
                tracing::warn!(ip = %format_args!("{:#x}", ctx.rip), %err, "instruction failed");
                self.state = CuState::Idle;
                return Err(err);
            }
        };
        let halted = retired.halted;
        self.executed += 1;
        self.last = Some(retired);

        let stop = if halted {
            Some(StopReason::Halted)
        } else if ctx.rip >= ctx.memory.end() {
            Some(StopReason::EndOfMemory)
        } else if self.request.single_step {
            Some(StopReason::Stepped)
        } else if self.mode == ExecMode::Execute && ctx.is_breakpoint(ctx.rip) {
            Some(StopReason::Breakpoint { rip: ctx.rip })
        } else if self.request.limit.is_some_and(|limit| self.executed >= limit) {
            Some(StopReason::LimitReached)
        } else {
            None
        };
        Ok(stop.map(|stop| self.finish(ctx, stop)))
    }

    /// Runs a whole segment.
    pub fn run(&mut self, ctx: &mut Context, request: RunRequest) -> Result<RunOutcome, EmuError> {
        self.begin(request);
        loop {
            if let Some(outcome) = self.cycle(ctx)? {
                return Ok(outcome);
            }
        }
    }

    /// Decodes the instruction at the current instruction pointer without executing it.
    pub fn decode(ctx: &Context) -> Result<DecodedInstruction, EmuError> {
        DecodedInstruction::decode_at(ctx)
    }

    /// All sixteen general purpose registers at `width`, in hardware order.
    pub fn fetch_all(ctx: &Context, width: Width) -> Vec<(Register, u64)> {
        Gpr::ALL
            .iter()
            .map(|&gpr| {
                let reg = Register::new(gpr, width);
                (reg, ctx.read_register(reg))
            })
            .collect()
    }

    pub fn set_flags(ctx: &mut Context, update: &FlagSet) {
        ctx.set_flags(update);
    }

    fn execute_one(&mut self, ctx: &mut Context) -> Result<Retired, EmuError> {
        self.state = CuState::Fetching;
        let decoded = DecodedInstruction::decode_at(ctx)?;

        self.state = CuState::Executing;
        let settings = OpcodeSettings::for_instruction(&decoded);
        let opcode = Opcode::new(&decoded, ctx, settings)?;
        let text = decoded.disassemble(settings.width);

        let next = opcode.execute(ctx);
        let (next_ip, halted) = match (self.mode, next) {
            (ExecMode::Execute, Next::Jump(target)) => (target, false),
            (ExecMode::Execute, Next::Halt) => (decoded.next_ip(), true),
            _ => (decoded.next_ip(), false),
        };
        ctx.rip = next_ip;
        self.state = CuState::Fetching;

        tracing::debug!(
            ip = %format_args!("{:#x}", decoded.ip()),
            next_ip = %format_args!("{next_ip:#x}"),
            %text,
            "executed"
        );
        Ok(Retired {
            ip: decoded.ip(),
            text,
            next_ip,
            halted,
        })
    }

    fn finish(&mut self, ctx: &Context, stop: StopReason) -> RunOutcome {
        self.state = match stop {
            StopReason::Breakpoint { rip } => CuState::Paused(rip),
            StopReason::EndOfMemory | StopReason::Halted => CuState::Halted,
            StopReason::Stepped | StopReason::LimitReached => CuState::Idle,
        };
        tracing::trace!(?stop, executed = self.executed, "run segment finished");
        RunOutcome {
            stop,
            executed: self.executed,
            ip: ctx.rip,
            last_disassembled: self.last.as_ref().map(|retired| retired.text.clone()),
        }
    }
}
