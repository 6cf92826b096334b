use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use stepvm_cpu::{Context, ControlUnit, Gpr, RunOutcome, RunRequest, Width};
use stepvm_mem::MemorySpace;
use tokio::sync::oneshot;

use crate::config::VmConfig;
use crate::disassembler::{DisassembledItem, Disassembler};
use crate::error::VmError;
use crate::handle::{lock, ContextLock, Handle, ShallowContext};

/// Result of one `run`/`step` request.
pub type RunReport = RunOutcome;

/// Notifications delivered to [`Vm::subscribe`] listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmEvent {
    RunFinished(RunReport),
    RunFailed(String),
    /// The full, sorted breakpoint list after a change.
    BreakpointsChanged(Vec<u64>),
}

type Listener = Arc<dyn Fn(&VmEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    inner: Mutex<Vec<Listener>>,
}

impl Listeners {
    fn notify(&self, event: &VmEvent) {
        // Listeners may subscribe from inside a callback.
        let listeners: Vec<Listener> = lock(&self.inner).clone();
        for listener in listeners {
            listener(event);
        }
    }
}

/// One virtual machine: a live context on its own execution thread plus the control unit that
/// drives it.
pub struct Vm {
    config: VmConfig,
    initial: Context,
    handle: Handle,
    control: Arc<Mutex<ControlUnit>>,
    listeners: Arc<Listeners>,
}

impl Vm {
    pub fn new(image: &[u8]) -> Result<Self, VmError> {
        Self::with_config(image, VmConfig::default())
    }

    /// Loads `image` as `.main` at address 0 with `.stack` at `config.stack_base`.
    pub fn with_config(image: &[u8], config: VmConfig) -> Result<Self, VmError> {
        let memory = MemorySpace::with_stack_base(image, config.stack_base);
        let mut initial = Context::with_rule(memory, config.write_rule);
        initial.set_gpr(Gpr::Rsp, config.stack_base);
        initial.set_gpr(Gpr::Rbp, config.stack_base);

        let handle = Handle::spawn(config.name.clone(), initial.deep_copy())?;
        tracing::info!(
            vm = %config.name,
            image_len = image.len(),
            stack_base = %format_args!("{:#x}", config.stack_base),
            "virtual machine created"
        );
        Ok(Self {
            config,
            initial,
            handle,
            control: Arc::new(Mutex::new(ControlUnit::default())),
            listeners: Arc::default(),
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Queues a run segment (`step = true` executes exactly one instruction).
    ///
    /// The request is queued immediately; the returned future only waits for the result, so it
    /// may be dropped without cancelling the run.
    pub fn run(&self, step: bool) -> impl Future<Output = Result<RunReport, VmError>> + Send {
        let request = if step {
            RunRequest::step()
        } else {
            RunRequest::run().with_limit(self.config.run_limit)
        };
        let control = Arc::clone(&self.control);
        let listeners = Arc::clone(&self.listeners);
        let (reply, report) = oneshot::channel();

        let submitted = self.handle.submit(move |ctx| {
            let result = run_segment(ctx, &control, request);
            let event = match &result {
                Ok(report) => VmEvent::RunFinished(report.clone()),
                Err(err) => VmEvent::RunFailed(err.to_string()),
            };
            listeners.notify(&event);
            let _ = reply.send(result);
        });

        async move {
            if let Err(err) = submitted {
                return Err(err);
            }
            match report.await {
                Ok(result) => result,
                Err(_) => Err(VmError::WorkerGone),
            }
        }
    }

    pub fn run_blocking(&self, step: bool) -> Result<RunReport, VmError> {
        pollster::block_on(self.run(step))
    }

    /// Restores the post-construction state, keeping the breakpoints.
    pub fn reset(&self) -> Result<(), VmError> {
        let initial = self.initial.deep_copy();
        let control = Arc::clone(&self.control);
        self.handle.invoke(move |ctx| {
            let breakpoints = std::mem::take(&mut ctx.breakpoints);
            *ctx = initial;
            ctx.breakpoints = breakpoints;
            lock(&control).reset();
        })?;
        tracing::debug!(vm = %self.config.name, "reset");
        Ok(())
    }

    /// `"IP"` followed by the sixteen general purpose registers at `width`, from one snapshot.
    pub fn registers(&self, width: Width) -> Vec<(&'static str, u64)> {
        let ctx = self.handle.clone_context();
        std::iter::once(("IP", ctx.rip))
            .chain(
                ControlUnit::fetch_all(&ctx, width)
                    .into_iter()
                    .map(|(reg, value)| (reg.name(), value)),
            )
            .collect()
    }

    pub fn flags(&self) -> Vec<(&'static str, bool)> {
        self.handle
            .clone_context()
            .flags()
            .into_iter()
            .map(|(flag, set)| (flag.name(), set))
            .collect()
    }

    /// Every non-zero byte of memory.
    pub fn memory(&self) -> BTreeMap<u64, u8> {
        self.handle.clone_context().memory.to_map()
    }

    pub fn instruction_pointer(&self) -> u64 {
        self.handle.instruction_pointer()
    }

    /// Deep copy of the live context.
    pub fn context(&self) -> Context {
        self.handle.clone_context()
    }

    pub fn shallow_copy(&self) -> ShallowContext {
        self.handle.shallow_copy()
    }

    /// Returns `false` if a breakpoint was already set at `addr`.
    pub fn add_breakpoint(&self, addr: u64) -> bool {
        self.edit_breakpoints(|ctx| ctx.add_breakpoint(addr))
    }

    /// Returns `false` if no breakpoint was set at `addr`.
    pub fn remove_breakpoint(&self, addr: u64) -> bool {
        self.edit_breakpoints(|ctx| ctx.remove_breakpoint(addr))
    }

    /// Sorted breakpoint addresses.
    pub fn breakpoints(&self) -> Vec<u64> {
        self.handle.shallow_copy().breakpoints
    }

    pub fn subscribe(&self, listener: impl Fn(&VmEvent) + Send + Sync + 'static) {
        lock(&self.listeners.inner).push(Arc::new(listener));
    }

    /// Listing of the whole `.main` segment.
    pub fn disassemble_all(&self) -> Result<Vec<DisassembledItem>, VmError> {
        Ok(Disassembler::new(&self.handle).step_all()?)
    }

    fn edit_breakpoints(&self, edit: impl FnOnce(&mut Context) -> bool) -> bool {
        let (changed, breakpoints) = self.handle.update(|ctx| {
            let changed = edit(ctx);
            (changed, ctx.breakpoints.iter().copied().collect::<Vec<_>>())
        });
        if changed {
            self.listeners.notify(&VmEvent::BreakpointsChanged(breakpoints));
        }
        changed
    }
}

/// Drives one segment, taking the context lock for one instruction at a time.
fn run_segment(
    ctx: &ContextLock,
    control: &Mutex<ControlUnit>,
    request: RunRequest,
) -> Result<RunReport, VmError> {
    let mut control = lock(control);
    control.begin(request);
    loop {
        if ctx.is_closing() {
            control.reset();
            tracing::debug!("run abandoned, execution thread shutting down");
            return Err(VmError::WorkerGone);
        }
        if let Some(outcome) = ctx.with(|ctx| control.cycle(ctx))? {
            tracing::info!(
                stop = ?outcome.stop,
                executed = outcome.executed,
                ip = %format_args!("{:#x}", outcome.ip),
                "run finished"
            );
            return Ok(outcome);
        }
    }
}
