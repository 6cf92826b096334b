use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use stepvm_cpu::Context;

use crate::error::VmError;

type Job = Box<dyn FnOnce(&ContextLock) + Send + 'static>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Shared {
    context: Mutex<Context>,
    ip: AtomicU64,
    breakpoints: Mutex<Vec<u64>>,
    closing: AtomicBool,
}

impl Shared {
    fn publish(&self, ctx: &Context) {
        self.ip.store(ctx.rip, Ordering::Release);
        let mut published = lock(&self.breakpoints);
        if !published.iter().eq(ctx.breakpoints.iter()) {
            *published = ctx.breakpoints.iter().copied().collect();
        }
    }
}

/// Cheap copy of the fields that are safe to poll while the machine runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShallowContext {
    pub instruction_pointer: u64,
    pub breakpoints: Vec<u64>,
}

/// Access to the live context, handed to jobs running on the execution thread.
pub struct ContextLock {
    shared: Arc<Shared>,
}

impl ContextLock {
    /// Runs `f` with exclusive access to the context.
    ///
    /// Hold this for one instruction at a time: snapshot readers wait on the same lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut Context) -> R) -> R {
        let mut ctx = lock(&self.shared.context);
        let result = f(&mut ctx);
        self.shared.publish(&ctx);
        result
    }

    /// Set once the owning [`Handle`] is being dropped. Long-running jobs stop at the next
    /// instruction boundary.
    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }
}

/// Single-owner execution thread around one live [`Context`].
///
/// Jobs are processed one at a time in submission order. Snapshot reads
/// ([`Handle::clone_context`], [`Handle::shallow_copy`]) do not go through the queue.
///
/// Dropping the handle closes the queue, asks a running job to stop at the next instruction
/// boundary, and joins the worker.
pub struct Handle {
    name: String,
    shared: Arc<Shared>,
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Handle {
    pub fn spawn(name: impl Into<String>, context: Context) -> Result<Self, VmError> {
        let name = name.into();
        let shared = Arc::new(Shared {
            ip: AtomicU64::new(context.rip),
            breakpoints: Mutex::new(context.breakpoints.iter().copied().collect()),
            closing: AtomicBool::new(false),
            context: Mutex::new(context),
        });

        let (sender, receiver) = mpsc::channel::<Job>();
        let worker_lock = ContextLock {
            shared: Arc::clone(&shared),
        };
        let worker = thread::Builder::new()
            .name(format!("stepvm-{name}"))
            .spawn(move || worker_loop(worker_lock, receiver))
            .map_err(VmError::Spawn)?;
        tracing::trace!(vm = %name, "execution thread started");

        Ok(Self {
            name,
            shared,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `job` without waiting for it.
    pub fn submit(&self, job: impl FnOnce(&ContextLock) + Send + 'static) -> Result<(), VmError> {
        let sender = self.sender.as_ref().ok_or(VmError::WorkerGone)?;
        sender.send(Box::new(job)).map_err(|_| VmError::WorkerGone)
    }

    /// Runs `op` on the execution thread and waits for its result.
    ///
    /// Must not be called from a job or event listener running on the execution thread itself.
    pub fn invoke<R, F>(&self, op: F) -> Result<R, VmError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Context) -> R + Send + 'static,
    {
        let (reply, result) = mpsc::sync_channel(1);
        self.submit(move |lock| {
            let value = lock.with(op);
            let _ = reply.send(value);
        })?;
        result.recv().map_err(|_| VmError::WorkerGone)
    }

    /// Applies `f` to the live context between two instructions, without queueing.
    ///
    /// Reserved for breakpoint edits; everything else goes through [`Handle::invoke`].
    pub fn update<R>(&self, f: impl FnOnce(&mut Context) -> R) -> R {
        let mut ctx = lock(&self.shared.context);
        let result = f(&mut ctx);
        self.shared.publish(&ctx);
        result
    }

    /// Deep copy of the live context.
    ///
    /// Waits only for the instruction in flight, never for queued jobs.
    pub fn clone_context(&self) -> Context {
        lock(&self.shared.context).deep_copy()
    }

    /// Deep copy taken on the execution thread, after every job queued before it.
    pub fn fetch_context(&self) -> Result<Context, VmError> {
        self.invoke(|ctx| ctx.deep_copy())
    }

    pub fn shallow_copy(&self) -> ShallowContext {
        ShallowContext {
            instruction_pointer: self.instruction_pointer(),
            breakpoints: lock(&self.shared.breakpoints).clone(),
        }
    }

    /// Instruction pointer as of the last completed instruction.
    pub fn instruction_pointer(&self) -> u64 {
        self.shared.ip.load(Ordering::Acquire)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::Release);
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!(vm = %self.name, "execution thread panicked");
            }
        }
    }
}

fn worker_loop(lock: ContextLock, receiver: mpsc::Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(&lock))) {
            tracing::error!(
                panic = panic_message(payload.as_ref()),
                "queued operation panicked"
            );
        }
    }
    tracing::trace!("execution thread exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic>"
    }
}
