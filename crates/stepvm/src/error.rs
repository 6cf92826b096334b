use stepvm_cpu::EmuError;
use stepvm_mem::MemoryError;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error(transparent)]
    Emu(#[from] EmuError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// The execution thread stopped, or the queued operation panicked before replying.
    #[error("execution thread is gone")]
    WorkerGone,
    #[error("failed to spawn execution thread")]
    Spawn(#[source] std::io::Error),
}
