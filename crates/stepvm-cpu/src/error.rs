/// Failures that abort the in-flight instruction.
///
/// None of these leave the [`crate::Context`] partially mutated: decoding and operand resolution
/// happen before anything is committed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmuError {
    #[error("unknown opcode at {ip:#x} (bytes {bytes:02x?})")]
    UnknownOpcode { ip: u64, bytes: Vec<u8> },
    #[error("invalid operand width: {bits} bits")]
    InvalidOperandWidth { bits: u32 },
    #[error("unsupported addressing mode at {ip:#x}: {detail}")]
    UnsupportedAddressingMode { ip: u64, detail: String },
}

impl EmuError {
    pub(crate) fn unsupported(ip: u64, detail: impl Into<String>) -> Self {
        Self::UnsupportedAddressingMode {
            ip,
            detail: detail.into(),
        }
    }
}
