/// Errors returned by [`crate::MemorySpace`] segment management.
///
/// Plain reads and writes never fail: any address that was never written reads back as zero.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("segment {name:?} already exists")]
    DuplicateSegment { name: String },
}
