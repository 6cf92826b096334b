//! Sparse guest memory for the stepvm emulator.
//!
//! A [`MemorySpace`] behaves like a flat, zero-initialized 64-bit address space while only
//! storing the bytes that are actually non-zero. On top of the byte store it keeps:
//! - a [`RangeTable`] of every address interval that has been written through the public write
//!   path, merged and non-overlapping, so front ends can render "touched" memory cheaply, and
//! - named [`Segment`]s (`.main`, `.stack`, ...). Segments are descriptive only; writes outside any
//!   segment are legal.

#![forbid(unsafe_code)]

mod error;
mod range;
mod space;

pub use error::MemoryError;
pub use range::{AddressRange, RangeTable};
pub use space::{MemorySpace, Segment, DEFAULT_STACK_BASE, MAIN_SEGMENT, STACK_SEGMENT};
