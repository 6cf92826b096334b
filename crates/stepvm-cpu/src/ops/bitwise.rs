//! `AND`, `OR`, `XOR`, `TEST` and `NOT`.
//!
//! The logic helpers work on little-endian byte slices so they apply to any operand width
//! uniformly: the two operands must have the same length, which is also the result's length.

use crate::context::Context;
use crate::decode::DecodedInstruction;
use crate::error::EmuError;
use crate::flags::{Flag, FlagSet};
use crate::width::decode_le;

use super::{alu::parity, operand, Mnemonic, Opcode};

/// `dest & src` and the resulting flags.
///
/// CF, OF and AF are cleared; ZF, SF and PF follow the result.
pub fn and(dest: &[u8], src: &[u8]) -> Result<(Vec<u8>, FlagSet), EmuError> {
    logic(dest, src, |a, b| a & b)
}

pub fn or(dest: &[u8], src: &[u8]) -> Result<(Vec<u8>, FlagSet), EmuError> {
    logic(dest, src, |a, b| a | b)
}

pub fn xor(dest: &[u8], src: &[u8]) -> Result<(Vec<u8>, FlagSet), EmuError> {
    logic(dest, src, |a, b| a ^ b)
}

/// Bitwise complement. `NOT` leaves every flag alone.
pub fn not(dest: &[u8]) -> Vec<u8> {
    dest.iter().map(|b| !b).collect()
}

/// Flags produced by every two-operand logic instruction.
pub fn logic_flags(result: &[u8]) -> FlagSet {
    let zero = result.iter().all(|&b| b == 0);
    let sign = result.last().is_some_and(|&b| b & 0x80 != 0);
    let low = result.first().copied().unwrap_or(0);
    FlagSet::new()
        .with(Flag::Carry, false)
        .with(Flag::Overflow, false)
        .with(Flag::Auxiliary, false)
        .with(Flag::Zero, zero)
        .with(Flag::Sign, sign)
        .with(Flag::Parity, parity(low))
}

fn logic(
    dest: &[u8],
    src: &[u8],
    f: impl Fn(u8, u8) -> u8,
) -> Result<(Vec<u8>, FlagSet), EmuError> {
    if dest.len() != src.len() {
        let bits = u32::try_from(src.len().saturating_mul(8)).unwrap_or(u32::MAX);
        return Err(EmuError::InvalidOperandWidth { bits });
    }
    let result: Vec<u8> = dest.iter().zip(src).map(|(&a, &b)| f(a, b)).collect();
    let flags = logic_flags(&result);
    Ok((result, flags))
}

pub(super) fn prepare(
    op: &mut Opcode,
    decoded: &DecodedInstruction,
    ctx: &Context,
) -> Result<(), EmuError> {
    let width = op.settings.width;
    let dest = operand(decoded, 0)?.read(ctx, width)?;

    if op.mnemonic == Mnemonic::Not {
        return op.write_dest(decoded, ctx, decode_le(&not(&dest)));
    }

    let src = operand(decoded, 1)?.read(ctx, width)?;
    let (result, flags) = match op.mnemonic {
        Mnemonic::Or => or(&dest, &src)?,
        Mnemonic::Xor => xor(&dest, &src)?,
        _ => and(&dest, &src)?,
    };
    op.flags = flags;
    if op.mnemonic != Mnemonic::Test {
        op.write_dest(decoded, ctx, decode_le(&result))?;
    }
    Ok(())
}
