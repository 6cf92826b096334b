//! Integer arithmetic: `ADD`, `ADC`, `SUB`, `SBB`, `CMP`, `NEG`, `INC`, `DEC`.

use crate::context::Context;
use crate::decode::DecodedInstruction;
use crate::error::EmuError;
use crate::flags::{Flag, FlagSet};
use crate::width::Width;

use super::{operand, Mnemonic, Opcode};

/// Even parity of `byte`, as reported by PF.
pub fn parity(byte: u8) -> bool {
    byte.count_ones() % 2 == 0
}

pub fn add(dest: u64, src: u64, carry_in: bool, width: Width) -> (u64, FlagSet) {
    let mask = width.mask();
    let dest = dest & mask;
    let src = src & mask;
    let full = u128::from(dest) + u128::from(src) + u128::from(carry_in);
    let result = (full as u64) & mask;

    let sb = width.sign_bit();
    let flags = FlagSet::new()
        .with(Flag::Carry, full > u128::from(mask))
        .with(Flag::Zero, result == 0)
        .with(Flag::Sign, result & sb != 0)
        .with(Flag::Overflow, (dest ^ result) & (src ^ result) & sb != 0)
        .with(Flag::Auxiliary, (dest ^ src ^ result) & 0x10 != 0)
        .with(Flag::Parity, parity(result as u8));
    (result, flags)
}

pub fn sub(dest: u64, src: u64, borrow_in: bool, width: Width) -> (u64, FlagSet) {
    let mask = width.mask();
    let dest = dest & mask;
    let src = src & mask;
    let subtrahend = u128::from(src) + u128::from(borrow_in);
    let result = (u128::from(dest).wrapping_sub(subtrahend) as u64) & mask;

    let sb = width.sign_bit();
    let flags = FlagSet::new()
        .with(Flag::Carry, u128::from(dest) < subtrahend)
        .with(Flag::Zero, result == 0)
        .with(Flag::Sign, result & sb != 0)
        .with(Flag::Overflow, (dest ^ src) & (dest ^ result) & sb != 0)
        .with(Flag::Auxiliary, (dest ^ src ^ result) & 0x10 != 0)
        .with(Flag::Parity, parity(result as u8));
    (result, flags)
}

pub(super) fn prepare(
    op: &mut Opcode,
    decoded: &DecodedInstruction,
    ctx: &Context,
) -> Result<(), EmuError> {
    let width = op.settings.width;
    let dest = operand(decoded, 0)?.value(ctx, width)?;

    let (result, flags) = match op.mnemonic {
        Mnemonic::Inc => {
            let (result, flags) = add(dest, 1, false, width);
            (result, flags.without(Flag::Carry))
        }
        Mnemonic::Dec => {
            let (result, flags) = sub(dest, 1, false, width);
            (result, flags.without(Flag::Carry))
        }
        Mnemonic::Neg => sub(0, dest, false, width),
        mnemonic => {
            let src = operand(decoded, 1)?.value(ctx, width)?;
            let carry = ctx.flag(Flag::Carry);
            match mnemonic {
                Mnemonic::Add => add(dest, src, false, width),
                Mnemonic::Adc => add(dest, src, carry, width),
                Mnemonic::Sbb => sub(dest, src, carry, width),
                _ => sub(dest, src, false, width),
            }
        }
    };

    op.flags = flags;
    if op.mnemonic != Mnemonic::Cmp {
        op.write_dest(decoded, ctx, result)?;
    }
    Ok(())
}
