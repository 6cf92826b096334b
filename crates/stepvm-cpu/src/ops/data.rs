use crate::context::Context;
use crate::decode::{DecodedInstruction, Location, Operand};
use crate::error::EmuError;
use crate::regs::{Gpr, Register};
use crate::width::Width;

use super::{operand, Mnemonic, Opcode};

pub(super) fn prepare(
    op: &mut Opcode,
    decoded: &DecodedInstruction,
    ctx: &Context,
) -> Result<(), EmuError> {
    let width = op.settings.width;
    match op.mnemonic {
        Mnemonic::Nop => {}
        Mnemonic::Mov => {
            let value = operand(decoded, 1)?.value(ctx, width)?;
            op.write_dest(decoded, ctx, value)?;
        }
        Mnemonic::Movzx | Mnemonic::Movsx | Mnemonic::Movsxd => {
            let src = operand(decoded, 1)?;
            let src_width = src.width();
            let mut value = src.value(ctx, src_width)?;
            if op.settings.sign_extend {
                value = src_width.sign_extend(value);
            }
            op.write_dest(decoded, ctx, value)?;
        }
        Mnemonic::Lea => match operand(decoded, 1)? {
            Operand::Memory(mem) => op.write_dest(decoded, ctx, mem.address(ctx))?,
            _ => {
                return Err(EmuError::unsupported(
                    decoded.ip(),
                    "LEA source must be a memory operand",
                ))
            }
        },
        Mnemonic::Xchg => {
            let first = operand(decoded, 0)?;
            let second = operand(decoded, 1)?;
            let a = first.value(ctx, width)?;
            let b = second.value(ctx, width)?;
            op.write(first.locate(ctx, decoded.ip())?, width, b)?;
            op.write(second.locate(ctx, decoded.ip())?, width, a)?;
        }
        Mnemonic::Push => {
            let value = operand(decoded, 0)?.value(ctx, width)?;
            let rsp = ctx.gpr(Gpr::Rsp).wrapping_sub(width.bytes() as u64);
            op.write(Location::Memory(rsp), width, value)?;
            op.write(stack_pointer(), Width::Qword, rsp)?;
        }
        Mnemonic::Pop => {
            let rsp = ctx.gpr(Gpr::Rsp);
            let value = ctx.read_memory(rsp, width);
            op.write(
                stack_pointer(),
                Width::Qword,
                rsp.wrapping_add(width.bytes() as u64),
            )?;
            // Written last so `pop rsp` ends up with the popped value.
            op.write_dest(decoded, ctx, value)?;
        }
        other => {
            return Err(EmuError::unsupported(
                decoded.ip(),
                format!("{} is not a data movement instruction", other.name()),
            ))
        }
    }
    Ok(())
}

fn stack_pointer() -> Location {
    Location::Register(Register::qword(Gpr::Rsp))
}
