use crate::context::Context;
use crate::decode::{DecodedInstruction, Location, Operand};
use crate::error::EmuError;
use crate::flags::RFlags;
use crate::regs::{Gpr, Register};
use crate::width::Width;

use super::{operand, Mnemonic, Next, Opcode};

/// The sixteen `Jcc` conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    O,
    No,
    B,
    Ae,
    E,
    Ne,
    Be,
    A,
    S,
    Ns,
    P,
    Np,
    L,
    Ge,
    Le,
    G,
}

impl Condition {
    pub(super) fn from_iced(mnemonic: iced_x86::Mnemonic) -> Option<Self> {
        use iced_x86::Mnemonic as M;
        Some(match mnemonic {
            M::Jo => Self::O,
            M::Jno => Self::No,
            M::Jb => Self::B,
            M::Jae => Self::Ae,
            M::Je => Self::E,
            M::Jne => Self::Ne,
            M::Jbe => Self::Be,
            M::Ja => Self::A,
            M::Js => Self::S,
            M::Jns => Self::Ns,
            M::Jp => Self::P,
            M::Jnp => Self::Np,
            M::Jl => Self::L,
            M::Jge => Self::Ge,
            M::Jle => Self::Le,
            M::Jg => Self::G,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::O => "JO",
            Self::No => "JNO",
            Self::B => "JB",
            Self::Ae => "JAE",
            Self::E => "JE",
            Self::Ne => "JNE",
            Self::Be => "JBE",
            Self::A => "JA",
            Self::S => "JS",
            Self::Ns => "JNS",
            Self::P => "JP",
            Self::Np => "JNP",
            Self::L => "JL",
            Self::Ge => "JGE",
            Self::Le => "JLE",
            Self::G => "JG",
        }
    }

    pub fn eval(self, rflags: RFlags) -> bool {
        let cf = rflags.contains(RFlags::CF);
        let pf = rflags.contains(RFlags::PF);
        let zf = rflags.contains(RFlags::ZF);
        let sf = rflags.contains(RFlags::SF);
        let of = rflags.contains(RFlags::OF);
        match self {
            Self::O => of,
            Self::No => !of,
            Self::B => cf,
            Self::Ae => !cf,
            Self::E => zf,
            Self::Ne => !zf,
            Self::Be => cf || zf,
            Self::A => !cf && !zf,
            Self::S => sf,
            Self::Ns => !sf,
            Self::P => pf,
            Self::Np => !pf,
            Self::L => sf != of,
            Self::Ge => sf == of,
            Self::Le => zf || sf != of,
            Self::G => !zf && sf == of,
        }
    }
}

const RSP: Register = Register::qword(Gpr::Rsp);

pub(super) fn prepare(
    op: &mut Opcode,
    decoded: &DecodedInstruction,
    ctx: &Context,
) -> Result<(), EmuError> {
    match op.mnemonic {
        Mnemonic::Hlt => op.next = Next::Halt,
        Mnemonic::Jmp => op.next = Next::Jump(target(decoded, ctx)?),
        Mnemonic::Jcc(cond) => {
            let target = target(decoded, ctx)?;
            if cond.eval(ctx.rflags) {
                op.next = Next::Jump(target);
            }
        }
        Mnemonic::Call => {
            let target = target(decoded, ctx)?;
            let rsp = ctx.gpr(Gpr::Rsp).wrapping_sub(8);
            op.write(Location::Memory(rsp), Width::Qword, decoded.next_ip())?;
            op.write(Location::Register(RSP), Width::Qword, rsp)?;
            op.next = Next::Jump(target);
        }
        Mnemonic::Ret => {
            let rsp = ctx.gpr(Gpr::Rsp);
            let release = match decoded.dest() {
                Some(imm) => imm.value(ctx, Width::Word)?,
                None => 0,
            };
            let return_ip = ctx.read_memory(rsp, Width::Qword);
            op.write(
                Location::Register(RSP),
                Width::Qword,
                rsp.wrapping_add(8).wrapping_add(release),
            )?;
            op.next = Next::Jump(return_ip);
        }
        other => {
            return Err(EmuError::unsupported(
                decoded.ip(),
                format!("{} is not a control transfer", other.name()),
            ))
        }
    }
    Ok(())
}

fn target(decoded: &DecodedInstruction, ctx: &Context) -> Result<u64, EmuError> {
    match operand(decoded, 0)? {
        Operand::Relative(target) => Ok(*target),
        indirect => indirect.value(ctx, Width::Qword),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{Flag, FlagSet};
    use crate::ops::OpcodeSettings;

    fn flags(pairs: &[(Flag, bool)]) -> RFlags {
        let mut rflags = RFlags::default();
        let update = pairs
            .iter()
            .fold(FlagSet::new(), |set, &(flag, value)| set.with(flag, value));
        update.apply(&mut rflags);
        rflags
    }

    #[test]
    fn signed_conditions_compare_sign_and_overflow() {
        let less = flags(&[(Flag::Sign, true), (Flag::Overflow, false)]);
        assert!(Condition::L.eval(less));
        assert!(!Condition::Ge.eval(less));
        assert!(Condition::Le.eval(less));
        assert!(!Condition::G.eval(less));

        let equal = flags(&[(Flag::Zero, true)]);
        assert!(Condition::Le.eval(equal));
        assert!(Condition::Ge.eval(equal));
        assert!(!Condition::G.eval(equal));
    }

    #[test]
    fn unsigned_conditions_use_carry_and_zero() {
        let below = flags(&[(Flag::Carry, true)]);
        assert!(Condition::B.eval(below));
        assert!(Condition::Be.eval(below));
        assert!(!Condition::A.eval(below));
        assert!(Condition::A.eval(RFlags::default()));
        assert!(Condition::Ae.eval(RFlags::default()));
    }

    #[test]
    fn call_pushes_return_address_and_ret_pops_it() {
        let mut ctx = Context::default();
        ctx.set_gpr(Gpr::Rsp, 0x8000);

        // call +0x10 at 0x100
        let call = DecodedInstruction::decode(&[0xE8, 0x10, 0x00, 0x00, 0x00], 0x100).unwrap();
        let op = Opcode::new(&call, &ctx, OpcodeSettings::for_instruction(&call)).unwrap();
        assert_eq!(op.execute(&mut ctx), Next::Jump(0x115));
        assert_eq!(ctx.gpr(Gpr::Rsp), 0x7ff8);
        assert_eq!(ctx.read_memory(0x7ff8, Width::Qword), 0x105);

        let ret = DecodedInstruction::decode(&[0xC3], 0x115).unwrap();
        let op = Opcode::new(&ret, &ctx, OpcodeSettings::for_instruction(&ret)).unwrap();
        assert_eq!(op.execute(&mut ctx), Next::Jump(0x105));
        assert_eq!(ctx.gpr(Gpr::Rsp), 0x8000);
    }
}
