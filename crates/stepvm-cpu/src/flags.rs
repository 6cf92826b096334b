use bitflags::bitflags;

bitflags! {
    /// The architecturally visible RFLAGS bits the emulator models.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RFlags: u64 {
        const CF = 1 << 0;
        /// Reads as 1 on real hardware.
        const FIXED = 1 << 1;
        const PF = 1 << 2;
        const AF = 1 << 4;
        const ZF = 1 << 6;
        const SF = 1 << 7;
        const DF = 1 << 10;
        const OF = 1 << 11;
    }
}

impl Default for RFlags {
    fn default() -> Self {
        RFlags::FIXED
    }
}

/// A single named status flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flag {
    Carry,
    Parity,
    Auxiliary,
    Zero,
    Sign,
    Direction,
    Overflow,
}

impl Flag {
    pub const ALL: [Flag; 7] = [
        Flag::Carry,
        Flag::Parity,
        Flag::Auxiliary,
        Flag::Zero,
        Flag::Sign,
        Flag::Direction,
        Flag::Overflow,
    ];

    pub const fn bit(self) -> RFlags {
        match self {
            Flag::Carry => RFlags::CF,
            Flag::Parity => RFlags::PF,
            Flag::Auxiliary => RFlags::AF,
            Flag::Zero => RFlags::ZF,
            Flag::Sign => RFlags::SF,
            Flag::Direction => RFlags::DF,
            Flag::Overflow => RFlags::OF,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Flag::Carry => "CF",
            Flag::Parity => "PF",
            Flag::Auxiliary => "AF",
            Flag::Zero => "ZF",
            Flag::Sign => "SF",
            Flag::Direction => "DF",
            Flag::Overflow => "OF",
        }
    }
}

/// Partial flag update: only flags in the mask are written, the rest keep their value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagSet {
    mask: RFlags,
    values: RFlags,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, flag: Flag, value: bool) -> Self {
        self.set(flag, value);
        self
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        self.mask.insert(flag.bit());
        self.values.set(flag.bit(), value);
    }

    /// Removes `flag` from the update so the current value is left alone.
    #[must_use]
    pub fn without(mut self, flag: Flag) -> Self {
        self.mask.remove(flag.bit());
        self.values.remove(flag.bit());
        self
    }

    /// `None` when the update leaves `flag` untouched.
    pub fn get(&self, flag: Flag) -> Option<bool> {
        self.mask
            .contains(flag.bit())
            .then(|| self.values.contains(flag.bit()))
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    pub fn apply(&self, rflags: &mut RFlags) {
        *rflags = (*rflags & !self.mask) | (self.values & self.mask);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Flag, bool)> + '_ {
        Flag::ALL
            .into_iter()
            .filter_map(|flag| self.get(flag).map(|value| (flag, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_only_touches_masked_flags() {
        let mut rflags = RFlags::FIXED | RFlags::CF | RFlags::DF;
        let update = FlagSet::new()
            .with(Flag::Zero, true)
            .with(Flag::Carry, false);
        update.apply(&mut rflags);
        assert_eq!(rflags, RFlags::FIXED | RFlags::ZF | RFlags::DF);
    }

    #[test]
    fn without_drops_flag_from_update() {
        let update = FlagSet::new()
            .with(Flag::Carry, true)
            .with(Flag::Zero, true)
            .without(Flag::Carry);
        assert_eq!(update.get(Flag::Carry), None);
        assert_eq!(update.get(Flag::Zero), Some(true));

        let mut rflags = RFlags::FIXED | RFlags::CF;
        update.apply(&mut rflags);
        assert!(rflags.contains(RFlags::CF | RFlags::ZF));
    }

    #[test]
    fn iter_lists_masked_flags_in_order() {
        let update = FlagSet::new()
            .with(Flag::Overflow, false)
            .with(Flag::Carry, true);
        assert_eq!(
            update.iter().collect::<Vec<_>>(),
            vec![(Flag::Carry, true), (Flag::Overflow, false)]
        );
    }
}
