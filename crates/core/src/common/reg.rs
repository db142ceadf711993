//! Architectural register indices and names.
//!
//! Registers are referred to either systematically (`x0`..`x31`) or by their
//! ABI names (`zero`, `ra`, `sp`, ...). Parsing accepts both; display uses
//! the ABI name.

use std::fmt;

/// ABI register names for x0–x31.
const REG_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// Index of an architectural register (`x0`..`x31`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Reg(pub u8);

impl Reg {
    /// The hardwired zero register `x0`.
    pub const ZERO: Self = Self(0);
    /// The return-address register `ra` (`x1`).
    pub const RA: Self = Self(1);
    /// The stack pointer `sp` (`x2`).
    pub const SP: Self = Self(2);
    /// The first argument/result register `a0` (`x10`).
    pub const A0: Self = Self(10);
    /// The syscall-number register `a7` (`x17`).
    pub const A7: Self = Self(17);

    /// Returns the register index as a usize for table indexing.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns true for `x0`, which reads zero and discards writes.
    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Returns the ABI name of this register.
    pub fn abi_name(self) -> &'static str {
        REG_NAMES.get(self.index()).copied().unwrap_or("x??")
    }

    /// Parses a register name: systematic (`x7`), ABI (`t2`), or the `fp`
    /// alias for `s0`. Returns `None` for anything else.
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(num) = name.strip_prefix('x')
            && let Ok(idx) = num.parse::<u8>()
            && idx < 32
        {
            return Some(Self(idx));
        }
        if name == "fp" {
            return Some(Self(8));
        }
        REG_NAMES
            .iter()
            .position(|&n| n == name)
            .map(|idx| Self(idx as u8))
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abi_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_systematic() {
        assert_eq!(Reg::parse("x0"), Some(Reg(0)));
        assert_eq!(Reg::parse("x31"), Some(Reg(31)));
        assert_eq!(Reg::parse("x32"), None);
        assert_eq!(Reg::parse("x"), None);
    }

    #[test]
    fn test_parse_abi() {
        assert_eq!(Reg::parse("zero"), Some(Reg(0)));
        assert_eq!(Reg::parse("ra"), Some(Reg(1)));
        assert_eq!(Reg::parse("sp"), Some(Reg(2)));
        assert_eq!(Reg::parse("a7"), Some(Reg(17)));
        assert_eq!(Reg::parse("t6"), Some(Reg(31)));
        assert_eq!(Reg::parse("fp"), Some(Reg(8)));
        assert_eq!(Reg::parse("s0"), Some(Reg(8)));
        assert_eq!(Reg::parse("q3"), None);
    }

    #[test]
    fn test_display_round_trip() {
        for idx in 0..32u8 {
            let reg = Reg(idx);
            assert_eq!(Reg::parse(reg.abi_name()), Some(reg));
        }
    }
}
