use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, Not};

/// 32 位掩码，draw mask 与 collide mask 共用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BitMask32(u32);

pub type DrawMask = BitMask32;
pub type CollideMask = BitMask32;

impl BitMask32 {
    pub const fn new(bits: u32) -> Self {
        BitMask32(bits)
    }

    pub const fn all_on() -> Self {
        BitMask32(u32::MAX)
    }

    pub const fn all_off() -> Self {
        BitMask32(0)
    }

    pub const fn bit(index: u32) -> Self {
        BitMask32(1 << index)
    }

    /// 低 `n` 位全为 1。
    pub const fn lower_on(n: u32) -> Self {
        if n >= 32 {
            BitMask32(u32::MAX)
        } else {
            BitMask32((1 << n) - 1)
        }
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_all_on(self) -> bool {
        self.0 == u32::MAX
    }

    pub const fn has_bit(self, index: u32) -> bool {
        self.0 & (1 << index) != 0
    }

    pub fn set_bit(&mut self, index: u32) {
        self.0 |= 1 << index;
    }

    pub fn clear_bit(&mut self, index: u32) {
        self.0 &= !(1 << index);
    }

    pub const fn has_bits_in_common(self, other: BitMask32) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitAnd for BitMask32 {
    type Output = BitMask32;
    fn bitand(self, rhs: Self) -> Self {
        BitMask32(self.0 & rhs.0)
    }
}

impl BitOr for BitMask32 {
    type Output = BitMask32;
    fn bitor(self, rhs: Self) -> Self {
        BitMask32(self.0 | rhs.0)
    }
}

impl BitXor for BitMask32 {
    type Output = BitMask32;
    fn bitxor(self, rhs: Self) -> Self {
        BitMask32(self.0 ^ rhs.0)
    }
}

impl Not for BitMask32 {
    type Output = BitMask32;
    fn not(self) -> Self {
        BitMask32(!self.0)
    }
}

impl BitAndAssign for BitMask32 {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl BitOrAssign for BitMask32 {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for BitMask32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 与 Panda 的 output 一致：高位在前，每 4 位一个空格
        let mut first = true;
        for nibble in (0..8).rev() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{:04b}", (self.0 >> (nibble * 4)) & 0xf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bit_ops() {
        let mut m = BitMask32::bit(3) | BitMask32::bit(0);
        assert!(m.has_bit(3));
        assert_eq!(m.bits(), 0b1001);
        m.clear_bit(3);
        assert_eq!(m, BitMask32::bit(0));
        assert_eq!(!BitMask32::all_off(), BitMask32::all_on());
        assert_eq!(BitMask32::lower_on(4).bits(), 0xf);
        assert_eq!(BitMask32::lower_on(32), BitMask32::all_on());
    }

    #[test]
    fn display_groups_nibbles() {
        assert_eq!(
            BitMask32::new(0x8000_0001).to_string(),
            "1000 0000 0000 0000 0000 0000 0000 0001"
        );
    }
}
