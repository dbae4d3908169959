//! 16-bit fixed-point numbers with a 12-bit significand and a 4-bit exponent.
//!
//! Layout (one `u16`):
//!
//! ```text
//!  15                 4 3      0
//! [ significand (12)   | exp (4) ]
//! ```
//!
//! The significand is kept left-aligned in a 16-bit word (its low four bits
//! are always zero), and the value of a number is
//! `(raw & 0xFFF0) * 2^(exp - 15)`. The smallest non-zero value is `2^-11`,
//! the largest is `0xFFF0` (65520).
//!
//! Everything here is shift-and-subtract arithmetic; the AVR core has no
//! divide instruction and only an 8-bit multiplier.

/// Mask selecting the significand bits.
pub const SIGNIFICAND_MASK: u16 = 0xFFF0;
/// Mask selecting the exponent bits.
pub const EXPONENT_MASK: u16 = 0x000F;
/// Largest exponent.
pub const EXPONENT_MAX: u8 = 15;

/// Default number of significant bits computed by [`FixedPoint16::inverse`].
pub const INVERSE_PRECISION_BITS: u8 = 16;

/// Fractional bits appended below the significand to form the divisor.
const DIVISOR_GUARD_BITS: u8 = 8;

/// A packed significand/exponent pair.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixedPoint16(u16);

impl FixedPoint16 {
    /// Zero (significand 0, exponent 0).
    pub const ZERO: Self = Self(0);
    /// Largest representable value, also used as the capture overflow sentinel.
    pub const MAX: Self = Self(SIGNIFICAND_MASK | EXPONENT_MAX as u16);

    /// Pack a significand and an exponent. Bits that do not fit are masked off.
    pub const fn compose(significand: u16, exponent: u8) -> Self {
        Self((significand & SIGNIFICAND_MASK) | (exponent as u16 & EXPONENT_MASK))
    }

    /// Reinterpret a raw 16-bit word (e.g. taken off the wire).
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Left-aligned significand; the low four bits are zero.
    pub const fn significand(self) -> u16 {
        self.0 & SIGNIFICAND_MASK
    }

    pub const fn exponent(self) -> u8 {
        (self.0 & EXPONENT_MASK) as u8
    }

    /// Bring an arbitrary `(significand, exponent)` pair into range.
    ///
    /// Negative exponents are absorbed by shifting the significand right
    /// (low bits are dropped, not rounded). Exponents above 15 are absorbed
    /// by shifting left; if that would push a set bit out of the word the
    /// result clamps to [`FixedPoint16::MAX`].
    pub fn normalize(significand: u16, exponent: i8) -> Self {
        let mut sig = significand;
        let mut exp = exponent;

        while exp < 0 {
            sig >>= 1;
            exp += 1;
        }
        while exp > EXPONENT_MAX as i8 {
            if sig & 0x8000 != 0 {
                return Self::MAX;
            }
            sig <<= 1;
            exp -= 1;
        }

        Self::compose(sig, exp as u8)
    }

    /// Approximate `2^extra_shift / self` with the default precision.
    ///
    /// The divisor is the significand plus one unit below its guard bits, so
    /// it is never zero: `ZERO.inverse(k)` is `2^(23 + k)`, which saturates
    /// to `MAX` for any `k` above -8. For significands of at least `0x1000`
    /// the result is within one retained LSB of the exact reciprocal.
    pub fn inverse(self, extra_shift: i8) -> Self {
        self.inverse_with_precision(extra_shift, INVERSE_PRECISION_BITS)
    }

    /// Restoring-division reciprocal, stopping once `precision_bits`
    /// (clamped to 8..=16) significant quotient bits are known.
    pub fn inverse_with_precision(self, extra_shift: i8, precision_bits: u8) -> Self {
        let precision_bits = precision_bits.clamp(8, 16);
        let divisor = self.divisor();
        let precision_mask = 1u16 << (precision_bits - 1);

        let mut partial: u32 = 0;
        let mut quotient: u16 = 0;
        let mut steps: u8 = 0;
        while steps < 48 {
            // numerator: a single one bit followed by zeros
            partial = (partial << 1) | u32::from(steps == 0);
            steps += 1;
            quotient <<= 1;
            if partial >= divisor {
                partial -= divisor;
                quotient |= 1;
            }
            if quotient & precision_mask != 0 {
                break;
            }
        }

        self.finish_inverse(quotient, steps, extra_shift, precision_bits)
    }

    /// Same result as [`FixedPoint16::inverse`], bit for bit, using a native
    /// integer division instead of the shift/subtract loop.
    pub fn inverse_native(self, extra_shift: i8) -> Self {
        let precision_bits = INVERSE_PRECISION_BITS;
        let divisor = self.divisor() as u64;
        // first step count whose quotient reaches the precision bit
        let ceil_log2 = 64 - (divisor - 1).leading_zeros() as u8;
        let steps = precision_bits + ceil_log2;
        let quotient = ((1u64 << (steps - 1)) / divisor) as u16;

        self.finish_inverse(quotient, steps, extra_shift, precision_bits)
    }

    /// Integer part of the value.
    pub const fn to_integer16(self) -> u16 {
        self.significand() >> (EXPONENT_MAX - self.exponent())
    }

    /// The value as unsigned 16.16 fixed point (exact).
    pub const fn to_integer32(self) -> u32 {
        ((self.significand() as u32) << 16) >> (EXPONENT_MAX - self.exponent())
    }

    /// Significand with guard bits, plus one: always in `1..=0xFF_F001`.
    fn divisor(self) -> u32 {
        ((self.significand() as u32) << DIVISOR_GUARD_BITS) | 1
    }

    /// `quotient` is `2^(steps - 1) / divisor`, with bit `precision_bits - 1` set.
    fn finish_inverse(self, quotient: u16, steps: u8, extra_shift: i8, precision_bits: u8) -> Self {
        let aligned = quotient << (16 - precision_bits);
        let exponent = 15 + DIVISOR_GUARD_BITS as i16 + precision_bits as i16 + extra_shift as i16
            - self.exponent() as i16
            - steps as i16;

        if exponent > i8::MAX as i16 {
            return Self::MAX;
        }
        if exponent < -16 {
            return Self::ZERO;
        }
        Self::normalize(aligned, exponent as i8)
    }
}

impl From<FixedPoint16> for u16 {
    fn from(value: FixedPoint16) -> Self {
        value.raw()
    }
}
