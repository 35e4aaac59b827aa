use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// One [`UNIT`] of accumulated time is one tick.
pub type Fixed64 = I32F32;

/// Frames and ticks are counted with plain integers.
pub type Ticks = u64;

/// 1.0 in fixed-point, i.e. `2^32` fracunits.
pub const UNIT: Fixed64 = Fixed64::ONE;

/// 0.0 in fixed-point.
pub const ZERO: Fixed64 = Fixed64::ZERO;

const FRAC_BITS: u32 = 32;

/// Convert an f64 to Fixed64, rounding to the nearest fracunit with ties to
/// even. Out-of-range values saturate, NaN becomes zero. Use only for
/// initialization, never in the sim loop.
#[inline]
pub fn from_f64(v: f64) -> Fixed64 {
    if v.is_nan() {
        return ZERO;
    }
    Fixed64::saturating_from_num(v)
}

/// Convert Fixed64 to f64. Use only for display, never in the sim loop.
#[inline]
pub fn to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// A whole number of ticks as a fixed-point value.
#[inline]
pub fn from_ticks(ticks: i32) -> Fixed64 {
    Fixed64::from_num(ticks)
}

/// The whole ticks contained in `v`, rounded toward negative infinity.
#[inline]
pub fn whole_ticks(v: Fixed64) -> i64 {
    v.to_bits() >> FRAC_BITS
}

/// Multiply, rounding toward negative infinity. A result that does not fit
/// in Q32.32 wraps; use [`checked_mul`] where that matters.
#[inline]
pub fn mul(a: Fixed64, b: Fixed64) -> Fixed64 {
    a.wrapping_mul(b)
}

/// Multiplication that returns `None` when the result does not fit.
#[inline]
pub fn checked_mul(a: Fixed64, b: Fixed64) -> Option<Fixed64> {
    a.checked_mul(b)
}

/// Divide, truncating toward zero.
///
/// # Panics
///
/// Panics when `b` is zero. Callers guarantee a non-zero divisor; use
/// [`checked_div`] otherwise.
#[inline]
pub fn div(a: Fixed64, b: Fixed64) -> Fixed64 {
    a.wrapping_div(b)
}

/// Division that returns `None` on a zero divisor or overflow.
#[inline]
pub fn checked_div(a: Fixed64, b: Fixed64) -> Option<Fixed64> {
    a.checked_div(b)
}

/// Square root via f64. Precision loss is acceptable here; negative input
/// yields zero.
#[inline]
pub fn sqrt(a: Fixed64) -> Fixed64 {
    from_f64(to_f64(a).sqrt())
}
