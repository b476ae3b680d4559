//! Fixed-point arithmetic primitives.
//!
//! Every value flowing between pipeline stages is an integer scaled by
//! [`QUANTIZE_FACTOR`]. The two boundary conversions ([`quantize`] on entry,
//! [`dequantize`] on exit) are the only places ordinary rounding or ordinary
//! division occur; everything in between uses [`rescale_down`], which
//! truncates toward zero.

/// Scale factor relating real values to their fixed-point representation
pub const QUANTIZE_FACTOR: i64 = 1024 * 1024;

/// Map a real value into the fixed-point domain: `round(value * Q)`
#[inline]
#[must_use]
pub fn quantize(value: f64) -> i64 {
    (value * QUANTIZE_FACTOR as f64).round() as i64
}

/// Divide with truncation toward zero.
///
/// This is not floor division: `rescale_down(-5, 4)` is `-1`, not `-2`.
/// Rust integer division already truncates toward zero; this function exists
/// to name the policy at every call site that drops a scale factor.
#[inline]
#[must_use]
pub fn rescale_down(x: i64, by: i64) -> i64 {
    x / by
}

/// Map a fixed-point value back to a real value: ordinary division by `Q`.
///
/// Used once per head at the pipeline output; no truncation.
#[inline]
#[must_use]
pub fn dequantize(x: i64) -> f64 {
    x as f64 / QUANTIZE_FACTOR as f64
}
