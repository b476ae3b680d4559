//! Squeeze-excitation gate approximations of the logistic function.
//!
//! Two formulas exist. [`float_gate`] is the committed production behavior:
//! round the pre-activation down to pre-scale units, apply a real sigmoid to
//! that one scalar, rescale by Q. [`piecewise_gate`] is the integer-only
//! piecewise polynomial the float formula was meant to be replaced by: it
//! keeps the whole pipeline inside add/multiply/compare/truncating-division,
//! which is what an arithmetic circuit can verify. Callers pick one via
//! [`SigmoidKind`]; both are bounded to `[0, Q]` for every input.

use crate::fixed::QUANTIZE_FACTOR;

/// Saturation bound of the piecewise gate, in pre-scale units
pub const PIECEWISE_BOUND: i64 = 2;

/// Which gate formula the squeeze-excitation blocks evaluate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SigmoidKind {
    /// Real sigmoid of the rounded pre-activation (committed behavior)
    #[default]
    Float,
    /// Integer-only saturating polynomial (circuit-friendly alternative)
    Piecewise,
}

/// Committed gate formula: `sigmoid(round(x / Q)) * Q`, evaluated in `f64`.
///
/// The result is a real scalar; the squeeze-excitation block truncates only
/// after multiplying it with the gated activation.
#[must_use]
pub fn float_gate(x: i64) -> f64 {
    let rounded = (x as f64 / QUANTIZE_FACTOR as f64).round();
    sigmoid(rounded) * QUANTIZE_FACTOR as f64
}

/// Integer-only piecewise gate.
///
/// Inside `[-2Q, 2Q]` evaluates `Q/2 + x/4 - x^3/(64 Q^2) + x^5/(1024 Q^4)`
/// with truncating divisions (the quantized form of the near-zero expansion
/// `1/2 + t/4 - t^3/64 + t^5/1024`); outside, saturates to `0` or `Q`.
/// Intermediate powers use `i128`: `x^5` at the bound is 2^105.
#[must_use]
pub fn piecewise_gate(x: i64) -> i64 {
    let q = QUANTIZE_FACTOR;
    let bound = PIECEWISE_BOUND * q;
    if x <= -bound {
        return 0;
    }
    if x >= bound {
        return q;
    }

    let xw = x as i128;
    let qw = q as i128;
    let linear = xw / 4;
    let cubic = xw * xw * xw / (64 * qw * qw);
    let quintic = xw * xw * xw * xw * xw / (1024 * qw * qw * qw * qw);
    let y = qw / 2 + linear - cubic + quintic;
    y.clamp(0, qw) as i64
}

fn sigmoid(t: f64) -> f64 {
    1.0 / (1.0 + (-t).exp())
}
