//! Linear-operator kernels shared by the fixed-point and real paths.
//!
//! Plain nested loops, generic over the element domain. Determinism is the
//! point: evaluation order is fixed, so the integer path produces identical
//! bits on every platform.

use crate::error::NetError;
use crate::tensor::{Element, Tensor};

/// Stride-1 zero-padded 2-D convolution.
///
/// `input` is `[n, c_in, h, w]`, `weight` is `[c_out, c_in, k, k]` (the same
/// layout as the external weight format, so no transpose happens at load
/// time), `bias` has one entry per output channel.
///
/// # Errors
/// Returns an error on non-4D operands or a channel-count disagreement.
pub fn conv2d<T: Element>(
    input: &Tensor<T>,
    weight: &Tensor<T>,
    bias: Option<&Tensor<T>>,
    padding: usize,
) -> Result<Tensor<T>, NetError> {
    let [n, c_in, h, w] = dims4(input)?;
    let [c_out, wc_in, kh, kw] = dims4(weight)?;
    if wc_in != c_in {
        return Err(NetError::ChannelMismatch {
            expected: wc_in,
            found: c_in,
        });
    }
    if let Some(b) = bias {
        if b.len() != c_out {
            return Err(NetError::ChannelMismatch {
                expected: c_out,
                found: b.len(),
            });
        }
    }

    let inp = input.data();
    let wgt = weight.data();
    let mut out = vec![T::ZERO; n * c_out * h * w];

    for batch in 0..n {
        for oc in 0..c_out {
            let base = bias.map_or(T::ZERO, |b| b.data()[oc]);
            for oy in 0..h {
                for ox in 0..w {
                    let mut acc = base;
                    for ic in 0..c_in {
                        let in_plane = ((batch * c_in) + ic) * h * w;
                        let w_plane = ((oc * c_in) + ic) * kh * kw;
                        for ky in 0..kh {
                            let iy = oy as isize + ky as isize - padding as isize;
                            if iy < 0 || iy >= h as isize {
                                continue;
                            }
                            for kx in 0..kw {
                                let ix = ox as isize + kx as isize - padding as isize;
                                if ix < 0 || ix >= w as isize {
                                    continue;
                                }
                                let iv = inp[in_plane + iy as usize * w + ix as usize];
                                let wv = wgt[w_plane + ky * kw + kx];
                                acc += iv * wv;
                            }
                        }
                    }
                    out[(((batch * c_out) + oc) * h + oy) * w + ox] = acc;
                }
            }
        }
    }

    Tensor::from_vec(vec![n, c_out, h, w], out)
}

/// Fully-connected layer: `y = x W^T + b`.
///
/// `input` is `[n, in_f]`, `weight` is `[out_f, in_f]`, `bias` is `[out_f]`.
///
/// # Errors
/// Returns an error on rank or width disagreements.
pub fn linear<T: Element>(
    input: &Tensor<T>,
    weight: &Tensor<T>,
    bias: &Tensor<T>,
) -> Result<Tensor<T>, NetError> {
    let [n, in_f] = dims2(input)?;
    let [out_f, w_in] = dims2(weight)?;
    if w_in != in_f {
        return Err(NetError::ChannelMismatch {
            expected: w_in,
            found: in_f,
        });
    }
    if bias.len() != out_f {
        return Err(NetError::ChannelMismatch {
            expected: out_f,
            found: bias.len(),
        });
    }

    let inp = input.data();
    let wgt = weight.data();
    let mut out = vec![T::ZERO; n * out_f];

    for batch in 0..n {
        for o in 0..out_f {
            let mut acc = bias.data()[o];
            for i in 0..in_f {
                acc += inp[batch * in_f + i] * wgt[o * in_f + i];
            }
            out[batch * out_f + o] = acc;
        }
    }

    Tensor::from_vec(vec![n, out_f], out)
}

/// Global average pool over the spatial dimensions, truncating toward zero.
///
/// The pooled value stays in the fixed-point domain: the mean of Q-scaled
/// values is Q-scaled, so no further rescale follows.
pub fn global_avg_pool_fixed(input: &Tensor<i64>) -> Result<Tensor<i64>, NetError> {
    let [n, c, h, w] = dims4(input)?;
    let count = (h * w) as i64;
    let inp = input.data();
    let mut out = vec![0i64; n * c];
    for batch in 0..n {
        for ch in 0..c {
            let plane = ((batch * c) + ch) * h * w;
            let sum: i64 = inp[plane..plane + h * w].iter().sum();
            out[batch * c + ch] = sum / count;
        }
    }
    Tensor::from_vec(vec![n, c], out)
}

/// Global average pool over the spatial dimensions, real-valued
pub fn global_avg_pool_real(input: &Tensor<f64>) -> Result<Tensor<f64>, NetError> {
    let [n, c, h, w] = dims4(input)?;
    let count = (h * w) as f64;
    let inp = input.data();
    let mut out = vec![0.0f64; n * c];
    for batch in 0..n {
        for ch in 0..c {
            let plane = ((batch * c) + ch) * h * w;
            let sum: f64 = inp[plane..plane + h * w].iter().sum();
            out[batch * c + ch] = sum / count;
        }
    }
    Tensor::from_vec(vec![n, c], out)
}

/// Rectified-linear activation, in place
pub fn relu<T: Element>(t: &mut Tensor<T>) {
    for v in t.data_mut() {
        if *v < T::ZERO {
            *v = T::ZERO;
        }
    }
}

/// Element-wise `dst += src` for the residual connection.
///
/// # Errors
/// Returns an error if the shapes disagree.
pub fn add_assign<T: Element>(dst: &mut Tensor<T>, src: &Tensor<T>) -> Result<(), NetError> {
    if dst.shape() != src.shape() {
        return Err(NetError::DataShapeMismatch {
            expected: dst.len(),
            found: src.len(),
        });
    }
    for (d, &s) in dst.data_mut().iter_mut().zip(src.data()) {
        *d += s;
    }
    Ok(())
}

fn dims4<T: Element>(t: &Tensor<T>) -> Result<[usize; 4], NetError> {
    match *t.shape() {
        [a, b, c, d] => Ok([a, b, c, d]),
        _ => Err(NetError::InvalidShape {
            reason: format!("expected 4 dimensions, found {}", t.shape().len()),
        }),
    }
}

fn dims2<T: Element>(t: &Tensor<T>) -> Result<[usize; 2], NetError> {
    match *t.shape() {
        [a, b] => Ok([a, b]),
        _ => Err(NetError::InvalidShape {
            reason: format!("expected 2 dimensions, found {}", t.shape().len()),
        }),
    }
}
