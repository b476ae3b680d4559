//! Canonical policy-index gather.
//!
//! The raw policy convolution emits one value per native move plane and
//! square. An externally supplied table maps each native flat position to
//! its canonical policy index (or marks it unused); the gather reorders the
//! flattened convolution output into canonical order. The table is static
//! data from the caller's point of view; this module only validates it and
//! applies it.

use crate::error::NetError;
use crate::net::POLICY_OUTPUTS;
use crate::tensor::{Element, Tensor};

/// Native position marked as having no canonical policy index
pub const UNMAPPED: i64 = -1;

/// Validated gather table from native convolution order to canonical order
#[derive(Debug, Clone)]
pub struct PolicyMap {
    /// For each canonical slot, the native flat position feeding it
    sources: Vec<Option<usize>>,
    native_len: usize,
}

impl PolicyMap {
    /// Build the gather from a native-to-canonical table.
    ///
    /// `table[p]` is the canonical index fed by native flat position `p`, or
    /// [`UNMAPPED`]. Canonical slots no native position maps to read as zero.
    ///
    /// # Errors
    /// Returns an error if an index is outside `0..1858` or mapped twice.
    pub fn from_table(table: &[i64]) -> Result<Self, NetError> {
        let mut sources = vec![None; POLICY_OUTPUTS];
        for (position, &index) in table.iter().enumerate() {
            if index == UNMAPPED {
                continue;
            }
            if index < 0 || index >= POLICY_OUTPUTS as i64 {
                return Err(NetError::PolicyIndexOutOfRange { position, index });
            }
            let index = index as usize;
            if sources[index].is_some() {
                return Err(NetError::DuplicatePolicyIndex { index });
            }
            sources[index] = Some(position);
        }
        Ok(Self {
            sources,
            native_len: table.len(),
        })
    }

    /// Length of the native flattened output this map gathers from
    #[must_use]
    pub fn native_len(&self) -> usize {
        self.native_len
    }

    /// Reorder `[n, native_len]` into canonical `[n, 1858]` order
    ///
    /// # Errors
    /// Returns an error if the input width disagrees with the table.
    pub fn gather<T: Element>(&self, input: &Tensor<T>) -> Result<Tensor<T>, NetError> {
        let (n, width) = match *input.shape() {
            [n, w] => (n, w),
            _ => {
                return Err(NetError::InvalidShape {
                    reason: format!("expected 2 dimensions, found {}", input.shape().len()),
                })
            }
        };
        if width != self.native_len {
            return Err(NetError::ChannelMismatch {
                expected: self.native_len,
                found: width,
            });
        }

        let inp = input.data();
        let mut out = vec![T::ZERO; n * POLICY_OUTPUTS];
        for batch in 0..n {
            let row = batch * self.native_len;
            for (slot, source) in self.sources.iter().enumerate() {
                if let Some(p) = source {
                    out[batch * POLICY_OUTPUTS + slot] = inp[row + p];
                }
            }
        }
        Tensor::from_vec(vec![n, POLICY_OUTPUTS], out)
    }
}
