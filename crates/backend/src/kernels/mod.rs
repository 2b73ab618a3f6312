//! Per-operation kernels.
//!
//! Every kernel runs over the `batched_element_count` slot axis of its
//! operands. Binary element-wise kernels dispatch on the plaintext/ciphertext
//! tag cross-product; tensor-iteration kernels (convolution, dot, pooling,
//! reductions) run the classical algorithms over slot indices, accumulating
//! with the scalar routines. Multiplicative kernels leave rescaling to the
//! executor's post-pass, matching the shared contract: every output slot is
//! rescaled once after the kernel completes.

pub mod add;
pub mod avg_pool;
pub mod batch_norm;
pub mod broadcast;
pub mod concat;
pub mod constant;
pub mod convolution;
pub mod divide;
pub mod dot;
pub mod exp;
pub mod max;
pub mod max_pool;
pub mod minimum;
pub mod multiply;
pub mod negate;
pub mod pad;
pub mod power;
pub mod relu;
pub mod reshape;
pub mod result;
pub mod reverse;
pub mod slice;
pub mod softmax;
pub mod subtract;
pub mod sum;

use crate::backend::HeBackend;
use crate::error::Result;
use crate::he_type::HEType;
use crate::plaintext::HEPlaintext;

/// Row-major linear index of a coordinate.
pub(crate) fn index_of(coord: &[usize], shape: &[usize]) -> usize {
    debug_assert_eq!(coord.len(), shape.len());
    let mut index = 0;
    for (c, s) in coord.iter().zip(shape) {
        debug_assert!(c < s);
        index = index * s + c;
    }
    index
}

/// All coordinates of a shape in row-major order.
pub(crate) fn coordinates(shape: &[usize]) -> Vec<Vec<usize>> {
    let size: usize = shape.iter().product();
    if shape.is_empty() || size == 0 {
        return if size == 0 { Vec::new() } else { vec![Vec::new()] };
    }
    let mut coords = Vec::with_capacity(size);
    let mut current = vec![0usize; shape.len()];
    loop {
        coords.push(current.clone());
        let mut axis = shape.len();
        loop {
            if axis == 0 {
                return coords;
            }
            axis -= 1;
            current[axis] += 1;
            if current[axis] < shape[axis] {
                break;
            }
            current[axis] = 0;
        }
    }
}

/// Number of host values one slot logically carries.
pub(crate) fn slot_value_count(packed: bool, batch_size: usize) -> usize {
    if packed {
        batch_size
    } else {
        1
    }
}

/// Evaluate a host-domain function on one slot, re-encrypting the result for
/// ciphertext inputs at their original chain position and scale. This is the
/// non-private local path; callers warn before taking it on ciphertexts.
pub(crate) fn host_map_slot(
    slot: &HEType,
    backend: &HeBackend,
    values_per_slot: usize,
    f: impl Fn(f64) -> f64,
) -> Result<HEType> {
    let complex = slot.complex_packing();
    if slot.is_plaintext() {
        let mapped: Vec<f64> = slot.plaintext()?.iter().map(|&v| f(v)).collect();
        Ok(HEType::from_plaintext(HEPlaintext::from_vec(mapped), complex))
    } else {
        let cipher = slot.ciphertext()?;
        let values = backend.decrypt_values(cipher, values_per_slot, complex)?;
        let mapped: Vec<f64> = values.iter().map(|&v| f(v)).collect();
        let out = backend.encrypt_values_at(&mapped, cipher.parms_id, cipher.scale, complex)?;
        Ok(HEType::from_ciphertext(out, complex))
    }
}

/// Binary host-domain evaluation with scalar-broadcast semantics.
pub(crate) fn host_zip_slots(
    a: &HEType,
    b: &HEType,
    backend: &HeBackend,
    values_per_slot: usize,
    f: impl Fn(f64, f64) -> f64,
) -> Result<HEType> {
    let complex = a.complex_packing();
    let va = backend.slot_host_values(a, values_per_slot)?;
    let vb = backend.slot_host_values(b, values_per_slot)?;
    let len = match (va.len(), vb.len()) {
        (1, n) | (n, 1) => n,
        (n, m) => n.min(m),
    };
    let get = |v: &[f64], i: usize| if v.len() == 1 { v[0] } else { v[i] };
    let mapped: Vec<f64> = (0..len).map(|i| f(get(&va, i), get(&vb, i))).collect();

    if a.is_ciphertext() || b.is_ciphertext() {
        let (parms_id, scale) = if a.is_ciphertext() {
            let c = a.ciphertext()?;
            (c.parms_id, c.scale)
        } else {
            let c = b.ciphertext()?;
            (c.parms_id, c.scale)
        };
        let out = backend.encrypt_values_at(&mapped, parms_id, scale, complex)?;
        Ok(HEType::from_ciphertext(out, complex))
    } else {
        Ok(HEType::from_plaintext(HEPlaintext::from_vec(mapped), complex))
    }
}

/// Accumulator for the inner loops of convolution, dot, pooling, and sum.
///
/// Under lazy modulus it defers reductions across cipher-cipher additions
/// and restores canonical form when the safe accumulation bound is reached,
/// recovering from would-be overflow with a forced reduction.
pub(crate) struct SlotAccumulator<'a> {
    backend: &'a HeBackend,
    lazy: bool,
    safe_bound: u64,
    lazy_adds: u64,
    value: Option<HEType>,
}

impl<'a> SlotAccumulator<'a> {
    pub fn new(backend: &'a HeBackend, lazy: bool) -> Self {
        Self {
            backend,
            lazy,
            safe_bound: crate::mod_chain::lazy_safe_bound(backend),
            lazy_adds: 0,
            value: None,
        }
    }

    pub fn accumulate(&mut self, term: HEType) -> Result<()> {
        let Some(current) = self.value.take() else {
            self.value = Some(term);
            return Ok(());
        };

        if self.lazy && current.is_ciphertext() && term.is_ciphertext() {
            self.lazy_adds += 1;
            if self.lazy_adds >= self.safe_bound {
                tracing::warn!(
                    adds = self.lazy_adds,
                    "lazy accumulation reached the safe bound; forcing a modular reduction"
                );
                let mut reduced = current;
                self.backend
                    .evaluator()
                    .reduce_inplace(reduced.ciphertext_mut()?)?;
                self.lazy_adds = 0;
                self.value = Some(add::scalar_add(&reduced, &term, self.backend, true)?);
                return Ok(());
            }
        }
        self.value = Some(add::scalar_add(
            &current,
            &term,
            self.backend,
            self.lazy && current.is_ciphertext() && term.is_ciphertext(),
        )?);
        Ok(())
    }

    /// The accumulated slot; an empty accumulation is the additive identity.
    pub fn finish(self, complex_packing: bool) -> HEType {
        self.value.unwrap_or_else(|| {
            HEType::from_plaintext(HEPlaintext::scalar(0.0), complex_packing)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_of_row_major() {
        assert_eq!(index_of(&[0, 0], &[2, 3]), 0);
        assert_eq!(index_of(&[0, 2], &[2, 3]), 2);
        assert_eq!(index_of(&[1, 0], &[2, 3]), 3);
        assert_eq!(index_of(&[1, 2], &[2, 3]), 5);
    }

    #[test]
    fn test_coordinates_order() {
        let coords = coordinates(&[2, 2]);
        assert_eq!(
            coords,
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
        assert_eq!(coordinates(&[]), vec![Vec::<usize>::new()]);
        assert!(coordinates(&[2, 0]).is_empty());
    }
}
