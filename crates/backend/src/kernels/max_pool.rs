//! Max pooling.
//!
//! `max_pool_index_lists` enumerates, per output cell, the input slot
//! indices competing in that window. The executor ships those lists to the
//! client one cell at a time in client mode; the local kernel here is the
//! non-private fallback.

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::error::Result;
use crate::he_type::HEType;
use crate::kernels::{coordinates, index_of, slot_value_count};
use crate::plaintext::HEPlaintext;

/// Per-output-cell lists of input slot indices to maximize over.
pub fn max_pool_index_lists(
    in_shape: &[usize],
    out_shape: &[usize],
    window_shape: &[usize],
    strides: &[usize],
    padding_below: &[usize],
) -> Vec<Vec<usize>> {
    let spatial_rank = in_shape.len() - 2;
    coordinates(out_shape)
        .iter()
        .map(|out_coord| {
            let mut list = Vec::new();
            for window_coord in coordinates(window_shape) {
                let mut in_coord = out_coord[..2].to_vec();
                let mut in_bounds = true;
                for d in 0..spatial_rank {
                    let pos = out_coord[2 + d] * strides[d] + window_coord[d];
                    if pos < padding_below[d] {
                        in_bounds = false;
                        break;
                    }
                    let pos = pos - padding_below[d];
                    if pos >= in_shape[2 + d] {
                        in_bounds = false;
                        break;
                    }
                    in_coord.push(pos);
                }
                if in_bounds {
                    list.push(index_of(&in_coord, in_shape));
                }
            }
            list
        })
        .collect()
}

/// Non-private local max pool; ciphertext windows go through the host path.
#[allow(clippy::too_many_arguments)]
pub fn max_pool(
    arg: &[HEType],
    in_shape: &[usize],
    out_shape: &[usize],
    window_shape: &[usize],
    strides: &[usize],
    padding_below: &[usize],
    backend: &HeBackend,
    packed: bool,
    batch_size: usize,
) -> Result<Vec<HEType>> {
    if arg.iter().any(|slot| slot.is_ciphertext()) {
        tracing::warn!("max pool over ciphertexts without a client is not privacy-preserving");
    }
    let lists = max_pool_index_lists(in_shape, out_shape, window_shape, strides, padding_below);
    let values_per_slot = slot_value_count(packed, batch_size);
    let complex = arg
        .first()
        .map(|s| s.complex_packing())
        .unwrap_or_else(|| backend.complex_packing());

    lists
        .par_iter()
        .map(|list| {
            let mut max_values = vec![f64::NEG_INFINITY; values_per_slot];
            let mut any_cipher = false;
            let mut lineage = None;
            for &idx in list {
                let slot = &arg[idx];
                if slot.is_ciphertext() {
                    any_cipher = true;
                    let c = slot.ciphertext()?;
                    lineage.get_or_insert((c.parms_id, c.scale));
                }
                let values = backend.slot_host_values(slot, values_per_slot)?;
                for (m, i) in max_values.iter_mut().zip(0..) {
                    let v = if values.len() == 1 { values[0] } else { values[i] };
                    *m = m.max(v);
                }
            }

            if any_cipher {
                let (parms_id, scale) = lineage.expect("cipher lineage recorded above");
                let cipher = backend.encrypt_values_at(&max_values, parms_id, scale, complex)?;
                Ok(HEType::from_ciphertext(cipher, complex))
            } else {
                Ok(HEType::from_plaintext(
                    HEPlaintext::from_vec(max_values),
                    complex,
                ))
            }
        })
        .collect()
}
