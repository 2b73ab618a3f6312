//! Max reduction over a set of axes.

use std::collections::BTreeSet;

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::error::Result;
use crate::he_type::HEType;
use crate::kernels::{coordinates, index_of};
use crate::plaintext::HEPlaintext;

#[allow(clippy::too_many_arguments)]
pub fn max(
    arg: &[HEType],
    in_shape: &[usize],
    out_shape: &[usize],
    reduction_axes: &BTreeSet<usize>,
    backend: &HeBackend,
    values_per_slot: usize,
) -> Result<Vec<HEType>> {
    if arg.iter().any(|slot| slot.is_ciphertext()) {
        tracing::warn!("max over ciphertexts without a client is not privacy-preserving");
    }
    let complex = arg
        .first()
        .map(|s| s.complex_packing())
        .unwrap_or_else(|| backend.complex_packing());
    let reduced_shape: Vec<usize> = in_shape
        .iter()
        .enumerate()
        .filter(|(axis, _)| reduction_axes.contains(axis))
        .map(|(_, &d)| d)
        .collect();

    let out_coords = coordinates(out_shape);
    out_coords
        .par_iter()
        .map(|out_coord| {
            let mut max_values = vec![f64::NEG_INFINITY; values_per_slot];
            let mut any_cipher = false;
            let mut lineage = None;
            for reduced_coord in coordinates(&reduced_shape) {
                let mut in_coord = Vec::with_capacity(in_shape.len());
                let mut kept_iter = out_coord.iter();
                let mut reduced_iter = reduced_coord.iter();
                for axis in 0..in_shape.len() {
                    if reduction_axes.contains(&axis) {
                        in_coord.push(*reduced_iter.next().expect("reduced coord exhausted"));
                    } else {
                        in_coord.push(*kept_iter.next().expect("kept coord exhausted"));
                    }
                }
                let slot = &arg[index_of(&in_coord, in_shape)];
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
