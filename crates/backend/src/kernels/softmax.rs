//! Softmax over a set of axes.
//!
//! Numerically stabilized: exponents are taken after subtracting the group
//! maximum. The computation runs in the host domain; ciphertext slots are
//! re-encrypted at their original chain position.

use std::collections::BTreeSet;

use crate::backend::HeBackend;
use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::HEType;
use crate::kernels::{coordinates, index_of};
use crate::plaintext::HEPlaintext;

pub fn softmax(
    arg: &[HEType],
    in_shape: &[usize],
    axes: &BTreeSet<usize>,
    element_type: ElementType,
    backend: &HeBackend,
    values_per_slot: usize,
) -> Result<Vec<HEType>> {
    if !backend.is_supported_type(element_type) {
        return Err(BackendError::UnsupportedType(element_type.to_string()));
    }
    if arg.iter().any(|slot| slot.is_ciphertext()) {
        tracing::warn!("softmax over ciphertexts without a client is not privacy-preserving");
    }

    let host: Vec<Vec<f64>> = arg
        .iter()
        .map(|slot| backend.slot_host_values(slot, values_per_slot))
        .collect::<Result<_>>()?;

    // Group slots by their coordinates outside the softmax axes.
    let group_shape: Vec<usize> = in_shape
        .iter()
        .enumerate()
        .map(|(axis, &d)| if axes.contains(&axis) { 1 } else { d })
        .collect();
    let group_of = |coord: &[usize]| {
        let projected: Vec<usize> = coord
            .iter()
            .enumerate()
            .map(|(axis, &c)| if axes.contains(&axis) { 0 } else { c })
            .collect();
        index_of(&projected, &group_shape)
    };

    let group_count: usize = group_shape.iter().product();
    let lanes = host.first().map(|v| v.len()).unwrap_or(0);
    let mut group_max = vec![vec![f64::NEG_INFINITY; lanes]; group_count];
    let coords = coordinates(in_shape);
    for coord in &coords {
        let g = group_of(coord);
        for (lane, &v) in host[index_of(coord, in_shape)].iter().enumerate() {
            group_max[g][lane] = group_max[g][lane].max(v);
        }
    }

    let mut group_sum = vec![vec![0.0f64; lanes]; group_count];
    for coord in &coords {
        let g = group_of(coord);
        for (lane, &v) in host[index_of(coord, in_shape)].iter().enumerate() {
            group_sum[g][lane] += (v - group_max[g][lane]).exp();
        }
    }

    coords
        .iter()
        .map(|coord| {
            let idx = index_of(coord, in_shape);
            let g = group_of(coord);
            let values: Vec<f64> = host[idx]
                .iter()
                .enumerate()
                .map(|(lane, &v)| (v - group_max[g][lane]).exp() / group_sum[g][lane])
                .collect();

            let slot = &arg[idx];
            let complex = slot.complex_packing();
            if slot.is_ciphertext() {
                let c = slot.ciphertext()?;
                let cipher = backend.encrypt_values_at(&values, c.parms_id, c.scale, complex)?;
                Ok(HEType::from_ciphertext(cipher, complex))
            } else {
                Ok(HEType::from_plaintext(HEPlaintext::from_vec(values), complex))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::create_backend;

    #[test]
    fn test_softmax_rows() {
        let backend = create_backend("HE_SEAL").unwrap();
        let data = [1.0, 2.0, 3.0, 1.0, 1.0, 1.0];
        let slots: Vec<HEType> = data
            .iter()
            .map(|&v| HEType::from_plaintext(HEPlaintext::scalar(v), false))
            .collect();
        let out = softmax(
            &slots,
            &[2, 3],
            &BTreeSet::from([1]),
            ElementType::F32,
            &backend,
            1,
        )
        .unwrap();
        let values: Vec<f64> = out.iter().map(|s| s.plaintext().unwrap()[0]).collect();

        // Rows sum to one.
        let row0: f64 = values[..3].iter().sum();
        let row1: f64 = values[3..].iter().sum();
        assert!((row0 - 1.0).abs() < 1e-9);
        assert!((row1 - 1.0).abs() < 1e-9);
        // Uniform row stays uniform.
        for &v in &values[3..] {
            assert!((v - 1.0 / 3.0).abs() < 1e-9);
        }
        // Monotone in the input.
        assert!(values[0] < values[1] && values[1] < values[2]);
    }
}
