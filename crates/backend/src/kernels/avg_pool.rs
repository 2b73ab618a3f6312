//! Average pooling over [N, C, spatial...] slot arrays.

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::error::Result;
use crate::he_type::HEType;
use crate::kernels::multiply::scalar_multiply;
use crate::kernels::{coordinates, index_of, SlotAccumulator};
use crate::plaintext::HEPlaintext;

#[allow(clippy::too_many_arguments)]
pub fn avg_pool(
    arg: &[HEType],
    in_shape: &[usize],
    out_shape: &[usize],
    window_shape: &[usize],
    strides: &[usize],
    padding_below: &[usize],
    _padding_above: &[usize],
    include_padding: bool,
    backend: &HeBackend,
    lazy: bool,
) -> Result<Vec<HEType>> {
    let spatial_rank = in_shape.len() - 2;
    let complex = arg
        .first()
        .map(|s| s.complex_packing())
        .unwrap_or_else(|| backend.complex_packing());

    let out_coords = coordinates(out_shape);
    out_coords
        .par_iter()
        .map(|out_coord| {
            let mut acc = SlotAccumulator::new(backend, lazy);
            let mut in_window = 0usize;
            let mut total_window = 0usize;
            for window_coord in coordinates(window_shape) {
                total_window += 1;
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
                if !in_bounds {
                    continue;
                }
                in_window += 1;
                acc.accumulate(arg[index_of(&in_coord, in_shape)].clone())?;
            }

            let divisor = if include_padding { total_window } else { in_window };
            let sum = acc.finish(complex);
            scalar_multiply(
                &sum,
                &HEType::from_plaintext(
                    HEPlaintext::scalar(1.0 / divisor.max(1) as f64),
                    complex,
                ),
                backend,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::create_backend;
    use crate::mod_chain::rescale_slots;

    fn plain_slots(values: &[f64]) -> Vec<HEType> {
        values
            .iter()
            .map(|&v| HEType::from_plaintext(HEPlaintext::scalar(v), false))
            .collect()
    }

    #[test]
    fn test_plain_avg_pool_2x2() {
        let backend = create_backend("HE_SEAL").unwrap();
        let data: Vec<f64> = (0..16).map(|i| i as f64).collect();
        let out = avg_pool(
            &plain_slots(&data),
            &[1, 1, 4, 4],
            &[1, 1, 2, 2],
            &[2, 2],
            &[2, 2],
            &[0, 0],
            &[0, 0],
            false,
            &backend,
            false,
        )
        .unwrap();
        let values: Vec<f64> = out.iter().map(|s| s.plaintext().unwrap()[0]).collect();
        assert_eq!(values, vec![2.5, 4.5, 10.5, 12.5]);
    }

    #[test]
    fn test_cipher_avg_pool() {
        let backend = create_backend("HE_SEAL").unwrap();
        let data: Vec<f64> = (0..16).map(|i| i as f64).collect();
        let cipher: Vec<HEType> = data
            .iter()
            .map(|&v| {
                HEType::from_ciphertext(backend.encrypt_values(&[v], false).unwrap(), false)
            })
            .collect();
        let mut out = avg_pool(
            &cipher,
            &[1, 1, 4, 4],
            &[1, 1, 2, 2],
            &[2, 2],
            &[2, 2],
            &[0, 0],
            &[0, 0],
            false,
            &backend,
            false,
        )
        .unwrap();
        rescale_slots(&mut out, &backend).unwrap();

        let expected = [2.5, 4.5, 10.5, 12.5];
        for (slot, e) in out.iter().zip(&expected) {
            let got = backend.slot_host_values(slot, 1).unwrap()[0];
            assert!((got - e).abs() < 1e-2, "got {got}, expected {e}");
        }
    }
}
