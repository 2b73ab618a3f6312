//! Convolution over [N, C, spatial...] slot arrays.
//!
//! The inner accumulation alternates multiply and add; products stay at the
//! doubled scale and the executor's post-pass performs the single rescale
//! (plus the modular reduction under lazy modulus).

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::HEType;
use crate::kernels::multiply::scalar_multiply;
use crate::kernels::{coordinates, index_of, SlotAccumulator};

#[allow(clippy::too_many_arguments)]
pub fn convolution(
    data: &[HEType],
    filter: &[HEType],
    data_shape: &[usize],
    filter_shape: &[usize],
    out_shape: &[usize],
    strides: &[usize],
    dilations: &[usize],
    padding_below: &[usize],
    _padding_above: &[usize],
    element_type: ElementType,
    backend: &HeBackend,
    lazy: bool,
) -> Result<Vec<HEType>> {
    if !backend.is_supported_type(element_type) {
        return Err(BackendError::UnsupportedType(element_type.to_string()));
    }
    let spatial_rank = data_shape.len() - 2;
    let in_channels = data_shape[1];
    let complex = data
        .first()
        .map(|s| s.complex_packing())
        .unwrap_or_else(|| backend.complex_packing());

    let out_coords = coordinates(out_shape);
    out_coords
        .par_iter()
        .map(|out_coord| {
            let batch = out_coord[0];
            let out_channel = out_coord[1];
            let mut acc = SlotAccumulator::new(backend, lazy);

            for ci in 0..in_channels {
                let window_shape = &filter_shape[2..];
                for window_coord in coordinates(window_shape) {
                    // Input position for this filter tap; taps landing in the
                    // padding contribute nothing.
                    let mut in_coord = vec![batch, ci];
                    let mut in_bounds = true;
                    for d in 0..spatial_rank {
                        let pos = out_coord[2 + d] * strides[d] + window_coord[d] * dilations[d];
                        if pos < padding_below[d] {
                            in_bounds = false;
                            break;
                        }
                        let pos = pos - padding_below[d];
                        if pos >= data_shape[2 + d] {
                            in_bounds = false;
                            break;
                        }
                        in_coord.push(pos);
                    }
                    if !in_bounds {
                        continue;
                    }

                    let mut filter_coord = vec![out_channel, ci];
                    filter_coord.extend_from_slice(&window_coord);

                    let term = scalar_multiply(
                        &data[index_of(&in_coord, data_shape)],
                        &filter[index_of(&filter_coord, filter_shape)],
                        backend,
                    )?;
                    acc.accumulate(term)?;
                }
            }
            Ok(acc.finish(complex))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::create_backend;
    use crate::mod_chain::{mod_reduce_slots, rescale_slots};
    use crate::plaintext::HEPlaintext;

    fn plain_slots(values: &[f64]) -> Vec<HEType> {
        values
            .iter()
            .map(|&v| HEType::from_plaintext(HEPlaintext::scalar(v), false))
            .collect()
    }

    #[test]
    fn test_plain_conv_3x3_over_5x5() {
        let backend = create_backend("HE_SEAL").unwrap();
        let data: Vec<f64> = (0..25).map(|i| i as f64).collect();
        let filter = vec![1.0; 9];

        let out = convolution(
            &plain_slots(&data),
            &plain_slots(&filter),
            &[1, 1, 5, 5],
            &[1, 1, 3, 3],
            &[1, 1, 3, 3],
            &[1, 1],
            &[1, 1],
            &[0, 0],
            &[0, 0],
            ElementType::F32,
            &backend,
            false,
        )
        .unwrap();

        // Each output is the sum of a 3×3 patch; center patch sums to 9·12.
        let values: Vec<f64> = out
            .iter()
            .map(|s| s.plaintext().unwrap()[0])
            .collect();
        assert_eq!(values[4], 108.0);
        assert_eq!(values[0], 54.0);
    }

    #[test]
    fn test_cipher_conv_matches_plain_reference() {
        let backend = create_backend("HE_SEAL").unwrap();
        let data: Vec<f64> = (0..9).map(|i| (i as f64) * 0.5 - 2.0).collect();
        let filter = vec![1.0, -1.0, 0.5, 2.0];

        let cipher_data: Vec<HEType> = data
            .iter()
            .map(|&v| {
                HEType::from_ciphertext(backend.encrypt_values(&[v], false).unwrap(), false)
            })
            .collect();

        let mut out = convolution(
            &cipher_data,
            &plain_slots(&filter),
            &[1, 1, 3, 3],
            &[1, 1, 2, 2],
            &[1, 1, 2, 2],
            &[1, 1],
            &[1, 1],
            &[0, 0],
            &[0, 0],
            ElementType::F32,
            &backend,
            false,
        )
        .unwrap();
        rescale_slots(&mut out, &backend).unwrap();

        let reference = convolution(
            &plain_slots(&data),
            &plain_slots(&filter),
            &[1, 1, 3, 3],
            &[1, 1, 2, 2],
            &[1, 1, 2, 2],
            &[1, 1],
            &[1, 1],
            &[0, 0],
            &[0, 0],
            ElementType::F32,
            &backend,
            false,
        )
        .unwrap();

        for (c, r) in out.iter().zip(&reference) {
            let got = backend.slot_host_values(c, 1).unwrap()[0];
            let expected = r.plaintext().unwrap()[0];
            assert!((got - expected).abs() < 1e-2, "got {got}, expected {expected}");
        }
    }

    #[test]
    fn test_lazy_conv_matches_strict() {
        let backend = create_backend("HE_SEAL").unwrap();
        let data: Vec<f64> = (0..16).map(|i| (i % 5) as f64 - 2.0).collect();
        let filter = vec![0.5, 1.0, -1.0, 2.0];

        let cipher_data: Vec<HEType> = data
            .iter()
            .map(|&v| {
                HEType::from_ciphertext(backend.encrypt_values(&[v], false).unwrap(), false)
            })
            .collect();
        let cipher_filter: Vec<HEType> = filter
            .iter()
            .map(|&v| {
                HEType::from_ciphertext(backend.encrypt_values(&[v], false).unwrap(), false)
            })
            .collect();

        let run = |lazy: bool| -> Vec<f64> {
            let mut out = convolution(
                &cipher_data,
                &cipher_filter,
                &[1, 1, 4, 4],
                &[1, 1, 2, 2],
                &[1, 1, 3, 3],
                &[1, 1],
                &[1, 1],
                &[0, 0],
                &[0, 0],
                ElementType::F32,
                &backend,
                lazy,
            )
            .unwrap();
            if lazy {
                mod_reduce_slots(&mut out, &backend).unwrap();
            }
            rescale_slots(&mut out, &backend).unwrap();
            out.iter()
                .map(|s| backend.slot_host_values(s, 1).unwrap()[0])
                .collect()
        };

        let strict = run(false);
        let lazy = run(true);
        for (s, l) in strict.iter().zip(&lazy) {
            assert!((s - l).abs() < 1e-2, "strict {s} vs lazy {l}");
        }
    }
}
