//! Generalized dot product with trailing/leading axis contraction.

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::HEType;
use crate::kernels::multiply::scalar_multiply;
use crate::kernels::{coordinates, index_of, SlotAccumulator};

#[allow(clippy::too_many_arguments)]
pub fn dot(
    arg0: &[HEType],
    arg1: &[HEType],
    shape0: &[usize],
    shape1: &[usize],
    out_shape: &[usize],
    reduction_axes_count: usize,
    element_type: ElementType,
    backend: &HeBackend,
    lazy: bool,
) -> Result<Vec<HEType>> {
    if !backend.is_supported_type(element_type) {
        return Err(BackendError::UnsupportedType(element_type.to_string()));
    }
    let r = reduction_axes_count;
    let outer0 = shape0.len() - r;
    let contracted_shape = &shape0[outer0..];
    let complex = arg0
        .first()
        .map(|s| s.complex_packing())
        .unwrap_or_else(|| backend.complex_packing());

    let out_coords = coordinates(out_shape);
    out_coords
        .par_iter()
        .map(|out_coord| {
            let mut acc = SlotAccumulator::new(backend, lazy);
            for inner in coordinates(contracted_shape) {
                let mut coord0 = out_coord[..outer0].to_vec();
                coord0.extend_from_slice(&inner);
                let mut coord1 = inner.clone();
                coord1.extend_from_slice(&out_coord[outer0..]);

                let term = scalar_multiply(
                    &arg0[index_of(&coord0, shape0)],
                    &arg1[index_of(&coord1, shape1)],
                    backend,
                )?;
                acc.accumulate(term)?;
            }
            Ok(acc.finish(complex))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::create_backend;
    use crate::mod_chain::rescale_slots;
    use crate::plaintext::HEPlaintext;

    fn plain_slots(values: &[f64]) -> Vec<HEType> {
        values
            .iter()
            .map(|&v| HEType::from_plaintext(HEPlaintext::scalar(v), false))
            .collect()
    }

    #[test]
    fn test_plain_matmul() {
        let backend = create_backend("HE_SEAL").unwrap();
        let a = plain_slots(&[1.0, 2.0, 3.0, 4.0]);
        let b = plain_slots(&[5.0, 6.0, 7.0, 8.0]);

        let out = dot(
            &a,
            &b,
            &[2, 2],
            &[2, 2],
            &[2, 2],
            1,
            ElementType::F32,
            &backend,
            false,
        )
        .unwrap();
        let values: Vec<f64> = out.iter().map(|s| s.plaintext().unwrap()[0]).collect();
        assert_eq!(values, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_cipher_plain_matmul() {
        let backend = create_backend("HE_SEAL").unwrap();
        let a: Vec<HEType> = [1.0, 2.0, 3.0, 4.0]
            .iter()
            .map(|&v| {
                HEType::from_ciphertext(backend.encrypt_values(&[v], false).unwrap(), false)
            })
            .collect();
        let b = plain_slots(&[5.0, 6.0, 7.0, 8.0]);

        let mut out = dot(
            &a,
            &b,
            &[2, 2],
            &[2, 2],
            &[2, 2],
            1,
            ElementType::F32,
            &backend,
            false,
        )
        .unwrap();
        rescale_slots(&mut out, &backend).unwrap();

        let expected = [19.0, 22.0, 43.0, 50.0];
        for (slot, e) in out.iter().zip(&expected) {
            let got = backend.slot_host_values(slot, 1).unwrap()[0];
            assert!((got - e).abs() < 1e-2, "got {got}, expected {e}");
        }
    }

    #[test]
    fn test_vector_inner_product() {
        let backend = create_backend("HE_SEAL").unwrap();
        let a = plain_slots(&[1.0, 2.0, 3.0]);
        let b = plain_slots(&[4.0, 5.0, 6.0]);
        let out = dot(&a, &b, &[3], &[3], &[], 1, ElementType::F32, &backend, false).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].plaintext().unwrap()[0], 32.0);
    }
}
