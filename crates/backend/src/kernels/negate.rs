//! Element-wise negation.

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::HEType;
use crate::plaintext::HEPlaintext;

pub fn scalar_negate(a: &HEType, backend: &HeBackend) -> Result<HEType> {
    let complex = a.complex_packing();
    if a.is_ciphertext() {
        let negated = backend.evaluator().negate(a.ciphertext()?)?;
        Ok(HEType::from_ciphertext(negated, complex))
    } else {
        let negated: HEPlaintext = a.plaintext()?.iter().map(|&v| -v).collect();
        Ok(HEType::from_plaintext(negated, complex))
    }
}

pub fn negate(
    arg: &[HEType],
    count: usize,
    element_type: ElementType,
    backend: &HeBackend,
) -> Result<Vec<HEType>> {
    if !backend.is_supported_type(element_type) {
        return Err(BackendError::UnsupportedType(element_type.to_string()));
    }
    (0..count)
        .into_par_iter()
        .map(|i| scalar_negate(&arg[i], backend))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::create_backend;

    #[test]
    fn test_negate_cipher_and_plain() {
        let backend = create_backend("HE_SEAL").unwrap();
        let cipher = HEType::from_ciphertext(
            backend.encrypt_values(&[1.5, -2.0], false).unwrap(),
            false,
        );
        let plain = HEType::from_plaintext(HEPlaintext::from_vec(vec![1.5, -2.0]), false);

        for slot in [&cipher, &plain] {
            let negated = scalar_negate(slot, &backend).unwrap();
            let values = backend.slot_host_values(&negated, 2).unwrap();
            assert!((values[0] + 1.5).abs() < 1e-2);
            assert!((values[1] - 2.0).abs() < 1e-2);
        }
    }
}
