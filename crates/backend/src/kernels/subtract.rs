//! Element-wise subtraction.

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::{check_complex_packing, HEType};
use crate::kernels::add::encode_against;
use crate::mod_chain::matched_pair;
use crate::plaintext::HEPlaintext;

pub fn scalar_subtract(a: &HEType, b: &HEType, backend: &HeBackend) -> Result<HEType> {
    check_complex_packing(a, b)?;
    let complex = a.complex_packing();

    match (a.is_ciphertext(), b.is_ciphertext()) {
        (true, true) => {
            let (lhs, rhs) = matched_pair(a.ciphertext()?, b.ciphertext()?, backend)?;
            let diff = backend.evaluator().sub(&lhs, &rhs)?;
            Ok(HEType::from_ciphertext(diff, complex))
        }
        (true, false) => {
            let plain = b.plaintext()?;
            if plain.is_zero() {
                return Ok(HEType::from_ciphertext(a.ciphertext()?.clone(), complex));
            }
            let negated: HEPlaintext = plain.iter().map(|&v| -v).collect();
            let cipher = a.ciphertext()?;
            let encoded = encode_against(&negated, cipher, backend, complex)?;
            let diff = backend.evaluator().add_plain(cipher, &encoded)?;
            Ok(HEType::from_ciphertext(diff, complex))
        }
        (false, true) => {
            // a - b = (-b) + a
            let cipher = b.ciphertext()?;
            let negated = backend.evaluator().negate(cipher)?;
            let plain = a.plaintext()?;
            if plain.is_zero() {
                return Ok(HEType::from_ciphertext(negated, complex));
            }
            let encoded = encode_against(plain, &negated, backend, complex)?;
            let diff = backend.evaluator().add_plain(&negated, &encoded)?;
            Ok(HEType::from_ciphertext(diff, complex))
        }
        (false, false) => {
            let pa = a.plaintext()?;
            let pb = b.plaintext()?;
            let diff = if pa.len() == 1 {
                pb.iter().map(|&v| pa[0] - v).collect()
            } else if pb.len() == 1 {
                pa.iter().map(|&v| v - pb[0]).collect()
            } else {
                let len = pa.len().min(pb.len());
                (0..len).map(|i| pa[i] - pb[i]).collect()
            };
            Ok(HEType::from_plaintext(diff, complex))
        }
    }
}

pub fn subtract(
    arg0: &[HEType],
    arg1: &[HEType],
    count: usize,
    element_type: ElementType,
    backend: &HeBackend,
) -> Result<Vec<HEType>> {
    if !backend.is_supported_type(element_type) {
        return Err(BackendError::UnsupportedType(element_type.to_string()));
    }
    (0..count)
        .into_par_iter()
        .map(|i| scalar_subtract(&arg0[i], &arg1[i], backend))
        .collect()
}
