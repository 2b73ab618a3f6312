//! Element-wise addition.

use rayon::prelude::*;

use veilnn_ckks::Plaintext;

use crate::backend::HeBackend;
use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::{check_complex_packing, HEType};
use crate::mod_chain::matched_pair;
use crate::plaintext::HEPlaintext;

/// Encode a plaintext operand against a ciphertext's chain position and
/// scale. Scalars broadcast across every slot lane; under complex packing an
/// additive broadcast must land in both lanes.
pub(crate) fn encode_against(
    plain: &HEPlaintext,
    cipher: &veilnn_ckks::Ciphertext,
    backend: &HeBackend,
    complex_packing: bool,
) -> Result<Plaintext> {
    if plain.len() == 1 {
        Ok(backend.encoder().encode_fill(
            plain[0],
            cipher.parms_id,
            cipher.scale,
            complex_packing,
        )?)
    } else {
        Ok(backend.encoder().encode_real(
            plain,
            cipher.parms_id,
            cipher.scale,
            complex_packing,
        )?)
    }
}

pub fn scalar_add(a: &HEType, b: &HEType, backend: &HeBackend, lazy: bool) -> Result<HEType> {
    check_complex_packing(a, b)?;
    let complex = a.complex_packing();

    match (a.is_ciphertext(), b.is_ciphertext()) {
        (true, true) => {
            let (mut lhs, rhs) = matched_pair(a.ciphertext()?, b.ciphertext()?, backend)?;
            if lazy {
                backend.evaluator().add_lazy_inplace(&mut lhs, &rhs)?;
            } else {
                backend.evaluator().add_inplace(&mut lhs, &rhs)?;
            }
            Ok(HEType::from_ciphertext(lhs, complex))
        }
        (true, false) => add_cipher_plain(a.ciphertext()?, b.plaintext()?, backend, complex),
        (false, true) => add_cipher_plain(b.ciphertext()?, a.plaintext()?, backend, complex),
        (false, false) => Ok(HEType::from_plaintext(
            add_plain_plain(a.plaintext()?, b.plaintext()?),
            complex,
        )),
    }
}

fn add_cipher_plain(
    cipher: &veilnn_ckks::Ciphertext,
    plain: &HEPlaintext,
    backend: &HeBackend,
    complex: bool,
) -> Result<HEType> {
    // The additive identity costs nothing.
    if plain.is_zero() {
        return Ok(HEType::from_ciphertext(cipher.clone(), complex));
    }
    let encoded = encode_against(plain, cipher, backend, complex)?;
    let sum = backend.evaluator().add_plain(cipher, &encoded)?;
    Ok(HEType::from_ciphertext(sum, complex))
}

pub(crate) fn add_plain_plain(a: &HEPlaintext, b: &HEPlaintext) -> HEPlaintext {
    if a.len() == 1 {
        b.iter().map(|&v| v + a[0]).collect()
    } else if b.len() == 1 {
        a.iter().map(|&v| v + b[0]).collect()
    } else {
        let len = a.len().min(b.len());
        (0..len).map(|i| a[i] + b[i]).collect()
    }
}

/// Slot-parallel addition over `count` elements.
pub fn add(
    arg0: &[HEType],
    arg1: &[HEType],
    count: usize,
    element_type: ElementType,
    backend: &HeBackend,
    lazy: bool,
) -> Result<Vec<HEType>> {
    if !backend.is_supported_type(element_type) {
        return Err(BackendError::UnsupportedType(element_type.to_string()));
    }
    if count > arg0.len() || count > arg1.len() {
        return Err(BackendError::ShapeMismatch(format!(
            "count {count} exceeds operand sizes {} and {}",
            arg0.len(),
            arg1.len()
        )));
    }
    (0..count)
        .into_par_iter()
        .map(|i| scalar_add(&arg0[i], &arg1[i], backend, lazy))
        .collect()
}
