//! Element-wise multiplication.
//!
//! Ciphertext products are relinearized immediately; rescaling happens once
//! in the executor's post-pass so accumulation kernels can sum products at
//! the doubled scale first.

use num_complex::Complex64;
use rayon::prelude::*;

use veilnn_ckks::Plaintext;

use crate::backend::HeBackend;
use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::{check_complex_packing, HEType};
use crate::mod_chain::matched_pair;
use crate::plaintext::HEPlaintext;

/// Encode a multiplicative plaintext operand. Multipliers live in the real
/// lane only: a complex-packed slot (a + bi) scales both batch lanes by a
/// real v, and a vector operand pairs one multiplier per lane the same way
/// the data was packed.
fn encode_multiplier(
    plain: &HEPlaintext,
    cipher: &veilnn_ckks::Ciphertext,
    backend: &HeBackend,
    complex_packing: bool,
) -> Result<Plaintext> {
    if plain.len() == 1 {
        return Ok(backend.encoder().encode_fill(
            plain[0],
            cipher.parms_id,
            cipher.scale,
            false,
        )?);
    }
    if !complex_packing {
        return Ok(backend
            .encoder()
            .encode_real(plain, cipher.parms_id, cipher.scale, false)?);
    }
    // Pairwise-equal multipliers still act as one real value per slot;
    // anything else would mix the two lanes.
    let slots: Result<Vec<Complex64>> = plain
        .chunks(2)
        .map(|pair| {
            let hi = *pair.get(1).unwrap_or(&pair[0]);
            if (pair[0] - hi).abs() > f64::EPSILON {
                return Err(BackendError::UnsupportedOp(
                    "complex-packed multiply requires a scalar multiplier per slot".into(),
                ));
            }
            Ok(Complex64::new(pair[0], 0.0))
        })
        .collect();
    Ok(backend
        .encoder()
        .encode_slots(&slots?, cipher.parms_id, cipher.scale)?)
}

pub fn scalar_multiply(a: &HEType, b: &HEType, backend: &HeBackend) -> Result<HEType> {
    check_complex_packing(a, b)?;
    let complex = a.complex_packing();

    match (a.is_ciphertext(), b.is_ciphertext()) {
        (true, true) => {
            let (lhs, rhs) = matched_pair(a.ciphertext()?, b.ciphertext()?, backend)?;
            let mut prod = backend.evaluator().multiply(&lhs, &rhs)?;
            backend
                .evaluator()
                .relinearize_inplace(&mut prod, &backend.relin_keys())?;
            Ok(HEType::from_ciphertext(prod, complex))
        }
        (true, false) => multiply_cipher_plain(a.ciphertext()?, b.plaintext()?, backend, complex),
        (false, true) => multiply_cipher_plain(b.ciphertext()?, a.plaintext()?, backend, complex),
        (false, false) => Ok(HEType::from_plaintext(
            multiply_plain_plain(a.plaintext()?, b.plaintext()?),
            complex,
        )),
    }
}

fn multiply_cipher_plain(
    cipher: &veilnn_ckks::Ciphertext,
    plain: &HEPlaintext,
    backend: &HeBackend,
    complex: bool,
) -> Result<HEType> {
    // Multiplicative identities cost nothing.
    if plain.is_scalar(1.0) {
        return Ok(HEType::from_ciphertext(cipher.clone(), complex));
    }
    if plain.is_scalar(-1.0) {
        let negated = backend.evaluator().negate(cipher)?;
        return Ok(HEType::from_ciphertext(negated, complex));
    }
    if plain.is_zero() {
        return Ok(HEType::from_plaintext(HEPlaintext::scalar(0.0), complex));
    }
    let encoded = encode_multiplier(plain, cipher, backend, complex)?;
    let prod = backend.evaluator().multiply_plain(cipher, &encoded)?;
    Ok(HEType::from_ciphertext(prod, complex))
}

pub(crate) fn multiply_plain_plain(a: &HEPlaintext, b: &HEPlaintext) -> HEPlaintext {
    if a.len() == 1 {
        b.iter().map(|&v| v * a[0]).collect()
    } else if b.len() == 1 {
        a.iter().map(|&v| v * b[0]).collect()
    } else {
        let len = a.len().min(b.len());
        (0..len).map(|i| a[i] * b[i]).collect()
    }
}

pub fn multiply(
    arg0: &[HEType],
    arg1: &[HEType],
    count: usize,
    element_type: ElementType,
    backend: &HeBackend,
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
        .map(|i| scalar_multiply(&arg0[i], &arg1[i], backend))
        .collect()
}
