//! Element-wise division.
//!
//! A plaintext divisor folds into a ciphertext multiply by reciprocals; a
//! ciphertext divisor is non-polynomial and falls back to the non-private
//! host path.

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::{check_complex_packing, HEType};
use crate::kernels::multiply::scalar_multiply;
use crate::kernels::host_zip_slots;
use crate::plaintext::HEPlaintext;

pub fn scalar_divide(
    a: &HEType,
    b: &HEType,
    backend: &HeBackend,
    values_per_slot: usize,
) -> Result<HEType> {
    check_complex_packing(a, b)?;
    let complex = a.complex_packing();

    match (a.is_ciphertext(), b.is_ciphertext()) {
        (true, false) => {
            let reciprocal: HEPlaintext = b.plaintext()?.iter().map(|&v| 1.0 / v).collect();
            scalar_multiply(
                a,
                &HEType::from_plaintext(reciprocal, complex),
                backend,
            )
        }
        (false, false) => {
            let pa = a.plaintext()?;
            let pb = b.plaintext()?;
            let quotient = if pa.len() == 1 {
                pb.iter().map(|&v| pa[0] / v).collect()
            } else if pb.len() == 1 {
                pa.iter().map(|&v| v / pb[0]).collect()
            } else {
                let len = pa.len().min(pb.len());
                (0..len).map(|i| pa[i] / pb[i]).collect()
            };
            Ok(HEType::from_plaintext(quotient, complex))
        }
        _ => {
            tracing::warn!("dividing by a ciphertext is not privacy-preserving");
            host_zip_slots(a, b, backend, values_per_slot, |x, y| x / y)
        }
    }
}

pub fn divide(
    arg0: &[HEType],
    arg1: &[HEType],
    count: usize,
    element_type: ElementType,
    backend: &HeBackend,
    values_per_slot: usize,
) -> Result<Vec<HEType>> {
    if !backend.is_supported_type(element_type) {
        return Err(BackendError::UnsupportedType(element_type.to_string()));
    }
    (0..count)
        .into_par_iter()
        .map(|i| scalar_divide(&arg0[i], &arg1[i], backend, values_per_slot))
        .collect()
}
