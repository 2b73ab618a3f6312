//! Element-wise exponentiation (x^y).

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::{check_complex_packing, HEType};
use crate::kernels::host_zip_slots;
use crate::plaintext::HEPlaintext;

pub fn scalar_power(
    a: &HEType,
    b: &HEType,
    backend: &HeBackend,
    values_per_slot: usize,
) -> Result<HEType> {
    check_complex_packing(a, b)?;
    if a.is_plaintext() && b.is_plaintext() {
        let pa = a.plaintext()?;
        let pb = b.plaintext()?;
        let len = match (pa.len(), pb.len()) {
            (1, n) | (n, 1) => n,
            (n, m) => n.min(m),
        };
        let powered: HEPlaintext = (0..len)
            .map(|i| pa.broadcast_get(i).powf(pb.broadcast_get(i)))
            .collect();
        return Ok(HEType::from_plaintext(powered, a.complex_packing()));
    }
    tracing::warn!("power over ciphertexts is not privacy-preserving");
    host_zip_slots(a, b, backend, values_per_slot, f64::powf)
}

pub fn power(
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
        .map(|i| scalar_power(&arg0[i], &arg1[i], backend, values_per_slot))
        .collect()
}
