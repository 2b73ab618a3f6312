//! Element-wise minimum.

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::error::Result;
use crate::he_type::{check_complex_packing, HEType};
use crate::kernels::host_zip_slots;
use crate::plaintext::HEPlaintext;

pub fn scalar_minimum(
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
        let min: HEPlaintext = (0..len)
            .map(|i| pa.broadcast_get(i).min(pb.broadcast_get(i)))
            .collect();
        return Ok(HEType::from_plaintext(min, a.complex_packing()));
    }
    tracing::warn!("minimum over ciphertexts is not privacy-preserving");
    host_zip_slots(a, b, backend, values_per_slot, f64::min)
}

pub fn minimum(
    arg0: &[HEType],
    arg1: &[HEType],
    count: usize,
    backend: &HeBackend,
    values_per_slot: usize,
) -> Result<Vec<HEType>> {
    (0..count)
        .into_par_iter()
        .map(|i| scalar_minimum(&arg0[i], &arg1[i], backend, values_per_slot))
        .collect()
}
