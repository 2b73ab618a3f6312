//! Element-wise natural exponential.

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::error::Result;
use crate::he_type::HEType;
use crate::kernels::host_map_slot;

pub fn exp(
    arg: &[HEType],
    count: usize,
    backend: &HeBackend,
    values_per_slot: usize,
) -> Result<Vec<HEType>> {
    if arg[..count].iter().any(|slot| slot.is_ciphertext()) {
        tracing::warn!("exp over ciphertexts is not privacy-preserving");
    }
    (0..count)
        .into_par_iter()
        .map(|i| host_map_slot(&arg[i], backend, values_per_slot, f64::exp))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::create_backend;
    use crate::plaintext::HEPlaintext;

    #[test]
    fn test_exp_plain() {
        let backend = create_backend("HE_SEAL").unwrap();
        let arg = vec![HEType::from_plaintext(
            HEPlaintext::from_vec(vec![0.0, 1.0]),
            false,
        )];
        let out = exp(&arg, 1, &backend, 2).unwrap();
        let values = out[0].plaintext().unwrap();
        assert!((values[0] - 1.0).abs() < 1e-9);
        assert!((values[1] - std::f64::consts::E).abs() < 1e-9);
    }
}
