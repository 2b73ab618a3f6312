//! ReLU and bounded ReLU.
//!
//! The scalar plaintext routines are shared three ways: the local path for
//! plaintext slots during offload partitioning, the non-private server path
//! when no client is attached, and the client's evaluation of offloaded
//! batches.

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::error::Result;
use crate::he_type::HEType;
use crate::kernels::host_map_slot;
use crate::plaintext::HEPlaintext;

pub fn scalar_relu(plain: &HEPlaintext) -> HEPlaintext {
    plain.iter().map(|&v| v.max(0.0)).collect()
}

pub fn scalar_bounded_relu(plain: &HEPlaintext, alpha: f64) -> HEPlaintext {
    plain.iter().map(|&v| v.max(0.0).min(alpha)).collect()
}

/// Server-side ReLU without a client.
pub fn relu(
    arg: &[HEType],
    count: usize,
    backend: &HeBackend,
    values_per_slot: usize,
) -> Result<Vec<HEType>> {
    if arg[..count].iter().any(|slot| slot.is_ciphertext()) {
        tracing::warn!("relu over ciphertexts without a client is not privacy-preserving");
    }
    (0..count)
        .into_par_iter()
        .map(|i| host_map_slot(&arg[i], backend, values_per_slot, |v| v.max(0.0)))
        .collect()
}

/// Server-side bounded ReLU without a client.
pub fn bounded_relu(
    arg: &[HEType],
    count: usize,
    alpha: f64,
    backend: &HeBackend,
    values_per_slot: usize,
) -> Result<Vec<HEType>> {
    if arg[..count].iter().any(|slot| slot.is_ciphertext()) {
        tracing::warn!(
            "bounded relu over ciphertexts without a client is not privacy-preserving"
        );
    }
    (0..count)
        .into_par_iter()
        .map(|i| host_map_slot(&arg[i], backend, values_per_slot, |v| v.max(0.0).min(alpha)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::create_backend;

    #[test]
    fn test_scalar_routines() {
        let input = HEPlaintext::from_vec(vec![-1.0, 0.0, 2.0, 9.0]);
        assert_eq!(&scalar_relu(&input)[..], &[0.0, 0.0, 2.0, 9.0]);
        assert_eq!(&scalar_bounded_relu(&input, 6.0)[..], &[0.0, 0.0, 2.0, 6.0]);
    }

    #[test]
    fn test_relu_mixed_slots() {
        let backend = create_backend("HE_SEAL").unwrap();
        let arg = vec![
            HEType::from_ciphertext(backend.encrypt_values(&[-3.0], false).unwrap(), false),
            HEType::from_plaintext(HEPlaintext::scalar(4.0), false),
        ];
        let out = relu(&arg, 2, &backend, 1).unwrap();
        assert!(out[0].is_ciphertext());
        assert!(out[1].is_plaintext());
        assert!((backend.slot_host_values(&out[0], 1).unwrap()[0]).abs() < 1e-2);
        assert_eq!(&out[1].plaintext().unwrap()[..], &[4.0]);
    }
}
