//! Batch normalization, inference form.
//!
//! Folds the affine transform into per-channel plaintext constants
//! `alpha = γ / √(σ² + ε)` and `bias = β − μ·alpha`, so each slot costs one
//! cipher-plain multiply and one cipher-plain add.

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::error::{BackendError, Result};
use crate::he_type::HEType;
use crate::kernels::add::scalar_add;
use crate::kernels::multiply::scalar_multiply;
use crate::kernels::{coordinates, index_of};
use crate::plaintext::HEPlaintext;

#[allow(clippy::too_many_arguments)]
pub fn batch_norm_inference(
    eps: f64,
    gamma: &[HEType],
    beta: &[HEType],
    input: &[HEType],
    mean: &[HEType],
    variance: &[HEType],
    in_shape: &[usize],
    backend: &HeBackend,
) -> Result<Vec<HEType>> {
    let channels = in_shape[1];
    let mut alphas = Vec::with_capacity(channels);
    let mut biases = Vec::with_capacity(channels);
    for c in 0..channels {
        let g = channel_value(gamma, c)?;
        let b = channel_value(beta, c)?;
        let m = channel_value(mean, c)?;
        let v = channel_value(variance, c)?;
        let alpha = g / (v + eps).sqrt();
        alphas.push(alpha);
        biases.push(b - m * alpha);
    }

    let coords = coordinates(in_shape);
    coords
        .par_iter()
        .map(|coord| {
            let c = coord[1];
            let complex = input[index_of(coord, in_shape)].complex_packing();
            let scaled = scalar_multiply(
                &input[index_of(coord, in_shape)],
                &HEType::from_plaintext(HEPlaintext::scalar(alphas[c]), complex),
                backend,
            )?;
            scalar_add(
                &scaled,
                &HEType::from_plaintext(HEPlaintext::scalar(biases[c]), complex),
                backend,
                false,
            )
        })
        .collect()
}

/// Statistics arrive as plaintext per-channel vectors; an encrypted statistic
/// cannot be folded into constants.
fn channel_value(stats: &[HEType], channel: usize) -> Result<f64> {
    let slot = stats.get(channel).ok_or_else(|| {
        BackendError::ShapeMismatch(format!("missing channel {channel} statistic"))
    })?;
    if !slot.is_plaintext() {
        return Err(BackendError::UnsupportedOp(
            "batch norm statistics must be plaintext".into(),
        ));
    }
    Ok(slot.plaintext()?.broadcast_get(0))
}
