//! The modulus-chain manager.
//!
//! CKKS addition requires both operands at the same chain position with equal
//! scales; multiplication doubles the scale and consumes a level on rescale.
//! These helpers keep mixed operands compatible across long op sequences:
//! infinitesimal scale drift is overwritten, a whole-prime scale gap is
//! closed by rescaling the larger operand one step, and anything else is a
//! hard `ScaleMismatch`.

use veilnn_ckks::Ciphertext;

use crate::backend::HeBackend;
use crate::error::{BackendError, Result};
use crate::he_type::HEType;

/// Drift tolerance on log2 scales; below this the scales are the same value
/// up to floating-point noise.
pub const SCALE_LOG2_EPS: f64 = 1e-4;

/// Snap window around the nominal scale after a rescale.
const SNAP_LOG2_EPS: f64 = 1e-2;

/// Bring two ciphertexts to a common chain position and scale.
pub fn match_modulus_and_scale_inplace(
    a: &mut Ciphertext,
    b: &mut Ciphertext,
    backend: &HeBackend,
) -> Result<()> {
    let evaluator = backend.evaluator();

    // A few reconciliation rounds suffice: each round either finishes or
    // consumes one chain level.
    for _ in 0..=backend.context().parms().coeff_modulus().len() {
        let ia = backend.chain_index(a)?;
        let ib = backend.chain_index(b)?;
        if ia > ib {
            evaluator.mod_switch_to_inplace(a, b.parms_id)?;
        } else if ib > ia {
            evaluator.mod_switch_to_inplace(b, a.parms_id)?;
        }

        let log_a = a.scale.log2();
        let log_b = b.scale.log2();
        if (log_a - log_b).abs() < SCALE_LOG2_EPS {
            a.scale = b.scale;
            return Ok(());
        }

        // A gap of exactly one chain prime: rescale the larger operand.
        let (larger, smaller_scale) = if log_a > log_b {
            (&mut *a, b.scale)
        } else {
            (&mut *b, a.scale)
        };
        let level = backend.context().get_context_data(larger.parms_id)?;
        let q_last = level.last_modulus().value as f64;
        let gap = (larger.scale / smaller_scale).log2();
        if (gap - q_last.log2()).abs() < SNAP_LOG2_EPS {
            evaluator.rescale_to_next_inplace(larger)?;
            snap_scale(larger, smaller_scale);
            continue;
        }

        return Err(BackendError::ScaleMismatch(format!(
            "scales 2^{log_a:.3} and 2^{log_b:.3} differ by neither drift nor a chain prime"
        )));
    }

    Err(BackendError::ScaleMismatch(
        "scale reconciliation did not converge".into(),
    ))
}

/// Clone-and-match: the kernel-facing form that leaves the stored operands
/// untouched for later consumers.
pub fn matched_pair(
    a: &Ciphertext,
    b: &Ciphertext,
    backend: &HeBackend,
) -> Result<(Ciphertext, Ciphertext)> {
    let mut a = a.clone();
    let mut b = b.clone();
    match_modulus_and_scale_inplace(&mut a, &mut b, backend)?;
    Ok((a, b))
}

/// Switch every ciphertext slot down to the smallest chain index present.
/// Plaintext slots are untouched. Returns `usize::MAX` when the slice holds
/// no ciphertexts.
pub fn match_to_smallest_chain_index(slots: &mut [HEType], backend: &HeBackend) -> Result<usize> {
    let mut smallest = usize::MAX;
    let mut target_parms = None;
    for slot in slots.iter() {
        if slot.is_ciphertext() {
            let cipher = slot.ciphertext()?;
            let index = backend.chain_index(cipher)?;
            if index < smallest {
                smallest = index;
                target_parms = Some(cipher.parms_id);
            }
        }
    }

    let Some(target) = target_parms else {
        return Ok(usize::MAX);
    };

    let evaluator = backend.evaluator();
    for slot in slots.iter_mut() {
        if slot.is_ciphertext() {
            let cipher = slot.ciphertext_mut()?;
            if cipher.parms_id != target {
                evaluator.mod_switch_to_inplace(cipher, target)?;
            }
        }
    }
    Ok(smallest)
}

/// Rescale one ciphertext and snap the result onto the nominal scale when
/// the drift is small, curbing accumulation of floating-point skew.
pub fn rescale_cipher(cipher: &mut Ciphertext, backend: &HeBackend) -> Result<()> {
    backend.evaluator().rescale_to_next_inplace(cipher)?;
    snap_scale(cipher, backend.scale());
    Ok(())
}

fn snap_scale(cipher: &mut Ciphertext, nominal: f64) {
    if (cipher.scale.log2() - nominal.log2()).abs() < SNAP_LOG2_EPS {
        cipher.scale = nominal;
    }
}

/// Rescale every ciphertext slot (the post-pass of multiplicative kernels).
pub fn rescale_slots(slots: &mut [HEType], backend: &HeBackend) -> Result<()> {
    for slot in slots.iter_mut() {
        if slot.is_ciphertext() {
            rescale_cipher(slot.ciphertext_mut()?, backend)?;
        }
    }
    Ok(())
}

/// Restore canonical residues on every ciphertext slot after lazy-modulus
/// accumulation.
pub fn mod_reduce_slots(slots: &mut [HEType], backend: &HeBackend) -> Result<()> {
    let evaluator = backend.evaluator();
    for slot in slots.iter_mut() {
        if slot.is_ciphertext() {
            evaluator.reduce_inplace(slot.ciphertext_mut()?)?;
        }
    }
    Ok(())
}

/// How many lazy additions fit before a 64-bit limb can wrap.
pub fn lazy_safe_bound(backend: &HeBackend) -> u64 {
    let max_bits = backend
        .context()
        .parms()
        .coeff_modulus()
        .iter()
        .map(|m| m.bits)
        .max()
        .unwrap_or(60);
    1u64.checked_shl(64 - max_bits).unwrap_or(u64::MAX)
}
