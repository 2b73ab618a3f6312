//! Homomorphic evaluation over ciphertexts and plaintexts.
//!
//! Scale discipline: addition demands equal chain position and equal scale;
//! multiplication multiplies scales and leaves a three-component ciphertext
//! that `relinearize_inplace` folds back to two. `rescale_to_next_inplace`
//! divides out the last chain prime exactly in RNS form.

use std::sync::Arc;

use crate::ciphertext::{Ciphertext, Plaintext};
use crate::context::{CkksContext, ContextData, ParmsId};
use crate::error::{CkksError, Result};
use crate::keys::RelinKeys;
use crate::modulus::{mod_add, mod_mul, mod_sub};
use crate::ntt::{ntt_forward, ntt_inverse};

/// Relative tolerance when comparing operand scales.
const SCALE_EPS: f64 = 1e-9;

pub fn scales_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= SCALE_EPS * a.abs().max(b.abs())
}

pub struct Evaluator {
    context: Arc<CkksContext>,
}

impl Evaluator {
    pub fn new(context: Arc<CkksContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<CkksContext> {
        &self.context
    }

    fn level(&self, parms_id: ParmsId) -> Result<&Arc<ContextData>> {
        self.context.get_context_data(parms_id)
    }

    fn check_pair(&self, a: &Ciphertext, b: &Ciphertext) -> Result<()> {
        if a.parms_id != b.parms_id {
            return Err(CkksError::ParmsMismatch);
        }
        if !scales_close(a.scale, b.scale) {
            return Err(CkksError::ScaleMismatch(a.scale, b.scale));
        }
        if a.size() != b.size() {
            return Err(CkksError::InvalidOperand(format!(
                "ciphertext sizes differ: {} vs {}",
                a.size(),
                b.size()
            )));
        }
        Ok(())
    }

    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        let mut out = a.clone();
        self.add_inplace(&mut out, b)?;
        Ok(out)
    }

    pub fn add_inplace(&self, a: &mut Ciphertext, b: &Ciphertext) -> Result<()> {
        self.check_pair(a, b)?;
        let moduli = self.level(a.parms_id)?.moduli().to_vec();
        for (ca, cb) in a.c.iter_mut().zip(&b.c) {
            ca.add_inplace(cb, &moduli);
        }
        Ok(())
    }

    /// Reduction-free accumulation: 64-bit limb sums without modular
    /// wraparound handling. Callers must keep the accumulation count under
    /// 2^(64 − modulus bits) and call `reduce_inplace` before any
    /// multiplicative use.
    pub fn add_lazy_inplace(&self, a: &mut Ciphertext, b: &Ciphertext) -> Result<()> {
        self.check_pair(a, b)?;
        for (ca, cb) in a.c.iter_mut().zip(&b.c) {
            ca.add_lazy_inplace(cb);
        }
        Ok(())
    }

    /// Restore canonical residues after lazy accumulation.
    pub fn reduce_inplace(&self, a: &mut Ciphertext) -> Result<()> {
        let moduli = self.level(a.parms_id)?.moduli().to_vec();
        for c in a.c.iter_mut() {
            c.reduce_inplace(&moduli);
        }
        Ok(())
    }

    pub fn sub(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        self.check_pair(a, b)?;
        let moduli = self.level(a.parms_id)?.moduli().to_vec();
        let c = a
            .c
            .iter()
            .zip(&b.c)
            .map(|(ca, cb)| ca.sub(cb, &moduli))
            .collect();
        Ok(Ciphertext {
            c,
            parms_id: a.parms_id,
            scale: a.scale,
            is_ntt_form: a.is_ntt_form,
        })
    }

    pub fn negate(&self, a: &Ciphertext) -> Result<Ciphertext> {
        let moduli = self.level(a.parms_id)?.moduli().to_vec();
        Ok(Ciphertext {
            c: a.c.iter().map(|p| p.negate(&moduli)).collect(),
            parms_id: a.parms_id,
            scale: a.scale,
            is_ntt_form: a.is_ntt_form,
        })
    }

    pub fn add_plain(&self, a: &Ciphertext, plain: &Plaintext) -> Result<Ciphertext> {
        let mut out = a.clone();
        self.add_plain_inplace(&mut out, plain)?;
        Ok(out)
    }

    pub fn add_plain_inplace(&self, a: &mut Ciphertext, plain: &Plaintext) -> Result<()> {
        if a.parms_id != plain.parms_id {
            return Err(CkksError::ParmsMismatch);
        }
        if !scales_close(a.scale, plain.scale) {
            return Err(CkksError::ScaleMismatch(a.scale, plain.scale));
        }
        let moduli = self.level(a.parms_id)?.moduli().to_vec();
        a.c[0].add_inplace(&plain.poly, &moduli);
        Ok(())
    }

    /// Ciphertext × plaintext product; the scale multiplies.
    pub fn multiply_plain(&self, a: &Ciphertext, plain: &Plaintext) -> Result<Ciphertext> {
        if a.parms_id != plain.parms_id {
            return Err(CkksError::ParmsMismatch);
        }
        let moduli = self.level(a.parms_id)?.moduli().to_vec();
        Ok(Ciphertext {
            c: a
                .c
                .iter()
                .map(|p| p.hadamard_mul(&plain.poly, &moduli))
                .collect(),
            parms_id: a.parms_id,
            scale: a.scale * plain.scale,
            is_ntt_form: a.is_ntt_form,
        })
    }

    /// Ciphertext × ciphertext tensor product. The result has three
    /// components; relinearize before further multiplications.
    pub fn multiply(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        if a.parms_id != b.parms_id {
            return Err(CkksError::ParmsMismatch);
        }
        if a.size() != 2 || b.size() != 2 {
            return Err(CkksError::InvalidOperand(
                "multiply expects relinearized (size-2) operands".into(),
            ));
        }
        let moduli = self.level(a.parms_id)?.moduli().to_vec();

        let d0 = a.c[0].hadamard_mul(&b.c[0], &moduli);
        let mut d1 = a.c[0].hadamard_mul(&b.c[1], &moduli);
        d1.add_inplace(&a.c[1].hadamard_mul(&b.c[0], &moduli), &moduli);
        let d2 = a.c[1].hadamard_mul(&b.c[1], &moduli);

        Ok(Ciphertext {
            c: vec![d0, d1, d2],
            parms_id: a.parms_id,
            scale: a.scale * b.scale,
            is_ntt_form: true,
        })
    }

    /// Fold the s² component through the relinearization keys.
    ///
    /// Each RNS limb of the third component is its own decomposition digit:
    /// digit j applies key j, whose limb i carries δ_ij·s² under the masking
    /// term, so the sum restores d2·s² with only per-digit noise.
    pub fn relinearize_inplace(&self, a: &mut Ciphertext, rlk: &RelinKeys) -> Result<()> {
        match a.size() {
            2 => return Ok(()),
            3 => {}
            other => {
                return Err(CkksError::InvalidOperand(format!(
                    "cannot relinearize ciphertext of size {other}"
                )))
            }
        }
        let level = self.level(a.parms_id)?.clone();
        let moduli = level.moduli();
        let num_limbs = level.num_limbs();
        if rlk.num_digits() < num_limbs {
            return Err(CkksError::MissingRelinKeys);
        }
        let n = a.poly_degree();

        let d2 = a.c.pop().expect("size checked above");

        for digit in 0..num_limbs {
            let (b_key, a_key) = &rlk.keys[digit];

            let mut digit_coeffs = d2.limbs[digit].clone();
            ntt_inverse(&mut digit_coeffs, &level.ntt_tables()[digit]);

            for i in 0..num_limbs {
                let q = moduli[i].value;
                let mut lifted: Vec<u64> = digit_coeffs.iter().map(|&v| v % q).collect();
                ntt_forward(&mut lifted, &level.ntt_tables()[i]);
                for t in 0..n {
                    a.c[0].limbs[i][t] = mod_add(
                        a.c[0].limbs[i][t],
                        mod_mul(lifted[t], b_key.limbs[i][t], q),
                        q,
                    );
                    a.c[1].limbs[i][t] = mod_add(
                        a.c[1].limbs[i][t],
                        mod_mul(lifted[t], a_key.limbs[i][t], q),
                        q,
                    );
                }
            }
        }
        Ok(())
    }

    /// Divide out the last chain prime; the scale divides with it.
    pub fn rescale_to_next_inplace(&self, a: &mut Ciphertext) -> Result<()> {
        let level = self.level(a.parms_id)?.clone();
        let next_id = level.next_parms_id.ok_or(CkksError::ChainExhausted)?;
        let moduli = level.moduli();
        let num_limbs = level.num_limbs();
        let q_last = level.last_modulus().value;
        let half_last = q_last / 2;
        let inv_last = level.inv_last_modulus();
        let n = a.poly_degree();

        for poly in a.c.iter_mut() {
            let mut last = poly.limbs[num_limbs - 1].clone();
            ntt_inverse(&mut last, &level.ntt_tables()[num_limbs - 1]);

            for i in 0..num_limbs - 1 {
                let q = moduli[i].value;
                // Centered lift of the dropped limb into limb i.
                let mut delta: Vec<u64> = last
                    .iter()
                    .map(|&v| {
                        if v > half_last {
                            let r = (q_last - v) % q;
                            if r == 0 {
                                0
                            } else {
                                q - r
                            }
                        } else {
                            v % q
                        }
                    })
                    .collect();
                ntt_forward(&mut delta, &level.ntt_tables()[i]);
                for t in 0..n {
                    poly.limbs[i][t] = mod_mul(
                        mod_sub(poly.limbs[i][t], delta[t], q),
                        inv_last[i],
                        q,
                    );
                }
            }
            poly.drop_last_limb();
        }

        a.parms_id = next_id;
        a.scale /= q_last as f64;
        Ok(())
    }

    /// Drop the last chain prime without touching the scale.
    pub fn mod_switch_to_next_inplace(&self, a: &mut Ciphertext) -> Result<()> {
        let level = self.level(a.parms_id)?;
        let next_id = level.next_parms_id.ok_or(CkksError::ChainExhausted)?;
        for poly in a.c.iter_mut() {
            poly.drop_last_limb();
        }
        a.parms_id = next_id;
        Ok(())
    }

    /// Switch down until the ciphertext sits at `target`.
    pub fn mod_switch_to_inplace(&self, a: &mut Ciphertext, target: ParmsId) -> Result<()> {
        let target_index = self.context.chain_index(target)?;
        let current_index = self.context.chain_index(a.parms_id)?;
        if target_index > current_index {
            return Err(CkksError::InvalidOperand(
                "cannot modulus-switch upward in the chain".into(),
            ));
        }
        while a.parms_id != target {
            self.mod_switch_to_next_inplace(a)?;
        }
        Ok(())
    }
}
