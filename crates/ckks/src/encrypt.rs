//! Public-key encryption and secret-key decryption.

use rand::Rng;
use std::sync::Arc;

use crate::ciphertext::{Ciphertext, Plaintext};
use crate::context::CkksContext;
use crate::error::{CkksError, Result};
use crate::keys::{PublicKey, SecretKey};
use crate::ntt::ntt_forward;
use crate::poly::RnsPoly;

pub struct Encryptor {
    context: Arc<CkksContext>,
    public_key: PublicKey,
}

impl Encryptor {
    pub fn new(context: Arc<CkksContext>, public_key: PublicKey) -> Result<Self> {
        if public_key.parms_id != context.first_parms_id() {
            return Err(CkksError::InvalidOperand(
                "public key does not belong to this context".into(),
            ));
        }
        Ok(Self {
            context,
            public_key,
        })
    }

    /// Encrypt an encoded plaintext at its own chain position.
    ///
    /// `ct = (b·u + e0 + m, a·u + e1)` with ternary u and gaussian errors;
    /// the top-level public key applies at lower levels limb-by-limb.
    pub fn encrypt<R: Rng>(&self, plain: &Plaintext, rng: &mut R) -> Result<Ciphertext> {
        let level = self.context.get_context_data(plain.parms_id)?;
        let n = self.context.poly_degree();
        let num_limbs = level.num_limbs();
        let moduli = level.moduli();

        let ternary: Vec<i8> = (0..n).map(|_| rng.gen_range(-1i8..=1)).collect();
        let mut u = RnsPoly::zero(n, num_limbs);
        for (l, m) in moduli.iter().enumerate() {
            let q = m.value;
            for i in 0..n {
                u.limbs[l][i] = match ternary[i] {
                    -1 => q - 1,
                    0 => 0,
                    _ => 1,
                };
            }
            ntt_forward(&mut u.limbs[l], &level.ntt_tables()[l]);
        }

        let e0 = sample_error(rng, n, level);
        let e1 = sample_error(rng, n, level);

        let mut c0 = self.public_key.b.truncated(num_limbs);
        c0.hadamard_mul_inplace(&u, moduli);
        c0.add_inplace(&e0, moduli);
        c0.add_inplace(&plain.poly, moduli);

        let mut c1 = self.public_key.a.truncated(num_limbs);
        c1.hadamard_mul_inplace(&u, moduli);
        c1.add_inplace(&e1, moduli);

        Ok(Ciphertext {
            c: vec![c0, c1],
            parms_id: plain.parms_id,
            scale: plain.scale,
            is_ntt_form: true,
        })
    }
}

pub struct Decryptor {
    context: Arc<CkksContext>,
    secret_key: SecretKey,
}

impl Decryptor {
    pub fn new(context: Arc<CkksContext>, secret_key: SecretKey) -> Result<Self> {
        if secret_key.parms_id != context.first_parms_id() {
            return Err(CkksError::InvalidOperand(
                "secret key does not belong to this context".into(),
            ));
        }
        Ok(Self {
            context,
            secret_key,
        })
    }

    /// Decrypt Σ c_k·s^k. Handles the transient three-component form so a
    /// caller may decrypt before relinearizing.
    pub fn decrypt(&self, cipher: &Ciphertext) -> Result<Plaintext> {
        if !cipher.is_ntt_form {
            return Err(CkksError::InvalidOperand(
                "ciphertext must be in NTT form".into(),
            ));
        }
        if !(2..=3).contains(&cipher.size()) {
            return Err(CkksError::InvalidOperand(format!(
                "cannot decrypt ciphertext of size {}",
                cipher.size()
            )));
        }
        let level = self.context.get_context_data(cipher.parms_id)?;
        let moduli = level.moduli();
        let num_limbs = level.num_limbs();

        let s = self.secret_key.s.truncated(num_limbs);
        let mut acc = cipher.c[0].clone();
        let c1s = cipher.c[1].hadamard_mul(&s, moduli);
        acc.add_inplace(&c1s, moduli);
        if cipher.size() == 3 {
            let s2 = s.hadamard_mul(&s, moduli);
            let c2s2 = cipher.c[2].hadamard_mul(&s2, moduli);
            acc.add_inplace(&c2s2, moduli);
        }

        Ok(Plaintext {
            poly: acc,
            parms_id: cipher.parms_id,
            scale: cipher.scale,
        })
    }
}

fn sample_error<R: Rng>(rng: &mut R, n: usize, level: &crate::context::ContextData) -> RnsPoly {
    const STD_DEV: f64 = 3.2;
    let errors: Vec<i64> = (0..n)
        .map(|_| loop {
            let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
            let u2: f64 = rng.gen_range(0.0..1.0);
            let value =
                STD_DEV * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            if value.abs() <= 6.0 * STD_DEV {
                break value.round() as i64;
            }
        })
        .collect();

    let mut poly = RnsPoly::zero(n, level.num_limbs());
    for (l, m) in level.moduli().iter().enumerate() {
        let q = m.value;
        for i in 0..n {
            let e = errors[i];
            poly.limbs[l][i] = if e >= 0 {
                e as u64 % q
            } else {
                q - ((-e) as u64 % q)
            };
        }
        ntt_forward(&mut poly.limbs[l], &level.ntt_tables()[l]);
    }
    poly
}
