//! Key material and key generation.
//!
//! Relinearization uses RNS-decomposition key switching: the key for digit j
//! satisfies, per limb i, `b_j = -(a_j·s + e_j) + δ_ij·s²`. Folding a
//! three-component ciphertext through these keys removes the s² term while
//! adding only per-digit noise.

use rand::Rng;

use crate::context::{CkksContext, ParmsId};
use crate::ntt::ntt_forward;
use crate::poly::RnsPoly;

/// Standard deviation of the error distribution.
const ERROR_STD_DEV: f64 = 3.2;

/// Secret key: ternary polynomial in NTT form over the full modulus chain.
#[derive(Debug, Clone)]
pub struct SecretKey {
    pub s: RnsPoly,
    pub parms_id: ParmsId,
}

/// Public encryption key (b, a) with b = -(a·s + e).
#[derive(Debug, Clone)]
pub struct PublicKey {
    pub b: RnsPoly,
    pub a: RnsPoly,
    pub parms_id: ParmsId,
}

/// Relinearization keys, one digit per modulus in the full chain.
#[derive(Debug, Clone)]
pub struct RelinKeys {
    /// keys[j] = (b_j, a_j).
    pub keys: Vec<(RnsPoly, RnsPoly)>,
    pub parms_id: ParmsId,
}

impl RelinKeys {
    pub fn num_digits(&self) -> usize {
        self.keys.len()
    }
}

/// Generates a secret key on construction; public and relinearization keys on
/// demand. Lives client-side; the server only ever sees the derived keys.
pub struct KeyGenerator {
    context: std::sync::Arc<CkksContext>,
    secret_key: SecretKey,
}

impl KeyGenerator {
    pub fn new<R: Rng>(context: std::sync::Arc<CkksContext>, rng: &mut R) -> Self {
        let first = context
            .get_context_data(context.first_parms_id())
            .expect("context always contains its first level");
        let n = context.poly_degree();
        let num_limbs = first.num_limbs();

        let ternary = sample_ternary(rng, n);
        let mut s = RnsPoly::zero(n, num_limbs);
        for (l, m) in first.moduli().iter().enumerate() {
            let q = m.value;
            for i in 0..n {
                s.limbs[l][i] = match ternary[i] {
                    -1 => q - 1,
                    0 => 0,
                    _ => 1,
                };
            }
            ntt_forward(&mut s.limbs[l], &first.ntt_tables()[l]);
        }

        let secret_key = SecretKey {
            s,
            parms_id: first.parms_id,
        };
        Self {
            context,
            secret_key,
        }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn create_public_key<R: Rng>(&self, rng: &mut R) -> PublicKey {
        let first = self
            .context
            .get_context_data(self.context.first_parms_id())
            .expect("context always contains its first level");
        let n = self.context.poly_degree();
        let moduli = first.moduli();

        let a = sample_uniform_ntt(rng, n, moduli);
        let e = sample_error_ntt(rng, n, first);

        // b = -(a·s + e)
        let mut b = a.hadamard_mul(&self.secret_key.s, moduli);
        b.add_inplace(&e, moduli);
        let b = b.negate(moduli);

        PublicKey {
            b,
            a,
            parms_id: first.parms_id,
        }
    }

    pub fn create_relin_keys<R: Rng>(&self, rng: &mut R) -> RelinKeys {
        let first = self
            .context
            .get_context_data(self.context.first_parms_id())
            .expect("context always contains its first level");
        let n = self.context.poly_degree();
        let moduli = first.moduli();
        let num_limbs = moduli.len();

        let s2 = self
            .secret_key
            .s
            .hadamard_mul(&self.secret_key.s, moduli);

        let mut keys = Vec::with_capacity(num_limbs);
        for digit in 0..num_limbs {
            let a_j = sample_uniform_ntt(rng, n, moduli);
            let e_j = sample_error_ntt(rng, n, first);

            let mut b_j = a_j.hadamard_mul(&self.secret_key.s, moduli);
            b_j.add_inplace(&e_j, moduli);
            let mut b_j = b_j.negate(moduli);

            // Gadget indicator: the digit's own limb carries s².
            let q = moduli[digit].value;
            for i in 0..n {
                b_j.limbs[digit][i] = crate::modulus::mod_add(
                    b_j.limbs[digit][i],
                    s2.limbs[digit][i],
                    q,
                );
            }

            keys.push((b_j, a_j));
        }

        RelinKeys {
            keys,
            parms_id: first.parms_id,
        }
    }
}

/// Ternary coefficients in {-1, 0, 1}.
fn sample_ternary<R: Rng>(rng: &mut R, n: usize) -> Vec<i8> {
    (0..n).map(|_| rng.gen_range(-1i8..=1)).collect()
}

/// Uniform polynomial, sampled directly in the NTT domain (the transform is a
/// bijection, so NTT-domain uniform equals coefficient-domain uniform).
fn sample_uniform_ntt<R: Rng>(
    rng: &mut R,
    n: usize,
    moduli: &[crate::modulus::Modulus],
) -> RnsPoly {
    let mut poly = RnsPoly::zero(n, moduli.len());
    for (l, m) in moduli.iter().enumerate() {
        for i in 0..n {
            poly.limbs[l][i] = rng.gen_range(0..m.value);
        }
    }
    poly
}

/// Centered gaussian error polynomial, transformed to the NTT domain.
fn sample_error_ntt<R: Rng>(rng: &mut R, n: usize, level: &crate::context::ContextData) -> RnsPoly {
    let errors: Vec<i64> = (0..n).map(|_| sample_gaussian_i64(rng)).collect();
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

/// Box-Muller gaussian rounded to the nearest integer, truncated at 6σ.
fn sample_gaussian_i64<R: Rng>(rng: &mut R) -> i64 {
    loop {
        let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        let u2: f64 = rng.gen_range(0.0..1.0);
        let mag = ERROR_STD_DEV * (-2.0 * u1.ln()).sqrt();
        let value = mag * (2.0 * std::f64::consts::PI * u2).cos();
        if value.abs() <= 6.0 * ERROR_STD_DEV {
            return value.round() as i64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::EncryptionParameters;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn context() -> std::sync::Arc<CkksContext> {
        let parms = EncryptionParameters::new(1024, &[30, 30, 30]).unwrap();
        CkksContext::new(parms, 0).unwrap()
    }

    #[test]
    fn test_keygen_shapes() {
        let ctx = context();
        let mut rng = StdRng::seed_from_u64(7);
        let keygen = KeyGenerator::new(ctx.clone(), &mut rng);
        let pk = keygen.create_public_key(&mut rng);
        let rlk = keygen.create_relin_keys(&mut rng);

        assert_eq!(keygen.secret_key().s.num_limbs(), 3);
        assert_eq!(pk.b.num_limbs(), 3);
        assert_eq!(rlk.num_digits(), 3);
        assert_eq!(pk.parms_id, ctx.first_parms_id());
    }

    #[test]
    fn test_public_key_relation() {
        // b + a·s must decrypt to pure (negated) noise: small coefficients.
        let ctx = context();
        let mut rng = StdRng::seed_from_u64(11);
        let keygen = KeyGenerator::new(ctx.clone(), &mut rng);
        let pk = keygen.create_public_key(&mut rng);

        let first = ctx.get_context_data(ctx.first_parms_id()).unwrap();
        let moduli = first.moduli();
        let mut noise = pk.a.hadamard_mul(&keygen.secret_key().s, moduli);
        noise.add_inplace(&pk.b, moduli);

        let q0 = moduli[0].value;
        let mut limb0 = noise.limbs[0].clone();
        crate::ntt::ntt_inverse(&mut limb0, &first.ntt_tables()[0]);
        for &c in &limb0 {
            let centered = if c > q0 / 2 { q0 as i64 - c as i64 } else { c as i64 };
            assert!(
                centered.unsigned_abs() < 64,
                "public key noise coefficient {centered} too large"
            );
        }
    }

    #[test]
    fn test_gaussian_bounded() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10_000 {
            let e = sample_gaussian_i64(&mut rng);
            assert!(e.abs() <= (6.0 * ERROR_STD_DEV) as i64 + 1);
        }
    }
}
