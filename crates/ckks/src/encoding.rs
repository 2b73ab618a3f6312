//! Canonical-embedding encoder.
//!
//! Encode: slot values z ∈ C^{N/2} → m(X) = round(scale · σ^{-1}(z)) with the
//! embedding σ(m)_k = m(ζ^{2k+1}) at the odd powers of the primitive 2N-th
//! root ζ = e^{iπ/N}. Writing t_j = m_j ζ^j turns σ into a plain N-point DFT,
//! so both directions run through one radix-2 FFT plus a twist.
//!
//! Real batches fill the real lane of each slot. Complex packing folds value
//! pairs (v[2k], v[2k+1]) into one slot as re + im·i, doubling capacity.

use std::f64::consts::PI;
use std::sync::Arc;

use num_complex::Complex64;

use crate::ciphertext::Plaintext;
use crate::context::{CkksContext, ParmsId};
use crate::error::{CkksError, Result};
use crate::ntt::{ntt_forward, ntt_inverse};
use crate::poly::RnsPoly;

/// Decode reconstructs centered coefficients in i128; limbs are dropped until
/// the remaining modulus product fits this many bits.
const MAX_CRT_BITS: u32 = 126;

pub struct CkksEncoder {
    context: Arc<CkksContext>,
    n: usize,
    slots: usize,
    /// ζ^j for j in 0..N (forward twist).
    twist: Vec<Complex64>,
    /// ζ^{-j} for j in 0..N (inverse twist).
    twist_inv: Vec<Complex64>,
}

impl CkksEncoder {
    pub fn new(context: Arc<CkksContext>) -> Self {
        let n = context.poly_degree();
        let slots = n / 2;
        let twist: Vec<Complex64> = (0..n)
            .map(|j| Complex64::from_polar(1.0, PI * j as f64 / n as f64))
            .collect();
        let twist_inv: Vec<Complex64> = (0..n)
            .map(|j| Complex64::from_polar(1.0, -PI * j as f64 / n as f64))
            .collect();
        Self {
            context,
            n,
            slots,
            twist,
            twist_inv,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots
    }

    /// Maximum number of real values a single plaintext can carry.
    pub fn capacity(&self, complex_packing: bool) -> usize {
        if complex_packing {
            2 * self.slots
        } else {
            self.slots
        }
    }

    /// Encode complex slot values directly.
    pub fn encode_slots(
        &self,
        slots: &[Complex64],
        parms_id: ParmsId,
        scale: f64,
    ) -> Result<Plaintext> {
        if slots.len() > self.slots {
            return Err(CkksError::InvalidOperand(format!(
                "{} slot values exceed the {} available slots",
                slots.len(),
                self.slots
            )));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(CkksError::InvalidOperand(format!("invalid scale {scale}")));
        }
        let level = self.context.get_context_data(parms_id)?;

        // Conjugate-symmetric spectrum: evaluation points ζ^{2k+1} pair up as
        // k ↔ N-1-k under conjugation.
        let mut full = vec![Complex64::new(0.0, 0.0); self.n];
        for (k, z) in slots.iter().enumerate() {
            full[k] = *z;
            full[self.n - 1 - k] = z.conj();
        }

        fft_in_place(&mut full, true);

        // Coefficients must stay clear of both the modulus product (wraparound)
        // and the i128 rounding range.
        let q_product_f: f64 = level.moduli().iter().map(|m| m.value as f64).product();
        let coeff_bound = (q_product_f / 2.0).min(1.7e38);

        // Untwist and scale; the result is real up to rounding error.
        let mut poly = RnsPoly::zero(self.n, level.num_limbs());
        for j in 0..self.n {
            let coeff = (full[j] * self.twist_inv[j]).re * scale;
            if !coeff.is_finite() || coeff.abs() >= coeff_bound {
                return Err(CkksError::InvalidOperand(format!(
                    "encoded coefficient {coeff} is out of range at scale {scale}"
                )));
            }
            let rounded = coeff.round() as i128;
            for (l, m) in level.moduli().iter().enumerate() {
                let q = m.value as i128;
                let mut r = rounded % q;
                if r < 0 {
                    r += q;
                }
                poly.limbs[l][j] = r as u64;
            }
        }

        for (l, tables) in level.ntt_tables().iter().enumerate() {
            ntt_forward(&mut poly.limbs[l], tables);
        }

        Ok(Plaintext {
            poly,
            parms_id,
            scale,
        })
    }

    /// Encode a real batch, pairing values into complex lanes when packing.
    pub fn encode_real(
        &self,
        values: &[f64],
        parms_id: ParmsId,
        scale: f64,
        complex_packing: bool,
    ) -> Result<Plaintext> {
        if values.len() > self.capacity(complex_packing) {
            return Err(CkksError::InvalidOperand(format!(
                "{} values exceed capacity {}",
                values.len(),
                self.capacity(complex_packing)
            )));
        }
        let slots = if complex_packing {
            values
                .chunks(2)
                .map(|pair| Complex64::new(pair[0], *pair.get(1).unwrap_or(&0.0)))
                .collect::<Vec<_>>()
        } else {
            values
                .iter()
                .map(|&v| Complex64::new(v, 0.0))
                .collect::<Vec<_>>()
        };
        self.encode_slots(&slots, parms_id, scale)
    }

    /// Encode one value replicated across every slot. With `duplicate_imag`
    /// the imaginary lane receives the value too (additive broadcast under
    /// complex packing); without it the value sits in the real lane only
    /// (multiplicative broadcast).
    pub fn encode_fill(
        &self,
        value: f64,
        parms_id: ParmsId,
        scale: f64,
        duplicate_imag: bool,
    ) -> Result<Plaintext> {
        let imag = if duplicate_imag { value } else { 0.0 };
        let slots = vec![Complex64::new(value, imag); self.slots];
        self.encode_slots(&slots, parms_id, scale)
    }

    /// Decode complex slot values.
    pub fn decode_slots(&self, plain: &Plaintext, count: usize) -> Result<Vec<Complex64>> {
        if count > self.slots {
            return Err(CkksError::InvalidOperand(format!(
                "requested {count} slots, only {} available",
                self.slots
            )));
        }
        let level = self.context.get_context_data(plain.parms_id)?;

        let mut poly = plain.poly.clone();
        let mut moduli = level.moduli().to_vec();

        // Drop limbs until centered CRT fits i128. Coefficients of decrypted
        // data are far below the remaining modulus product, so the value is
        // preserved exactly.
        let mut total_bits: u32 = moduli.iter().map(|m| m.bits).sum();
        while total_bits > MAX_CRT_BITS && moduli.len() > 1 {
            total_bits -= moduli.last().unwrap().bits;
            moduli.pop();
            poly.drop_last_limb();
        }

        for (l, tables) in level.ntt_tables().iter().enumerate().take(moduli.len()) {
            ntt_inverse(&mut poly.limbs[l], tables);
        }

        let q_product: i128 = moduli.iter().map(|m| m.value as i128).product();
        let half_product = q_product / 2;

        let mut twisted = vec![Complex64::new(0.0, 0.0); self.n];
        for j in 0..self.n {
            let residues: Vec<u64> = (0..moduli.len()).map(|l| poly.limbs[l][j]).collect();
            let mut x = crt_reconstruct(&residues, &moduli);
            if x > half_product {
                x -= q_product;
            }
            let coeff = x as f64 / plain.scale;
            twisted[j] = self.twist[j] * coeff;
        }

        fft_in_place(&mut twisted, false);
        Ok(twisted[..count].to_vec())
    }

    /// Decode a real batch of `count` values.
    pub fn decode_real(
        &self,
        plain: &Plaintext,
        count: usize,
        complex_packing: bool,
    ) -> Result<Vec<f64>> {
        if count > self.capacity(complex_packing) {
            return Err(CkksError::InvalidOperand(format!(
                "requested {count} values, capacity is {}",
                self.capacity(complex_packing)
            )));
        }
        if complex_packing {
            let slots = self.decode_slots(plain, count.div_ceil(2))?;
            let mut out = Vec::with_capacity(count);
            for z in slots {
                out.push(z.re);
                if out.len() < count {
                    out.push(z.im);
                }
            }
            out.truncate(count);
            Ok(out)
        } else {
            let slots = self.decode_slots(plain, count)?;
            Ok(slots.into_iter().map(|z| z.re).collect())
        }
    }
}

/// Garner mixed-radix CRT reconstruction into [0, Πq).
fn crt_reconstruct(residues: &[u64], moduli: &[crate::modulus::Modulus]) -> i128 {
    let mut x: i128 = residues[0] as i128;
    let mut base: i128 = moduli[0].value as i128;
    for l in 1..moduli.len() {
        let q = moduli[l].value;
        let x_mod = (x % q as i128).rem_euclid(q as i128) as u64;
        let diff = crate::modulus::mod_sub(residues[l], x_mod, q);
        let base_mod = (base % q as i128) as u64;
        let base_inv = crate::modulus::mod_inv(base_mod, q);
        let digit = crate::modulus::mod_mul(diff, base_inv, q);
        x += digit as i128 * base;
        base *= q as i128;
    }
    x
}

/// Iterative radix-2 FFT. `forward` uses ω = e^{+2πi/n}; the inverse applies
/// ω^{-1} and the 1/n normalization.
fn fft_in_place(buf: &mut [Complex64], inverse: bool) {
    let n = buf.len();
    debug_assert!(n.is_power_of_two());

    // Bit-reversal permutation.
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buf.swap(i, j);
        }
    }

    let sign = if inverse { -1.0 } else { 1.0 };
    let mut len = 2;
    while len <= n {
        let angle = sign * 2.0 * PI / len as f64;
        let w_len = Complex64::from_polar(1.0, angle);
        for start in (0..n).step_by(len) {
            let mut w = Complex64::new(1.0, 0.0);
            for k in 0..len / 2 {
                let u = buf[start + k];
                let v = buf[start + k + len / 2] * w;
                buf[start + k] = u + v;
                buf[start + k + len / 2] = u - v;
                w *= w_len;
            }
        }
        len <<= 1;
    }

    if inverse {
        let inv_n = 1.0 / n as f64;
        for z in buf.iter_mut() {
            *z *= inv_n;
        }
    }
}
