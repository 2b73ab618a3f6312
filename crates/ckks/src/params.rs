//! Encryption parameters: polynomial degree and the ordered modulus chain.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{CkksError, Result};
use crate::modulus::{find_primes, is_prime, Modulus};

/// Polynomial degrees accepted by the scheme.
pub const VALID_POLY_DEGREES: [u64; 6] = [1024, 2048, 4096, 8192, 16384, 32768];

/// Immutable CKKS encryption parameters.
///
/// The coefficient modulus is an ordered list of NTT-friendly primes; the
/// modulus chain is formed by truncating it from the back, one prime per
/// level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionParameters {
    poly_modulus_degree: u64,
    coeff_modulus: Vec<Modulus>,
}

impl EncryptionParameters {
    /// Build parameters from modulus bit sizes, generating the primes.
    pub fn new(poly_modulus_degree: u64, coeff_modulus_bits: &[u32]) -> Result<Self> {
        let coeff_modulus = find_primes(coeff_modulus_bits, poly_modulus_degree)?;
        Self::from_moduli(poly_modulus_degree, coeff_modulus)
    }

    /// Build parameters from explicit moduli (used by deserialization).
    pub fn from_moduli(poly_modulus_degree: u64, coeff_modulus: Vec<Modulus>) -> Result<Self> {
        if !VALID_POLY_DEGREES.contains(&poly_modulus_degree) {
            return Err(CkksError::InvalidParameters(format!(
                "poly_modulus_degree must be one of {VALID_POLY_DEGREES:?}, got {poly_modulus_degree}"
            )));
        }
        if coeff_modulus.is_empty() {
            return Err(CkksError::InvalidParameters(
                "coeff_modulus must not be empty".into(),
            ));
        }
        let two_n = 2 * poly_modulus_degree;
        let mut seen = Vec::with_capacity(coeff_modulus.len());
        for m in &coeff_modulus {
            if !is_prime(m.value) || m.value % two_n != 1 {
                return Err(CkksError::InvalidParameters(format!(
                    "modulus {} is not an NTT-friendly prime for degree {poly_modulus_degree}",
                    m.value
                )));
            }
            if seen.contains(&m.value) {
                return Err(CkksError::InvalidParameters(format!(
                    "duplicate modulus {}",
                    m.value
                )));
            }
            seen.push(m.value);
        }
        Ok(Self {
            poly_modulus_degree,
            coeff_modulus,
        })
    }

    pub fn poly_modulus_degree(&self) -> u64 {
        self.poly_modulus_degree
    }

    pub fn coeff_modulus(&self) -> &[Modulus] {
        &self.coeff_modulus
    }

    pub fn slot_count(&self) -> usize {
        (self.poly_modulus_degree / 2) as usize
    }

    pub fn total_coeff_modulus_bits(&self) -> u32 {
        self.coeff_modulus.iter().map(|m| m.bits).sum()
    }

    /// Serialize to the native binary form: degree, limb count, limb values.
    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u64::<LittleEndian>(self.poly_modulus_degree)?;
        w.write_u64::<LittleEndian>(self.coeff_modulus.len() as u64)?;
        for m in &self.coeff_modulus {
            w.write_u64::<LittleEndian>(m.value)?;
        }
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self> {
        let degree = r.read_u64::<LittleEndian>()?;
        let count = r.read_u64::<LittleEndian>()? as usize;
        if count == 0 || count > 64 {
            return Err(CkksError::Serialization(format!(
                "implausible modulus count {count}"
            )));
        }
        let mut moduli = Vec::with_capacity(count);
        for _ in 0..count {
            moduli.push(Modulus::new(r.read_u64::<LittleEndian>()?));
        }
        Self::from_moduli(degree, moduli)
    }
}

/// Maximum total coefficient modulus bits per degree for a given security
/// level, following the homomorphic encryption standard tables. Level 0
/// disables the check.
pub fn max_coeff_modulus_bits(poly_modulus_degree: u64, security_level: u64) -> Result<u32> {
    let idx = match poly_modulus_degree {
        1024 => 0,
        2048 => 1,
        4096 => 2,
        8192 => 3,
        16384 => 4,
        32768 => 5,
        _ => {
            return Err(CkksError::InvalidParameters(format!(
                "unsupported poly_modulus_degree {poly_modulus_degree}"
            )))
        }
    };
    let bits = match security_level {
        0 => u32::MAX,
        128 => [27, 54, 109, 218, 438, 881][idx],
        192 => [19, 37, 75, 152, 305, 611][idx],
        256 => [14, 29, 58, 118, 237, 476][idx],
        other => {
            return Err(CkksError::InvalidParameters(format!(
                "security_level must be 0, 128, 192 or 256, got {other}"
            )))
        }
    };
    Ok(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_generates_valid_chain() {
        let parms = EncryptionParameters::new(1024, &[30, 30, 30, 30, 30]).unwrap();
        assert_eq!(parms.poly_modulus_degree(), 1024);
        assert_eq!(parms.coeff_modulus().len(), 5);
        assert_eq!(parms.slot_count(), 512);
    }

    #[test]
    fn test_rejects_bad_degree() {
        assert!(EncryptionParameters::new(1000, &[30]).is_err());
        assert!(EncryptionParameters::new(512, &[30]).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let parms = EncryptionParameters::new(2048, &[30, 24, 30]).unwrap();
        let mut buf = Vec::new();
        parms.save(&mut buf).unwrap();
        let loaded = EncryptionParameters::load(&mut buf.as_slice()).unwrap();
        assert_eq!(parms, loaded);
    }

    #[test]
    fn test_security_table() {
        assert_eq!(max_coeff_modulus_bits(1024, 128).unwrap(), 27);
        assert_eq!(max_coeff_modulus_bits(8192, 192).unwrap(), 152);
        assert_eq!(max_coeff_modulus_bits(32768, 256).unwrap(), 476);
        assert_eq!(max_coeff_modulus_bits(4096, 0).unwrap(), u32::MAX);
        assert!(max_coeff_modulus_bits(4096, 100).is_err());
    }
}
