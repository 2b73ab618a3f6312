//! Plaintext and ciphertext containers.
//!
//! Both are RNS polynomials in the NTT domain, tagged with the chain
//! position (`ParmsId`) and the current scale. A ciphertext holds two
//! components (or three transiently, between multiply and relinearize).

use crate::context::ParmsId;
use crate::poly::RnsPoly;

/// An encoded plaintext polynomial.
#[derive(Debug, Clone)]
pub struct Plaintext {
    pub poly: RnsPoly,
    pub parms_id: ParmsId,
    pub scale: f64,
}

/// A CKKS ciphertext.
#[derive(Debug, Clone)]
pub struct Ciphertext {
    /// Polynomial components; decryption evaluates Σ c_k · s^k.
    pub c: Vec<RnsPoly>,
    pub parms_id: ParmsId,
    pub scale: f64,
    pub is_ntt_form: bool,
}

impl Ciphertext {
    /// Number of polynomial components (2 after relinearization).
    pub fn size(&self) -> usize {
        self.c.len()
    }

    pub fn poly_degree(&self) -> usize {
        self.c.first().map_or(0, |p| p.n)
    }

    pub fn num_limbs(&self) -> usize {
        self.c.first().map_or(0, |p| p.num_limbs())
    }

    /// Parameter-lineage equality: same chain position and component shape.
    pub fn same_lineage(&self, other: &Ciphertext) -> bool {
        self.parms_id == other.parms_id
            && self.size() == other.size()
            && self.num_limbs() == other.num_limbs()
    }
}
