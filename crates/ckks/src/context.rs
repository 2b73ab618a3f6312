//! Leveled context: one `ContextData` per position in the modulus chain.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CkksError, Result};
use crate::modulus::{mod_inv, Modulus};
use crate::ntt::NttTables;
use crate::params::{max_coeff_modulus_bits, EncryptionParameters};

/// Stable identifier of a position in the modulus chain.
///
/// Computed as an FNV-1a fold over the polynomial degree and the level's
/// modulus values, so identical parameters produce identical ids across
/// processes (the client and server derive them independently).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParmsId(pub u64);

impl ParmsId {
    fn derive(poly_degree: u64, moduli: &[Modulus]) -> Self {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = FNV_OFFSET;
        let mut fold = |v: u64| {
            for byte in v.to_le_bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        };
        fold(poly_degree);
        for m in moduli {
            fold(m.value);
        }
        ParmsId(hash)
    }
}

/// Per-level data: the modulus slice, NTT tables, and rescale constants.
#[derive(Debug)]
pub struct ContextData {
    /// Position in the chain; 0 is the bottom (single modulus).
    pub chain_index: usize,
    pub parms_id: ParmsId,
    moduli: Vec<Modulus>,
    ntt_tables: Vec<NttTables>,
    /// q_last^{-1} mod q_i for every limb i below the last; used by rescale.
    inv_last_modulus: Vec<u64>,
    /// Id of the next level down, if any.
    pub next_parms_id: Option<ParmsId>,
}

impl ContextData {
    pub fn moduli(&self) -> &[Modulus] {
        &self.moduli
    }

    pub fn num_limbs(&self) -> usize {
        self.moduli.len()
    }

    pub fn ntt_tables(&self) -> &[NttTables] {
        &self.ntt_tables
    }

    pub fn last_modulus(&self) -> &Modulus {
        self.moduli.last().unwrap()
    }

    pub fn inv_last_modulus(&self) -> &[u64] {
        &self.inv_last_modulus
    }

    pub fn total_modulus_bits(&self) -> u32 {
        self.moduli.iter().map(|m| m.bits).sum()
    }
}

/// The full modulus chain plus lookup by `ParmsId`.
///
/// All data is immutable after construction; the context is shared freely
/// across threads behind an `Arc`.
#[derive(Debug)]
pub struct CkksContext {
    parms: EncryptionParameters,
    levels: Vec<Arc<ContextData>>,
    by_id: HashMap<ParmsId, usize>,
}

impl CkksContext {
    /// Build the chain and validate it against the requested security level.
    pub fn new(parms: EncryptionParameters, security_level: u64) -> Result<Arc<Self>> {
        let degree = parms.poly_modulus_degree();
        let budget = max_coeff_modulus_bits(degree, security_level)?;
        if budget != u32::MAX && parms.total_coeff_modulus_bits() > budget {
            return Err(CkksError::InvalidParameters(format!(
                "coeff modulus is {} bits, security level {} allows at most {} for degree {}",
                parms.total_coeff_modulus_bits(),
                security_level,
                budget,
                degree
            )));
        }

        let all_moduli = parms.coeff_modulus();
        let n = degree as usize;
        let num_levels = all_moduli.len();

        let mut levels = Vec::with_capacity(num_levels);
        let mut by_id = HashMap::with_capacity(num_levels);

        for level in 0..num_levels {
            let count = num_levels - level;
            let moduli = all_moduli[..count].to_vec();
            let parms_id = ParmsId::derive(degree, &moduli);
            let chain_index = count - 1;

            let q_last = moduli[count - 1].value;
            let inv_last_modulus = moduli[..count - 1]
                .iter()
                .map(|m| mod_inv(q_last % m.value, m.value))
                .collect();

            let ntt_tables = moduli.iter().map(|m| NttTables::new(n, m.value)).collect();

            levels.push(Arc::new(ContextData {
                chain_index,
                parms_id,
                moduli,
                ntt_tables,
                inv_last_modulus,
                next_parms_id: None,
            }));
            by_id.insert(parms_id, level);
        }

        // Link each level to the one below it.
        for level in 0..num_levels - 1 {
            let next_id = levels[level + 1].parms_id;
            Arc::get_mut(&mut levels[level]).unwrap().next_parms_id = Some(next_id);
        }

        Ok(Arc::new(Self {
            parms,
            levels,
            by_id,
        }))
    }

    pub fn parms(&self) -> &EncryptionParameters {
        &self.parms
    }

    pub fn poly_degree(&self) -> usize {
        self.parms.poly_modulus_degree() as usize
    }

    pub fn slot_count(&self) -> usize {
        self.parms.slot_count()
    }

    /// Id of the top level (all moduli) — fresh ciphertexts live here.
    pub fn first_parms_id(&self) -> ParmsId {
        self.levels[0].parms_id
    }

    /// Id of the bottom level (one modulus).
    pub fn last_parms_id(&self) -> ParmsId {
        self.levels[self.levels.len() - 1].parms_id
    }

    pub fn get_context_data(&self, parms_id: ParmsId) -> Result<&Arc<ContextData>> {
        self.by_id
            .get(&parms_id)
            .map(|&idx| &self.levels[idx])
            .ok_or(CkksError::UnknownParmsId(parms_id.0))
    }

    /// Chain index of a level; decreases toward the chain bottom.
    pub fn chain_index(&self, parms_id: ParmsId) -> Result<usize> {
        Ok(self.get_context_data(parms_id)?.chain_index)
    }
}
