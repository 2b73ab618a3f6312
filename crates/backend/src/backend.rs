//! The backend: CKKS context, keys, and handles shared by every kernel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rayon::prelude::*;

use veilnn_ckks::{
    serialize, Ciphertext, CkksContext, CkksEncoder, Decryptor, Encryptor, Evaluator,
    KeyGenerator, ParmsId, Plaintext, RelinKeys,
};

use crate::config::BackendConfig;
use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::HEType;
use crate::params::HeEncryptionParameters;
use crate::tensor::HETensor;

/// Schemes this process can instantiate.
static REGISTERED_SCHEMES: Lazy<Vec<&'static str>> = Lazy::new(|| vec![crate::params::SCHEME_NAME]);

/// Create a backend for a registered scheme with default parameters.
pub fn create_backend(scheme: &str) -> Result<Arc<HeBackend>> {
    if !REGISTERED_SCHEMES.contains(&scheme) {
        return Err(BackendError::InvalidParameters(format!(
            "no backend registered for scheme {scheme:?}"
        )));
    }
    HeBackend::new(HeEncryptionParameters::default(), BackendConfig::default())
}

pub struct HeBackend {
    params: HeEncryptionParameters,
    context: Arc<CkksContext>,
    encoder: CkksEncoder,
    evaluator: Evaluator,
    config: BackendConfig,
    /// Replaced when the client uploads its public key.
    encryptor: RwLock<Arc<Encryptor>>,
    /// Replaced when the client uploads its relinearization keys.
    relin_keys: RwLock<Arc<RelinKeys>>,
    /// The server's own decryptor. In client mode client data never passes
    /// through it; the key-holding client performs all decryption.
    decryptor: Decryptor,
    lazy_mod: AtomicBool,
    log_level: u32,
    verbose_ops: Vec<String>,
}

impl HeBackend {
    pub fn new(params: HeEncryptionParameters, config: BackendConfig) -> Result<Arc<Self>> {
        let context = CkksContext::new(params.parms().clone(), params.security_level())?;
        let encoder = CkksEncoder::new(context.clone());
        let evaluator = Evaluator::new(context.clone());

        let mut rng = rand::thread_rng();
        let keygen = KeyGenerator::new(context.clone(), &mut rng);
        let encryptor = Encryptor::new(context.clone(), keygen.create_public_key(&mut rng))?;
        let relin_keys = keygen.create_relin_keys(&mut rng);
        let decryptor = Decryptor::new(context.clone(), keygen.secret_key().clone())?;

        let lazy_mod = std::env::var("LAZY_MOD")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let log_level = std::env::var("NGRAPH_HE_LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let verbose_ops = std::env::var("NGRAPH_HE_VERBOSE_OPS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        tracing::debug!(
            degree = params.poly_modulus_degree(),
            moduli = params.parms().coeff_modulus().len(),
            total_bits = params.parms().total_coeff_modulus_bits(),
            scale = params.scale(),
            complex_packing = params.complex_packing(),
            security_level = params.security_level(),
            "created CKKS backend"
        );

        Ok(Arc::new(Self {
            params,
            context,
            encoder,
            evaluator,
            config,
            encryptor: RwLock::new(Arc::new(encryptor)),
            relin_keys: RwLock::new(Arc::new(relin_keys)),
            decryptor,
            lazy_mod: AtomicBool::new(lazy_mod),
            log_level,
            verbose_ops,
        }))
    }

    /// Build from a configuration map (the `set_config` surface).
    pub fn with_config(map: &HashMap<String, String>) -> Result<Arc<Self>> {
        let config = BackendConfig::parse(map)?;
        let params = HeEncryptionParameters::parse_config_or_default(
            config.encryption_parameters.as_deref(),
        )?;
        Self::new(params, config)
    }

    pub fn params(&self) -> &HeEncryptionParameters {
        &self.params
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<CkksContext> {
        &self.context
    }

    pub fn encoder(&self) -> &CkksEncoder {
        &self.encoder
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn scale(&self) -> f64 {
        self.params.scale()
    }

    pub fn complex_packing(&self) -> bool {
        self.params.complex_packing()
    }

    pub fn slot_count(&self) -> usize {
        self.context.slot_count()
    }

    /// Largest batch a packed tensor may carry.
    pub fn max_batch_size(&self) -> usize {
        self.encoder.capacity(self.complex_packing())
    }

    pub fn lazy_mod(&self) -> bool {
        self.lazy_mod.load(Ordering::Relaxed)
    }

    pub fn set_lazy_mod(&self, value: bool) {
        self.lazy_mod.store(value, Ordering::Relaxed);
    }

    pub fn log_level(&self) -> u32 {
        self.log_level
    }

    /// Per-op verbose timing: named in `NGRAPH_HE_VERBOSE_OPS` (or `all`),
    /// or a high enough `NGRAPH_HE_LOG_LEVEL`.
    pub fn verbose_op(&self, op_name: &str) -> bool {
        self.log_level >= 4
            || self.verbose_ops.iter().any(|v| v == "all")
            || self.verbose_ops.iter().any(|v| v == &op_name.to_ascii_lowercase())
    }

    pub fn is_supported_type(&self, ty: ElementType) -> bool {
        matches!(
            ty,
            ElementType::F32 | ElementType::F64 | ElementType::I32 | ElementType::I64
        )
    }

    pub fn encryptor(&self) -> Arc<Encryptor> {
        self.encryptor.read().clone()
    }

    pub fn relin_keys(&self) -> Arc<RelinKeys> {
        self.relin_keys.read().clone()
    }

    pub fn set_public_key_bytes(&self, bytes: &[u8]) -> Result<()> {
        let key = serialize::public_key_from_bytes(bytes, &self.context)?;
        let encryptor = Encryptor::new(self.context.clone(), key)?;
        *self.encryptor.write() = Arc::new(encryptor);
        Ok(())
    }

    pub fn set_relin_keys_bytes(&self, bytes: &[u8]) -> Result<()> {
        let keys = serialize::relin_keys_from_bytes(bytes, &self.context)?;
        *self.relin_keys.write() = Arc::new(keys);
        Ok(())
    }

    pub fn chain_index(&self, cipher: &Ciphertext) -> Result<usize> {
        Ok(self.context.chain_index(cipher.parms_id)?)
    }

    /// Encode a batch at an explicit chain position and scale.
    pub fn encode_at(
        &self,
        values: &[f64],
        parms_id: ParmsId,
        scale: f64,
        complex_packing: bool,
    ) -> Result<Plaintext> {
        Ok(self
            .encoder
            .encode_real(values, parms_id, scale, complex_packing)?)
    }

    /// Encrypt a batch at the top of the chain with the nominal scale.
    pub fn encrypt_values(&self, values: &[f64], complex_packing: bool) -> Result<Ciphertext> {
        self.encrypt_values_at(
            values,
            self.context.first_parms_id(),
            self.scale(),
            complex_packing,
        )
    }

    pub fn encrypt_values_at(
        &self,
        values: &[f64],
        parms_id: ParmsId,
        scale: f64,
        complex_packing: bool,
    ) -> Result<Ciphertext> {
        let plain = self.encode_at(values, parms_id, scale, complex_packing)?;
        let encryptor = self.encryptor();
        let mut rng = rand::thread_rng();
        Ok(encryptor.encrypt(&plain, &mut rng)?)
    }

    /// Decrypt a ciphertext to `count` host values with the server's own key.
    pub fn decrypt_values(
        &self,
        cipher: &Ciphertext,
        count: usize,
        complex_packing: bool,
    ) -> Result<Vec<f64>> {
        let plain = self.decryptor.decrypt(cipher)?;
        Ok(self.encoder.decode_real(&plain, count, complex_packing)?)
    }

    pub fn create_plain_tensor(
        &self,
        element_type: ElementType,
        shape: &[usize],
        packed: bool,
        name: &str,
    ) -> HETensor {
        HETensor::new(element_type, shape, packed, self.complex_packing(), name)
    }

    /// A tensor whose slots will hold ciphertexts. Slots start empty; callers
    /// fill them via `write_values` + `encrypt_tensor` or kernel output.
    pub fn create_cipher_tensor(
        &self,
        element_type: ElementType,
        shape: &[usize],
        packed: bool,
        name: &str,
    ) -> HETensor {
        HETensor::new(element_type, shape, packed, self.complex_packing(), name)
    }

    /// Encrypt every plaintext slot in place, in parallel.
    pub fn encrypt_tensor(&self, tensor: &mut HETensor) -> Result<()> {
        let parms_id = self.context.first_parms_id();
        let scale = self.scale();
        tensor
            .data_mut()
            .par_iter_mut()
            .try_for_each(|slot| -> Result<()> {
                if slot.is_plaintext() {
                    let complex = slot.complex_packing();
                    let values = slot.plaintext()?.to_vec();
                    let cipher = self.encrypt_values_at(&values, parms_id, scale, complex)?;
                    slot.set_ciphertext(cipher);
                }
                Ok(())
            })
    }

    /// Read a tensor back to host values, decrypting ciphertext slots with
    /// the server's own key.
    pub fn read_tensor(&self, tensor: &HETensor) -> Result<Vec<f64>> {
        let batch = tensor.batch_size();
        let count = tensor.batched_element_count();
        let mut values = vec![0.0; batch * count];
        for j in 0..count {
            let slot = tensor.slot(j);
            let slot_values: Vec<f64> = if slot.is_plaintext() {
                let p = slot.plaintext()?;
                (0..batch).map(|b| p.broadcast_get(b)).collect()
            } else {
                let decode_count = if tensor.is_packed() { batch } else { 1 };
                self.decrypt_values(slot.ciphertext()?, decode_count, slot.complex_packing())?
            };
            if tensor.is_packed() {
                for b in 0..batch {
                    values[b * count + j] = slot_values.get(b).copied().unwrap_or(0.0);
                }
            } else {
                values[j] = slot_values.first().copied().unwrap_or(0.0);
            }
        }
        Ok(values)
    }

    /// Decrypt one slot to host values (the non-private local path for
    /// nonlinear ops when no client is attached).
    pub fn slot_host_values(&self, slot: &HEType, count: usize) -> Result<Vec<f64>> {
        if slot.is_plaintext() {
            Ok(slot.plaintext()?.to_vec())
        } else {
            self.decrypt_values(slot.ciphertext()?, count, slot.complex_packing())
        }
    }
}
