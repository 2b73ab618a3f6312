//! Leveled CKKS homomorphic encryption primitives.
//!
//! The operation set covers what an encrypted-inference runtime needs:
//! - Encode/Decode via the canonical embedding (real or complex-packed slots)
//! - Public-key Encrypt / secret-key Decrypt (RLWE)
//! - ct + ct, ct - ct, ct + pt, ct × pt, ct × ct with relinearization
//! - Rescale and modulus switching down a multi-level modulus chain
//! - Lazy (reduction-free) ciphertext accumulation with explicit restore
//! - Byte-level serialization for keys and ciphertexts
//!
//! Rotation (Galois automorphism) and bootstrapping are not implemented;
//! no consumer of this crate rotates slots.

pub mod ciphertext;
pub mod context;
pub mod encoding;
pub mod encrypt;
mod error;
pub mod evaluator;
pub mod keys;
pub mod modulus;
pub mod ntt;
pub mod params;
pub mod poly;
pub mod serialize;

pub use ciphertext::{Ciphertext, Plaintext};
pub use context::{CkksContext, ContextData, ParmsId};
pub use encoding::CkksEncoder;
pub use encrypt::{Decryptor, Encryptor};
pub use error::{CkksError, Result};
pub use evaluator::Evaluator;
pub use keys::{KeyGenerator, PublicKey, RelinKeys, SecretKey};
pub use modulus::Modulus;
pub use params::EncryptionParameters;
