//! Encrypted-inference graph executor.
//!
//! A server evaluates a pre-compiled computation graph over tensors whose
//! slots are either plaintext batches or CKKS ciphertexts. Arithmetic runs
//! entirely on the server; non-polynomial operations (ReLU, bounded ReLU,
//! max-pool) are offloaded over a framed TCP session to the key-holding
//! client, which alone can decrypt.
//!
//! Layering, leaves first: tagged slot values ([`HEType`]) → tensors
//! ([`HETensor`]) → the modulus/scale manager ([`mod_chain`]) → per-operation
//! kernels ([`kernels`]) → the executor ([`HeExecutable`]) and its session.

pub mod annotation;
pub mod backend;
pub mod client;
pub mod config;
mod error;
pub mod element;
pub mod executor;
pub mod graph;
pub mod he_type;
pub mod kernels;
pub mod mod_chain;
pub mod params;
pub mod plaintext;
pub mod session;
pub mod tensor;

pub use annotation::Annotation;
pub use backend::{create_backend, HeBackend};
pub use client::{ClientInput, HeClient};
pub use config::BackendConfig;
pub use element::ElementType;
pub use error::{BackendError, Result};
pub use executor::HeExecutable;
pub use graph::{Graph, GraphBuilder, NodeId, OpKind, PadMode};
pub use he_type::HEType;
pub use params::HeEncryptionParameters;
pub use plaintext::HEPlaintext;
pub use tensor::HETensor;
