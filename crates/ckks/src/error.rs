//! Error types for the CKKS primitive layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CkksError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("unknown parms id {0:#018x}")]
    UnknownParmsId(u64),

    #[error("modulus chain exhausted: cannot switch below the chain bottom")]
    ChainExhausted,

    #[error("operands use different encryption parameters")]
    ParmsMismatch,

    #[error("scales do not match: {0} vs {1}")]
    ScaleMismatch(f64, f64),

    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    #[error("relinearization keys are required for this operation")]
    MissingRelinKeys,

    #[error("malformed serialized data: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CkksError>;
