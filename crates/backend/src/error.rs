//! Backend error types.

use thiserror::Error;
use veilnn_ckks::CkksError;
use veilnn_protocol::ProtocolError;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("unsupported op: {0}")]
    UnsupportedOp(String),

    #[error("unsupported element type: {0}")]
    UnsupportedType(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("cannot reconcile operand scales: {0}")]
    ScaleMismatch(String),

    #[error("modulus chain exhausted")]
    ChainExhausted,

    #[error("complex packing disagrees between operands: {0}")]
    TypeTagMismatch(String),

    #[error("client protocol error: {0}")]
    ClientProtocolError(String),

    #[error("client session closed while an offloaded operation was pending")]
    ClientAborted,

    #[error("crypto error: {0}")]
    Crypto(CkksError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CkksError> for BackendError {
    fn from(err: CkksError) -> Self {
        match err {
            CkksError::ChainExhausted => BackendError::ChainExhausted,
            CkksError::ScaleMismatch(a, b) => {
                BackendError::ScaleMismatch(format!("{a} vs {b}"))
            }
            CkksError::InvalidParameters(msg) => BackendError::InvalidParameters(msg),
            other => BackendError::Crypto(other),
        }
    }
}

impl From<ProtocolError> for BackendError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(io) => BackendError::Io(io),
            other => BackendError::ClientProtocolError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
