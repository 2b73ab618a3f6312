//! Protocol error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("frame of {got} bytes exceeds the {max} byte limit")]
    FrameTooLarge { got: u64, max: u64 },

    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    #[error("unknown function name: {0}")]
    UnknownFunction(String),

    #[error("malformed function descriptor: {0}")]
    MalformedFunction(String),

    #[error("buffer too short: need {need} bytes, have {have}")]
    BufferTooShort { need: usize, have: usize },

    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
