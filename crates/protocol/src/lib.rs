//! Wire format for the client-aided inference session.
//!
//! Every message travels as `u64 length (big-endian) || payload`. The payload
//! is a [`Message`]: a type tag (request / response) plus optional
//! sub-messages — an encryption parameter blob, key blobs, a JSON function
//! descriptor, and zero or more wire tensors whose per-slot bytes carry
//! serialized ciphertexts or raw plaintext vectors.

mod error;
mod frame;
mod function;
mod message;
mod tensor;

pub use error::{ProtocolError, Result};
pub use frame::{read_frame, write_frame, MAX_FRAME_LEN};
pub use function::FunctionCall;
pub use message::{Message, MessageType};
pub use tensor::{WireSlot, WireTensor};
