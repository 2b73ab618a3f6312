//! The session message: a type tag plus optional sub-messages.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{ProtocolError, Result};
use crate::frame::{read_frame, write_frame};
use crate::function::FunctionCall;
use crate::tensor::WireTensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Unknown = 0,
    Request = 1,
    Response = 2,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageType::Unknown),
            1 => Some(MessageType::Request),
            2 => Some(MessageType::Response),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// A complete session message. Sub-messages are independent; a single
/// message may carry several (the client's key upload, for instance).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub msg_type: Option<MessageType>,
    pub encryption_parameters: Option<Vec<u8>>,
    pub public_key: Option<Vec<u8>>,
    pub relin_keys: Option<Vec<u8>>,
    pub function: Option<FunctionCall>,
    pub tensors: Vec<WireTensor>,
}

impl Message {
    pub fn request() -> Self {
        Self {
            msg_type: Some(MessageType::Request),
            ..Default::default()
        }
    }

    pub fn response() -> Self {
        Self {
            msg_type: Some(MessageType::Response),
            ..Default::default()
        }
    }

    pub fn with_function(mut self, function: FunctionCall) -> Self {
        self.function = Some(function);
        self
    }

    pub fn with_tensor(mut self, tensor: WireTensor) -> Self {
        self.tensors.push(tensor);
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.msg_type.unwrap_or(MessageType::Unknown)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf).expect("writing to Vec cannot fail");
        buf
    }

    fn encode_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(self.message_type().to_u8())?;

        write_opt_bytes(w, self.encryption_parameters.as_deref())?;
        write_opt_bytes(w, self.public_key.as_deref())?;
        write_opt_bytes(w, self.relin_keys.as_deref())?;

        match &self.function {
            Some(f) => write_opt_bytes(w, Some(f.to_json().as_bytes()))?,
            None => write_opt_bytes(w, None)?,
        }

        w.write_u32::<LittleEndian>(self.tensors.len() as u32)?;
        for tensor in &self.tensors {
            tensor.encode(w)?;
        }
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = data;
        let tag = r.read_u8()?;
        let msg_type =
            MessageType::from_u8(tag).ok_or(ProtocolError::UnknownMessageType(tag))?;

        let encryption_parameters = read_opt_bytes(&mut r)?;
        let public_key = read_opt_bytes(&mut r)?;
        let relin_keys = read_opt_bytes(&mut r)?;

        let function = match read_opt_bytes(&mut r)? {
            Some(bytes) => {
                let json =
                    std::str::from_utf8(&bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
                Some(FunctionCall::from_json(json)?)
            }
            None => None,
        };

        let tensor_count = r.read_u32::<LittleEndian>()? as usize;
        if tensor_count > 1 << 16 {
            return Err(ProtocolError::InvalidField(format!(
                "{tensor_count} tensors in one message"
            )));
        }
        let mut tensors = Vec::with_capacity(tensor_count);
        for _ in 0..tensor_count {
            tensors.push(WireTensor::decode(&mut r)?);
        }

        Ok(Self {
            msg_type: Some(msg_type),
            encryption_parameters,
            public_key,
            relin_keys,
            function,
            tensors,
        })
    }

    /// Frame and send this message.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        write_frame(w, &self.encode())
    }

    /// Read and decode the next framed message.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let payload = read_frame(r)?;
        Self::decode(&payload)
    }
}

fn write_opt_bytes<W: Write>(w: &mut W, bytes: Option<&[u8]>) -> Result<()> {
    match bytes {
        Some(b) => {
            w.write_u8(1)?;
            w.write_u64::<LittleEndian>(b.len() as u64)?;
            w.write_all(b)?;
        }
        None => w.write_u8(0)?,
    }
    Ok(())
}

fn read_opt_bytes<R: Read>(r: &mut R) -> Result<Option<Vec<u8>>> {
    if r.read_u8()? == 0 {
        return Ok(None);
    }
    let len = r.read_u64::<LittleEndian>()? as usize;
    if len as u64 > crate::frame::MAX_FRAME_LEN {
        return Err(ProtocolError::InvalidField(format!(
            "sub-message of {len} bytes"
        )));
    }
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    Ok(Some(bytes))
}
