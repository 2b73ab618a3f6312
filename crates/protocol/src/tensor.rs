//! Wire tensors: shape metadata plus one opaque byte blob per slot.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{ProtocolError, Result};

/// One serialized tensor slot. The payload is a serialized ciphertext when
/// `is_cipher` is set, otherwise an encoded plaintext vector; this crate does
/// not interpret it.
#[derive(Debug, Clone, PartialEq)]
pub struct WireSlot {
    pub is_cipher: bool,
    pub complex_packing: bool,
    pub data: Vec<u8>,
}

/// A tensor in flight. `offset` is the slot index of the first entry, so a
/// large tensor may arrive as several chunks against the same name.
#[derive(Debug, Clone, PartialEq)]
pub struct WireTensor {
    pub name: String,
    pub shape: Vec<u64>,
    pub packed: bool,
    pub offset: u64,
    pub slots: Vec<WireSlot>,
}

impl WireSlot {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(self.is_cipher as u8)?;
        w.write_u8(self.complex_packing as u8)?;
        w.write_u64::<LittleEndian>(self.data.len() as u64)?;
        w.write_all(&self.data)?;
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let is_cipher = r.read_u8()? != 0;
        let complex_packing = r.read_u8()? != 0;
        let len = r.read_u64::<LittleEndian>()? as usize;
        let mut data = vec![0u8; len];
        r.read_exact(&mut data)?;
        Ok(Self {
            is_cipher,
            complex_packing,
            data,
        })
    }
}

impl WireTensor {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        let name_bytes = self.name.as_bytes();
        w.write_u32::<LittleEndian>(name_bytes.len() as u32)?;
        w.write_all(name_bytes)?;
        w.write_u32::<LittleEndian>(self.shape.len() as u32)?;
        for &dim in &self.shape {
            w.write_u64::<LittleEndian>(dim)?;
        }
        w.write_u8(self.packed as u8)?;
        w.write_u64::<LittleEndian>(self.offset)?;
        w.write_u32::<LittleEndian>(self.slots.len() as u32)?;
        for slot in &self.slots {
            slot.encode(w)?;
        }
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let name_len = r.read_u32::<LittleEndian>()? as usize;
        if name_len > 4096 {
            return Err(ProtocolError::InvalidField(format!(
                "tensor name of {name_len} bytes"
            )));
        }
        let mut name_bytes = vec![0u8; name_len];
        r.read_exact(&mut name_bytes)?;
        let name = String::from_utf8(name_bytes).map_err(|_| ProtocolError::InvalidUtf8)?;

        let rank = r.read_u32::<LittleEndian>()? as usize;
        if rank > 16 {
            return Err(ProtocolError::InvalidField(format!("tensor rank {rank}")));
        }
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            shape.push(r.read_u64::<LittleEndian>()?);
        }

        let packed = r.read_u8()? != 0;
        let offset = r.read_u64::<LittleEndian>()?;
        let slot_count = r.read_u32::<LittleEndian>()? as usize;
        let mut slots = Vec::with_capacity(slot_count.min(1 << 20));
        for _ in 0..slot_count {
            slots.push(WireSlot::decode(r)?);
        }

        Ok(Self {
            name,
            shape,
            packed,
            offset,
            slots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tensor() -> WireTensor {
        WireTensor {
            name: "input_0".into(),
            shape: vec![2, 3],
            packed: true,
            offset: 4,
            slots: vec![
                WireSlot {
                    is_cipher: true,
                    complex_packing: false,
                    data: vec![0xAA; 32],
                },
                WireSlot {
                    is_cipher: false,
                    complex_packing: false,
                    data: vec![1, 2, 3],
                },
            ],
        }
    }

    #[test]
    fn test_tensor_roundtrip() {
        let tensor = sample_tensor();
        let mut buf = Vec::new();
        tensor.encode(&mut buf).unwrap();
        let decoded = WireTensor::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, tensor);
    }

    #[test]
    fn test_empty_slots() {
        let tensor = WireTensor {
            name: String::new(),
            shape: vec![],
            packed: false,
            offset: 0,
            slots: vec![],
        };
        let mut buf = Vec::new();
        tensor.encode(&mut buf).unwrap();
        assert_eq!(WireTensor::decode(&mut buf.as_slice()).unwrap(), tensor);
    }

    #[test]
    fn test_implausible_rank_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes()); // empty name
        buf.extend_from_slice(&1000u32.to_le_bytes()); // rank 1000
        assert!(matches!(
            WireTensor::decode(&mut buf.as_slice()),
            Err(ProtocolError::InvalidField(_))
        ));
    }
}
