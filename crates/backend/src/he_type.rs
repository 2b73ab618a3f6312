//! The tagged per-slot value: plaintext batch or ciphertext handle.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::sync::Arc;

use veilnn_ckks::{serialize, Ciphertext, CkksContext};
use veilnn_protocol::WireSlot;

use crate::error::{BackendError, Result};
use crate::plaintext::HEPlaintext;

#[derive(Debug, Clone)]
enum Slot {
    Plain(HEPlaintext),
    Cipher(Box<Ciphertext>),
}

/// A discriminated plaintext/ciphertext union with a complex-packing flag.
///
/// Ciphertext storage is exclusively owned: sharing a ciphertext between two
/// slots requires an explicit clone.
#[derive(Debug, Clone)]
pub struct HEType {
    slot: Slot,
    complex_packing: bool,
}

impl HEType {
    pub fn from_plaintext(plain: HEPlaintext, complex_packing: bool) -> Self {
        Self {
            slot: Slot::Plain(plain),
            complex_packing,
        }
    }

    pub fn from_ciphertext(cipher: Ciphertext, complex_packing: bool) -> Self {
        Self {
            slot: Slot::Cipher(Box::new(cipher)),
            complex_packing,
        }
    }

    pub fn is_plaintext(&self) -> bool {
        matches!(self.slot, Slot::Plain(_))
    }

    pub fn is_ciphertext(&self) -> bool {
        matches!(self.slot, Slot::Cipher(_))
    }

    pub fn complex_packing(&self) -> bool {
        self.complex_packing
    }

    pub fn plaintext(&self) -> Result<&HEPlaintext> {
        match &self.slot {
            Slot::Plain(p) => Ok(p),
            Slot::Cipher(_) => Err(BackendError::TypeTagMismatch(
                "expected a plaintext slot, found a ciphertext".into(),
            )),
        }
    }

    pub fn ciphertext(&self) -> Result<&Ciphertext> {
        match &self.slot {
            Slot::Cipher(c) => Ok(c),
            Slot::Plain(_) => Err(BackendError::TypeTagMismatch(
                "expected a ciphertext slot, found a plaintext".into(),
            )),
        }
    }

    pub fn ciphertext_mut(&mut self) -> Result<&mut Ciphertext> {
        match &mut self.slot {
            Slot::Cipher(c) => Ok(c),
            Slot::Plain(_) => Err(BackendError::TypeTagMismatch(
                "expected a ciphertext slot, found a plaintext".into(),
            )),
        }
    }

    pub fn set_plaintext(&mut self, plain: HEPlaintext) {
        self.slot = Slot::Plain(plain);
    }

    pub fn set_ciphertext(&mut self, cipher: Ciphertext) {
        self.slot = Slot::Cipher(Box::new(cipher));
    }

    /// Serialize for the wire: ciphertexts via their native form, plaintexts
    /// as a raw f64 vector.
    pub fn to_wire_slot(&self) -> WireSlot {
        match &self.slot {
            Slot::Cipher(c) => WireSlot {
                is_cipher: true,
                complex_packing: self.complex_packing,
                data: serialize::ciphertext_to_bytes(c),
            },
            Slot::Plain(p) => {
                let mut data = Vec::with_capacity(8 + p.len() * 8);
                data.write_u64::<LittleEndian>(p.len() as u64).unwrap();
                for &v in p.iter() {
                    data.write_f64::<LittleEndian>(v).unwrap();
                }
                WireSlot {
                    is_cipher: false,
                    complex_packing: self.complex_packing,
                    data,
                }
            }
        }
    }

    pub fn from_wire_slot(slot: &WireSlot, context: &Arc<CkksContext>) -> Result<Self> {
        if slot.is_cipher {
            let cipher = serialize::ciphertext_from_bytes(&slot.data, context)?;
            Ok(Self::from_ciphertext(cipher, slot.complex_packing))
        } else {
            let mut r = slot.data.as_slice();
            let count = r.read_u64::<LittleEndian>()? as usize;
            if count > context.slot_count() * 2 {
                return Err(BackendError::ClientProtocolError(format!(
                    "plaintext slot of {count} values exceeds packing capacity"
                )));
            }
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(r.read_f64::<LittleEndian>()?);
            }
            Ok(Self::from_plaintext(
                HEPlaintext::from_vec(values),
                slot.complex_packing,
            ))
        }
    }
}

/// Both operands of a binary kernel must agree on complex packing.
pub fn check_complex_packing(a: &HEType, b: &HEType) -> Result<()> {
    if a.complex_packing() != b.complex_packing() {
        return Err(BackendError::TypeTagMismatch(format!(
            "{} vs {}",
            a.complex_packing(),
            b.complex_packing()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_accessors() {
        let plain = HEType::from_plaintext(HEPlaintext::from_vec(vec![1.0, 2.0]), false);
        assert!(plain.is_plaintext());
        assert!(!plain.is_ciphertext());
        assert_eq!(plain.plaintext().unwrap().len(), 2);
        assert!(plain.ciphertext().is_err());
    }

    #[test]
    fn test_complex_packing_check() {
        let a = HEType::from_plaintext(HEPlaintext::scalar(1.0), false);
        let b = HEType::from_plaintext(HEPlaintext::scalar(2.0), true);
        assert!(matches!(
            check_complex_packing(&a, &b),
            Err(BackendError::TypeTagMismatch(_))
        ));
        let c = HEType::from_plaintext(HEPlaintext::scalar(2.0), false);
        assert!(check_complex_packing(&a, &c).is_ok());
    }

    #[test]
    fn test_plain_wire_roundtrip() {
        use veilnn_ckks::{CkksContext, EncryptionParameters};
        let parms = EncryptionParameters::new(1024, &[30, 30]).unwrap();
        let ctx = CkksContext::new(parms, 0).unwrap();

        let original = HEType::from_plaintext(HEPlaintext::from_vec(vec![1.5, -2.5, 0.0]), true);
        let wire = original.to_wire_slot();
        assert!(!wire.is_cipher);
        assert!(wire.complex_packing);

        let loaded = HEType::from_wire_slot(&wire, &ctx).unwrap();
        assert!(loaded.is_plaintext());
        assert!(loaded.complex_packing());
        assert_eq!(loaded.plaintext().unwrap(), original.plaintext().unwrap());
    }
}
