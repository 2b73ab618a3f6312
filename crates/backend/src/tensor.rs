//! Tensors over tagged slots, with batch packing along axis 0.
//!
//! A packed tensor folds its batch axis into the plaintext slots: logical
//! shape `[B, d1, ...]` is stored as `size / B` slots whose plaintext
//! vectors (or ciphertext SIMD lanes) each hold B values. An unpacked tensor
//! stores one slot per logical element.

use std::sync::Arc;

use veilnn_ckks::CkksContext;
use veilnn_protocol::WireTensor;

use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::HEType;
use crate::plaintext::HEPlaintext;

pub fn shape_size(shape: &[usize]) -> usize {
    shape.iter().product()
}

#[derive(Debug, Clone)]
pub struct HETensor {
    name: String,
    shape: Vec<usize>,
    element_type: ElementType,
    packed: bool,
    complex_packing: bool,
    data: Vec<HEType>,
    loaded_slots: usize,
}

impl HETensor {
    pub fn new(
        element_type: ElementType,
        shape: &[usize],
        packed: bool,
        complex_packing: bool,
        name: &str,
    ) -> Self {
        let batch = Self::batch_size_of(shape, packed);
        let count = if shape.is_empty() {
            1
        } else {
            shape_size(shape) / batch.max(1)
        };
        let data = vec![HEType::from_plaintext(HEPlaintext::new(), complex_packing); count];
        Self {
            name: name.to_string(),
            shape: shape.to_vec(),
            element_type,
            packed,
            complex_packing,
            data,
            loaded_slots: 0,
        }
    }

    pub fn batch_size_of(shape: &[usize], packed: bool) -> usize {
        if packed {
            shape.first().copied().unwrap_or(1).max(1)
        } else {
            1
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The per-slot shape: axis 0 collapses to 1 when the batch is packed.
    pub fn packed_shape(&self) -> Vec<usize> {
        let mut shape = self.shape.clone();
        if self.packed {
            if let Some(first) = shape.first_mut() {
                *first = 1;
            }
        }
        shape
    }

    /// Restore a logical shape from a per-slot shape and batch size.
    pub fn unpack_shape(packed_shape: &[usize], batch_size: usize) -> Vec<usize> {
        let mut shape = packed_shape.to_vec();
        if let Some(first) = shape.first_mut() {
            *first = batch_size;
        }
        shape
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn is_packed(&self) -> bool {
        self.packed
    }

    pub fn complex_packing(&self) -> bool {
        self.complex_packing
    }

    pub fn batch_size(&self) -> usize {
        Self::batch_size_of(&self.shape, self.packed)
    }

    pub fn batched_element_count(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[HEType] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [HEType] {
        &mut self.data
    }

    pub fn set_data(&mut self, data: Vec<HEType>) {
        debug_assert_eq!(data.len(), self.batched_element_count());
        self.data = data;
    }

    pub fn slot(&self, i: usize) -> &HEType {
        &self.data[i]
    }

    pub fn slot_mut(&mut self, i: usize) -> &mut HEType {
        &mut self.data[i]
    }

    pub fn any_encrypted_data(&self) -> bool {
        self.data.iter().any(|t| t.is_ciphertext())
    }

    /// Fold the batch axis into the slots. Plaintext tensors only.
    pub fn pack(&mut self) -> Result<()> {
        if self.packed {
            return Ok(());
        }
        if self.any_encrypted_data() {
            return Err(BackendError::TypeTagMismatch(
                "cannot repack a tensor holding ciphertexts".into(),
            ));
        }
        let batch = self.shape.first().copied().unwrap_or(1).max(1);
        let count = self.data.len() / batch;
        let mut packed_data = Vec::with_capacity(count);
        for j in 0..count {
            let mut values = Vec::with_capacity(batch);
            for b in 0..batch {
                let plain = self.data[b * count + j].plaintext()?;
                values.push(plain.first().copied().unwrap_or(0.0));
            }
            packed_data.push(HEType::from_plaintext(
                HEPlaintext::from_vec(values),
                self.complex_packing,
            ));
        }
        self.data = packed_data;
        self.packed = true;
        Ok(())
    }

    /// Spread packed batches back to one slot per element. Plaintext only.
    pub fn unpack(&mut self) -> Result<()> {
        if !self.packed {
            return Ok(());
        }
        if self.any_encrypted_data() {
            return Err(BackendError::TypeTagMismatch(
                "cannot unpack a tensor holding ciphertexts".into(),
            ));
        }
        let batch = self.batch_size();
        let count = self.data.len();
        let mut unpacked = Vec::with_capacity(batch * count);
        for b in 0..batch {
            for j in 0..count {
                let plain = self.data[j].plaintext()?;
                unpacked.push(HEType::from_plaintext(
                    HEPlaintext::scalar(plain.broadcast_get(b)),
                    self.complex_packing,
                ));
            }
        }
        self.data = unpacked;
        self.packed = false;
        Ok(())
    }

    /// Scatter a row-major host buffer into the slots.
    pub fn write_values(&mut self, values: &[f64]) -> Result<()> {
        let size = shape_size(&self.shape).max(1);
        if values.len() != size {
            return Err(BackendError::ShapeMismatch(format!(
                "{} values for tensor of size {size}",
                values.len()
            )));
        }
        let batch = self.batch_size();
        let count = self.batched_element_count();
        for j in 0..count {
            let slot_values: Vec<f64> = if self.packed {
                (0..batch).map(|b| values[b * count + j]).collect()
            } else {
                vec![values[j]]
            };
            self.data[j] =
                HEType::from_plaintext(HEPlaintext::from_vec(slot_values), self.complex_packing);
        }
        Ok(())
    }

    /// Gather the slots back into a row-major host buffer. Fails on
    /// ciphertext slots; decryption goes through the backend.
    pub fn read_values(&self) -> Result<Vec<f64>> {
        let batch = self.batch_size();
        let count = self.batched_element_count();
        let mut values = vec![0.0; batch * count];
        for j in 0..count {
            let plain = self.data[j].plaintext()?;
            if self.packed {
                for b in 0..batch {
                    values[b * count + j] = plain.broadcast_get(b);
                }
            } else {
                values[j] = plain.first().copied().unwrap_or(0.0);
            }
        }
        Ok(values)
    }

    /// Split into wire chunks of at most `max_slots` slots each.
    pub fn to_wire_tensors(&self, max_slots: usize) -> Vec<WireTensor> {
        let shape: Vec<u64> = self.shape.iter().map(|&d| d as u64).collect();
        if self.data.is_empty() {
            return vec![WireTensor {
                name: self.name.clone(),
                shape,
                packed: self.packed,
                offset: 0,
                slots: Vec::new(),
            }];
        }
        self.data
            .chunks(max_slots.max(1))
            .enumerate()
            .map(|(chunk_idx, chunk)| WireTensor {
                name: self.name.clone(),
                shape: shape.clone(),
                packed: self.packed,
                offset: (chunk_idx * max_slots.max(1)) as u64,
                slots: chunk.iter().map(|t| t.to_wire_slot()).collect(),
            })
            .collect()
    }

    /// Construct from the metadata of a first wire chunk.
    pub fn from_wire_shape(
        element_type: ElementType,
        wire: &WireTensor,
        complex_packing: bool,
    ) -> Self {
        let shape: Vec<usize> = wire.shape.iter().map(|&d| d as usize).collect();
        Self::new(element_type, &shape, wire.packed, complex_packing, &wire.name)
    }

    /// Apply one wire chunk at its offset.
    pub fn load_wire(&mut self, wire: &WireTensor, context: &Arc<CkksContext>) -> Result<()> {
        let offset = wire.offset as usize;
        if offset + wire.slots.len() > self.data.len() {
            return Err(BackendError::ClientProtocolError(format!(
                "tensor chunk [{}..{}] exceeds {} slots",
                offset,
                offset + wire.slots.len(),
                self.data.len()
            )));
        }
        for (k, slot) in wire.slots.iter().enumerate() {
            self.data[offset + k] = HEType::from_wire_slot(slot, context)?;
        }
        self.loaded_slots += wire.slots.len();
        Ok(())
    }

    pub fn done_loading(&self) -> bool {
        self.loaded_slots >= self.data.len()
    }
}
