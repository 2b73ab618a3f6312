//! The key-holding client.
//!
//! The client owns the only secret key. It connects, receives the server's
//! encryption parameters, derives the same CKKS context, uploads its public
//! and relinearization keys, answers the inference-shape request with its
//! inputs, serves offloaded nonlinear requests by decrypt–compute–re-encrypt,
//! and finally decrypts the result tensor.

use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use veilnn_ckks::{
    serialize, CkksContext, CkksEncoder, Decryptor, Encryptor, KeyGenerator,
};
use veilnn_protocol::{FunctionCall, Message, MessageType, WireTensor};

use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::executor::MAX_OFFLOAD_BATCH;
use crate::he_type::HEType;
use crate::kernels::relu::{scalar_bounded_relu, scalar_relu};
use crate::params::HeEncryptionParameters;
use crate::plaintext::HEPlaintext;
use crate::tensor::HETensor;

/// One named inference input.
#[derive(Debug, Clone)]
pub struct ClientInput {
    pub values: Vec<f64>,
    /// Encrypt before upload; plaintext uploads are allowed.
    pub encrypt: bool,
}

pub struct HeClient {
    stream: TcpStream,
    params: HeEncryptionParameters,
    context: Arc<CkksContext>,
    encoder: CkksEncoder,
    encryptor: Encryptor,
    decryptor: Decryptor,
    inputs: HashMap<String, ClientInput>,
}

impl HeClient {
    /// Connect, receive encryption parameters, and upload keys.
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        inputs: HashMap<String, ClientInput>,
    ) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)?;

        let message = Message::read_from(&mut stream)?;
        let parms_bytes = message.encryption_parameters.ok_or_else(|| {
            BackendError::ClientProtocolError(
                "expected encryption parameters as the first message".into(),
            )
        })?;
        let params = HeEncryptionParameters::from_bytes(&parms_bytes)?;
        tracing::info!(
            degree = params.poly_modulus_degree(),
            complex_packing = params.complex_packing(),
            "client received encryption parameters"
        );

        let context = CkksContext::new(params.parms().clone(), params.security_level())?;
        let encoder = CkksEncoder::new(context.clone());

        let mut rng = rand::thread_rng();
        let keygen = KeyGenerator::new(context.clone(), &mut rng);
        let public_key = keygen.create_public_key(&mut rng);
        let relin_keys = keygen.create_relin_keys(&mut rng);

        let mut key_message = Message::response();
        key_message.public_key = Some(serialize::public_key_to_bytes(&public_key));
        key_message.write_to(&mut stream)?;

        let mut evk_message = Message::response();
        evk_message.relin_keys = Some(serialize::relin_keys_to_bytes(&relin_keys));
        evk_message.write_to(&mut stream)?;

        let encryptor = Encryptor::new(context.clone(), public_key)?;
        let decryptor = Decryptor::new(context.clone(), keygen.secret_key().clone())?;

        Ok(Self {
            stream,
            params,
            context,
            encoder,
            encryptor,
            decryptor,
            inputs,
        })
    }

    /// Drive the session to completion and return the decrypted result.
    pub fn run(mut self) -> Result<Vec<f64>> {
        let mut result: Option<HETensor> = None;
        loop {
            let message = match Message::read_from(&mut self.stream) {
                Ok(m) => m,
                Err(e) => {
                    return Err(BackendError::ClientProtocolError(format!(
                        "session ended before the result arrived: {e}"
                    )))
                }
            };

            match (message.message_type(), &message.function) {
                (MessageType::Request, Some(FunctionCall::Parameter)) => {
                    self.send_inputs(&message)?;
                }
                (MessageType::Request, Some(FunctionCall::Relu)) => {
                    self.answer_relu(&message, None)?;
                }
                (MessageType::Request, Some(FunctionCall::BoundedRelu { alpha })) => {
                    let alpha = *alpha;
                    self.answer_relu(&message, Some(alpha))?;
                }
                (MessageType::Request, Some(FunctionCall::MaxPool)) => {
                    self.answer_max_pool(&message)?;
                }
                (MessageType::Response, _) if !message.tensors.is_empty() => {
                    for wire in &message.tensors {
                        let tensor = result.get_or_insert_with(|| {
                            HETensor::from_wire_shape(
                                ElementType::F64,
                                wire,
                                self.params.complex_packing(),
                            )
                        });
                        tensor.load_wire(wire, &self.context)?;
                    }
                    if result.as_ref().is_some_and(|t| t.done_loading()) {
                        let mut tensor = result.take().expect("present when done");
                        return self.decrypt_tensor_values(&mut tensor);
                    }
                }
                (msg_type, function) => {
                    return Err(BackendError::ClientProtocolError(format!(
                        "unexpected message {msg_type:?} / {function:?}"
                    )))
                }
            }
        }
    }

    fn send_inputs(&mut self, request: &Message) -> Result<()> {
        let mut pending = Vec::new();
        for wire in &request.tensors {
            let input = self.inputs.get(&wire.name).ok_or_else(|| {
                BackendError::ClientProtocolError(format!(
                    "server requested unknown tensor {:?}",
                    wire.name
                ))
            })?;
            let shape: Vec<usize> = wire.shape.iter().map(|&d| d as usize).collect();
            tracing::info!(name = %wire.name, ?shape, packed = wire.packed, "uploading input");

            let mut tensor = HETensor::new(
                ElementType::F64,
                &shape,
                wire.packed,
                self.params.complex_packing(),
                &wire.name,
            );
            tensor.write_values(&input.values)?;
            if input.encrypt {
                self.encrypt_tensor(&mut tensor)?;
            }
            pending.extend(tensor.to_wire_tensors(MAX_OFFLOAD_BATCH));
        }
        for wire in pending {
            Message::request().with_tensor(wire).write_to(&mut self.stream)?;
        }
        Ok(())
    }

    fn encrypt_tensor(&self, tensor: &mut HETensor) -> Result<()> {
        let parms_id = self.context.first_parms_id();
        let scale = self.params.scale();
        let mut rng = rand::thread_rng();
        for slot in tensor.data_mut() {
            if slot.is_plaintext() {
                let complex = slot.complex_packing();
                let plain =
                    self.encoder
                        .encode_real(slot.plaintext()?, parms_id, scale, complex)?;
                let cipher = self.encryptor.encrypt(&plain, &mut rng)?;
                slot.set_ciphertext(cipher);
            }
        }
        Ok(())
    }

    /// Positional slot count of a wire tensor's batch.
    fn wire_values_per_slot(wire: &WireTensor) -> usize {
        if wire.packed {
            wire.shape.first().copied().unwrap_or(1).max(1) as usize
        } else {
            1
        }
    }

    fn slot_values(&self, slot: &HEType, count: usize) -> Result<Vec<f64>> {
        if slot.is_plaintext() {
            Ok(slot.plaintext()?.to_vec())
        } else {
            let plain = self.decryptor.decrypt(slot.ciphertext()?)?;
            Ok(self
                .encoder
                .decode_real(&plain, count, slot.complex_packing())?)
        }
    }

    fn reencrypt_like(
        &self,
        values: &[f64],
        like: &veilnn_ckks::Ciphertext,
        complex: bool,
    ) -> Result<HEType> {
        let plain = self
            .encoder
            .encode_real(values, like.parms_id, like.scale, complex)?;
        let mut rng = rand::thread_rng();
        let cipher = self.encryptor.encrypt(&plain, &mut rng)?;
        Ok(HEType::from_ciphertext(cipher, complex))
    }

    fn answer_relu(&mut self, request: &Message, alpha: Option<f64>) -> Result<()> {
        let wire = request.tensors.first().ok_or_else(|| {
            BackendError::ClientProtocolError("nonlinear request without a tensor".into())
        })?;
        let count = Self::wire_values_per_slot(wire);

        let mut out_slots = Vec::with_capacity(wire.slots.len());
        for wire_slot in &wire.slots {
            let slot = HEType::from_wire_slot(wire_slot, &self.context)?;
            let values = HEPlaintext::from_vec(self.slot_values(&slot, count)?);
            let mapped = match alpha {
                Some(alpha) => scalar_bounded_relu(&values, alpha),
                None => scalar_relu(&values),
            };
            let out = if slot.is_ciphertext() {
                self.reencrypt_like(&mapped, slot.ciphertext()?, slot.complex_packing())?
            } else {
                HEType::from_plaintext(mapped, slot.complex_packing())
            };
            out_slots.push(out.to_wire_slot());
        }

        let function = match alpha {
            Some(alpha) => FunctionCall::BoundedRelu { alpha },
            None => FunctionCall::Relu,
        };
        tracing::debug!(slots = out_slots.len(), "answering nonlinear request");
        Message::response()
            .with_function(function)
            .with_tensor(WireTensor {
                name: wire.name.clone(),
                shape: wire.shape.clone(),
                packed: wire.packed,
                offset: 0,
                slots: out_slots,
            })
            .write_to(&mut self.stream)?;
        Ok(())
    }

    fn answer_max_pool(&mut self, request: &Message) -> Result<()> {
        let wire = request.tensors.first().ok_or_else(|| {
            BackendError::ClientProtocolError("max-pool request without a tensor".into())
        })?;
        let count = Self::wire_values_per_slot(wire);

        let mut max_values = vec![f64::NEG_INFINITY; count];
        let mut lineage = None;
        let mut complex = self.params.complex_packing();
        for wire_slot in &wire.slots {
            let slot = HEType::from_wire_slot(wire_slot, &self.context)?;
            complex = slot.complex_packing();
            if slot.is_ciphertext() {
                let c = slot.ciphertext()?;
                lineage.get_or_insert((c.parms_id, c.scale));
            }
            let values = self.slot_values(&slot, count)?;
            for (m, i) in max_values.iter_mut().zip(0..) {
                let v = if values.len() == 1 { values[0] } else { values[i] };
                *m = m.max(v);
            }
        }

        let out = match lineage {
            Some((parms_id, scale)) => {
                let plain = self
                    .encoder
                    .encode_real(&max_values, parms_id, scale, complex)?;
                let mut rng = rand::thread_rng();
                HEType::from_ciphertext(self.encryptor.encrypt(&plain, &mut rng)?, complex)
            }
            None => HEType::from_plaintext(HEPlaintext::from_vec(max_values), complex),
        };

        Message::response()
            .with_function(FunctionCall::MaxPool)
            .with_tensor(WireTensor {
                name: wire.name.clone(),
                shape: vec![count as u64, 1],
                packed: wire.packed,
                offset: 0,
                slots: vec![out.to_wire_slot()],
            })
            .write_to(&mut self.stream)?;
        Ok(())
    }

    fn decrypt_tensor_values(&self, tensor: &mut HETensor) -> Result<Vec<f64>> {
        let count = if tensor.is_packed() {
            tensor.batch_size()
        } else {
            1
        };
        for slot in tensor.data_mut() {
            if slot.is_ciphertext() {
                let plain = self.decryptor.decrypt(slot.ciphertext()?)?;
                let values = self
                    .encoder
                    .decode_real(&plain, count, slot.complex_packing())?;
                slot.set_plaintext(HEPlaintext::from_vec(values));
            }
        }
        tensor.read_values()
    }
}
