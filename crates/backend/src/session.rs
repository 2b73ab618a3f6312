//! Server side of the client session.
//!
//! One long-lived TCP connection per call. An accept thread hands the socket
//! to a reader thread that processes frames in arrival order and fills
//! rendezvous state guarded by a single mutex; the executor thread blocks on
//! condition variables (one for session start, one for client inputs, one
//! shared by the ReLU family, one for max-pool) and never touches the socket
//! reader. Writes go through their own mutex, so a blocked executor write
//! serializes against nothing else.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use veilnn_protocol::{FunctionCall, Message, MessageType, WireTensor};

use crate::backend::HeBackend;
use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::HEType;
use crate::tensor::HETensor;

/// Shape request entry for one client-bound parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub param_index: usize,
    pub name: String,
    pub shape: Vec<usize>,
    pub packed: bool,
    pub element_type: ElementType,
}

#[derive(Default)]
struct Shared {
    session_started: bool,
    closed: bool,
    close_reason: Option<String>,

    client_inputs: Vec<Option<HETensor>>,
    client_inputs_received: bool,

    relu_data: Vec<Option<HEType>>,
    unknown_relu_idx: Vec<usize>,
    relu_done_count: usize,

    max_pool_data: Option<HEType>,
}

pub struct SessionServer {
    backend: Arc<HeBackend>,
    specs: Vec<ParamSpec>,
    port: u16,

    writer: Mutex<Option<TcpStream>>,
    shared: Mutex<Shared>,
    session_cond: Condvar,
    inputs_cond: Condvar,
    relu_cond: Condvar,
    max_pool_cond: Condvar,

    public_key_set: AtomicBool,
    eval_key_set: AtomicBool,
    sent_inference_shape: AtomicBool,
}

impl SessionServer {
    /// Bind the listener (the standard library sets SO_REUSEADDR on Unix
    /// listeners) and spawn the accept thread. Port 0 picks a free port,
    /// readable afterwards through `port()`.
    pub fn start(
        backend: Arc<HeBackend>,
        port: u16,
        specs: Vec<ParamSpec>,
        parameter_count: usize,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let bound_port = listener.local_addr()?.port();

        let mut shared = Shared::default();
        shared.client_inputs = (0..parameter_count).map(|_| None).collect();

        let server = Arc::new(Self {
            backend,
            specs,
            port: bound_port,
            writer: Mutex::new(None),
            shared: Mutex::new(shared),
            session_cond: Condvar::new(),
            inputs_cond: Condvar::new(),
            relu_cond: Condvar::new(),
            max_pool_cond: Condvar::new(),
            public_key_set: AtomicBool::new(false),
            eval_key_set: AtomicBool::new(false),
            sent_inference_shape: AtomicBool::new(false),
        });

        let accept_server = server.clone();
        std::thread::Builder::new()
            .name("he-session-accept".into())
            .spawn(move || accept_server.accept_loop(listener))?;

        Ok(server)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "client connection accepted");
                    match stream.try_clone() {
                        Ok(write_half) => *self.writer.lock() = Some(write_half),
                        Err(e) => {
                            tracing::error!(error = %e, "could not clone session socket");
                            continue;
                        }
                    }
                    {
                        let mut shared = self.shared.lock();
                        shared.session_started = true;
                    }
                    self.session_cond.notify_all();
                    self.read_loop(stream);
                    return;
                }
                Err(e) => {
                    // Acceptor errors retry; only a live session is fatal.
                    tracing::error!(error = %e, "error accepting connection");
                }
            }
        }
    }

    fn read_loop(self: &Arc<Self>, mut stream: TcpStream) {
        loop {
            match Message::read_from(&mut stream) {
                Ok(message) => {
                    if let Err(e) = self.handle_message(message) {
                        tracing::error!(error = %e, "failed handling session message");
                        self.close_with(format!("{e}"));
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "session read ended");
                    self.close_with(format!("{e}"));
                    return;
                }
            }
        }
    }

    fn handle_message(self: &Arc<Self>, message: Message) -> Result<()> {
        match message.message_type() {
            MessageType::Response => {
                if let Some(bytes) = &message.public_key {
                    tracing::debug!("loading client public key");
                    self.backend.set_public_key_bytes(bytes)?;
                    self.public_key_set.store(true, Ordering::SeqCst);
                }
                if let Some(bytes) = &message.relin_keys {
                    tracing::debug!("loading client evaluation keys");
                    self.backend.set_relin_keys_bytes(bytes)?;
                    self.eval_key_set.store(true, Ordering::SeqCst);
                }
                if self.public_key_set.load(Ordering::SeqCst)
                    && self.eval_key_set.load(Ordering::SeqCst)
                    && !self.sent_inference_shape.swap(true, Ordering::SeqCst)
                {
                    self.send_inference_shape()?;
                }

                match &message.function {
                    Some(FunctionCall::Relu) | Some(FunctionCall::BoundedRelu { .. }) => {
                        self.handle_relu_result(&message)?;
                    }
                    Some(FunctionCall::MaxPool) => {
                        self.handle_max_pool_result(&message)?;
                    }
                    _ => {}
                }
                Ok(())
            }
            MessageType::Request => {
                for tensor in &message.tensors {
                    self.handle_client_tensor(tensor)?;
                }
                Ok(())
            }
            MessageType::Unknown => Err(BackendError::ClientProtocolError(
                "message with unknown type tag".into(),
            )),
        }
    }

    fn send_inference_shape(&self) -> Result<()> {
        let mut message = Message::request().with_function(FunctionCall::Parameter);
        for spec in &self.specs {
            tracing::info!(
                name = %spec.name,
                shape = ?spec.shape,
                packed = spec.packed,
                "requesting inference tensor"
            );
            message.tensors.push(WireTensor {
                name: spec.name.clone(),
                shape: spec.shape.iter().map(|&d| d as u64).collect(),
                packed: spec.packed,
                offset: 0,
                slots: Vec::new(),
            });
        }
        self.write_message(&message)
    }

    fn handle_client_tensor(&self, wire: &WireTensor) -> Result<()> {
        let spec = self
            .specs
            .iter()
            .find(|s| s.name == wire.name)
            .ok_or_else(|| {
                BackendError::ClientProtocolError(format!(
                    "no client parameter named {:?}",
                    wire.name
                ))
            })?;

        let max_batch = self.backend.max_batch_size();
        let batch = HETensor::batch_size_of(
            &wire.shape.iter().map(|&d| d as usize).collect::<Vec<_>>(),
            wire.packed,
        );
        if batch > max_batch {
            return Err(BackendError::ClientProtocolError(format!(
                "batch size {batch} exceeds the packing capacity {max_batch}"
            )));
        }

        let mut shared = self.shared.lock();
        let entry = &mut shared.client_inputs[spec.param_index];
        if entry.is_none() {
            *entry = Some(HETensor::from_wire_shape(
                spec.element_type,
                wire,
                self.backend.complex_packing(),
            ));
        }
        entry
            .as_mut()
            .expect("created above")
            .load_wire(wire, self.backend.context())?;

        // All client-bound parameters fully loaded?
        let done = self.specs.iter().all(|s| {
            shared.client_inputs[s.param_index]
                .as_ref()
                .is_some_and(|t| t.done_loading())
        });
        if done {
            tracing::debug!("done loading client inputs");
            shared.client_inputs_received = true;
            self.inputs_cond.notify_all();
        }
        Ok(())
    }

    fn handle_relu_result(&self, message: &Message) -> Result<()> {
        if message.tensors.len() != 1 {
            return Err(BackendError::ClientProtocolError(format!(
                "expected one tensor per nonlinear response, got {}",
                message.tensors.len()
            )));
        }
        let wire = &message.tensors[0];
        let mut shared = self.shared.lock();
        let base = shared.relu_done_count;
        if base + wire.slots.len() > shared.unknown_relu_idx.len() {
            return Err(BackendError::ClientProtocolError(
                "nonlinear response carries more slots than requested".into(),
            ));
        }
        for (k, slot) in wire.slots.iter().enumerate() {
            let value = HEType::from_wire_slot(slot, self.backend.context())?;
            let idx = shared.unknown_relu_idx[base + k];
            shared.relu_data[idx] = Some(value);
        }
        shared.relu_done_count += wire.slots.len();
        self.relu_cond.notify_all();
        Ok(())
    }

    fn handle_max_pool_result(&self, message: &Message) -> Result<()> {
        if message.tensors.len() != 1 || message.tensors[0].slots.len() != 1 {
            return Err(BackendError::ClientProtocolError(
                "max-pool responses carry exactly one slot".into(),
            ));
        }
        let value = HEType::from_wire_slot(&message.tensors[0].slots[0], self.backend.context())?;
        let mut shared = self.shared.lock();
        shared.max_pool_data = Some(value);
        self.max_pool_cond.notify_all();
        Ok(())
    }

    fn close_with(&self, reason: String) {
        tracing::info!(%reason, "session closed");
        {
            let mut shared = self.shared.lock();
            shared.closed = true;
            shared.close_reason.get_or_insert(reason);
        }
        self.session_cond.notify_all();
        self.inputs_cond.notify_all();
        self.relu_cond.notify_all();
        self.max_pool_cond.notify_all();
    }

    pub fn write_message(&self, message: &Message) -> Result<()> {
        let mut guard = self.writer.lock();
        let stream = guard
            .as_mut()
            .ok_or_else(|| BackendError::ClientProtocolError("session not connected".into()))?;
        message.write_to(stream)?;
        Ok(())
    }

    pub fn wait_session_started(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        while !shared.session_started {
            if shared.closed {
                return Err(BackendError::ClientAborted);
            }
            self.session_cond.wait(&mut shared);
        }
        Ok(())
    }

    /// Block until every client-bound parameter has arrived, then take them.
    pub fn wait_client_inputs(&self) -> Result<Vec<Option<HETensor>>> {
        let mut shared = self.shared.lock();
        while !shared.client_inputs_received {
            if shared.closed {
                return Err(BackendError::ClientAborted);
            }
            self.inputs_cond.wait(&mut shared);
        }
        Ok(std::mem::take(&mut shared.client_inputs))
    }

    /// Arm the ReLU rendezvous for one offloaded op.
    pub fn begin_relu(&self, element_count: usize, unknown_relu_idx: Vec<usize>) {
        let mut shared = self.shared.lock();
        shared.relu_data = (0..element_count).map(|_| None).collect();
        shared.unknown_relu_idx = unknown_relu_idx;
        shared.relu_done_count = 0;
    }

    /// Block until `expected_done` responses have been applied.
    pub fn wait_relu_done(&self, expected_done: usize) -> Result<()> {
        let mut shared = self.shared.lock();
        while shared.relu_done_count < expected_done {
            if shared.closed {
                return Err(BackendError::ClientAborted);
            }
            self.relu_cond.wait(&mut shared);
        }
        Ok(())
    }

    /// Take the completed ReLU result buffer.
    pub fn take_relu_data(&self) -> Vec<Option<HEType>> {
        std::mem::take(&mut self.shared.lock().relu_data)
    }

    pub fn begin_max_pool(&self) {
        self.shared.lock().max_pool_data = None;
    }

    pub fn wait_max_pool(&self) -> Result<HEType> {
        let mut shared = self.shared.lock();
        loop {
            if let Some(value) = shared.max_pool_data.take() {
                return Ok(value);
            }
            if shared.closed {
                return Err(BackendError::ClientAborted);
            }
            self.max_pool_cond.wait(&mut shared);
        }
    }
}
