//! The graph executor.
//!
//! `call` binds parameters, walks the topologically ordered node list
//! dispatching one kernel per node, retires tensors named in each node's
//! liveness free list, and routes results back to the caller (and to the
//! client when a session is attached). Nonlinear ops on ciphertext slots are
//! offloaded to the key-holding client in batches, with the executor thread
//! parked on a condition variable until the session thread applies the
//! responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use veilnn_protocol::{FunctionCall, Message, WireTensor};

use crate::annotation::{propagate, Annotation};
use crate::backend::HeBackend;
use crate::error::{BackendError, Result};
use crate::graph::{Graph, Node, NodeId, OpKind, TensorId};
use crate::he_type::HEType;
use crate::kernels;
use crate::mod_chain::{match_to_smallest_chain_index, mod_reduce_slots, rescale_slots};
use crate::session::{ParamSpec, SessionServer};
use crate::tensor::HETensor;

/// Largest number of slots shipped in one offload request.
pub const MAX_OFFLOAD_BATCH: usize = 1000;

#[derive(Debug, Clone)]
pub struct PerfCounter {
    pub name: String,
    pub microseconds: u64,
    pub calls: usize,
}

pub struct HeExecutable {
    backend: Arc<HeBackend>,
    graph: Graph,
    annotations: Vec<Annotation>,
    batch_size: usize,
    timers: HashMap<NodeId, (Duration, usize)>,
    session: Option<Arc<SessionServer>>,
    server_setup_done: bool,
}

impl HeExecutable {
    /// Compile-time validation; the performance-collection flag is accepted
    /// and unused.
    pub fn compile(
        backend: Arc<HeBackend>,
        graph: Graph,
        _enable_performance_collection: bool,
    ) -> Result<Self> {
        for node in graph.nodes() {
            if !backend.is_supported_type(node.element_type) {
                return Err(BackendError::UnsupportedType(
                    node.element_type.to_string(),
                ));
            }
        }

        if backend.config().enable_client {
            let from_client = graph
                .parameters()
                .iter()
                .filter(|&&p| backend.config().tensor(graph.parameter_name(p)).from_client)
                .count();
            if from_client == 0 {
                return Err(BackendError::InvalidParameters(
                    "client mode requires at least one client-bound parameter".into(),
                ));
            }
            if graph.results().len() != 1 {
                return Err(BackendError::UnsupportedOp(format!(
                    "client mode supports exactly one result, got {}",
                    graph.results().len()
                )));
            }
        }

        let annotation_count = graph.nodes().len();
        Ok(Self {
            backend,
            graph,
            annotations: vec![Annotation::default(); annotation_count],
            batch_size: 1,
            timers: HashMap::new(),
            session: None,
            server_setup_done: false,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn client_mode(&self) -> bool {
        self.backend.config().enable_client
    }

    /// The bound session port (client mode, after setup).
    pub fn port(&self) -> Option<u16> {
        self.session.as_ref().map(|s| s.port())
    }

    fn set_batch_size(&mut self, batch_size: usize) -> Result<()> {
        let max = self.backend.max_batch_size();
        if batch_size > max {
            return Err(BackendError::InvalidParameters(format!(
                "batch size {batch_size} too large (maximum {max})"
            )));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    /// Bind the session listener without blocking; returns the bound port so
    /// a client can be pointed at it. Idempotent.
    pub fn start_server(&mut self) -> Result<u16> {
        if let Some(session) = &self.session {
            return Ok(session.port());
        }
        let specs: Vec<ParamSpec> = self
            .graph
            .parameters()
            .iter()
            .enumerate()
            .filter_map(|(param_index, &node_id)| {
                let name = self.graph.parameter_name(node_id);
                let config = self.backend.config().tensor(name);
                config.from_client.then(|| ParamSpec {
                    param_index,
                    name: name.to_string(),
                    shape: self.graph.node(node_id).output_shape.clone(),
                    packed: config.packed,
                    element_type: self.graph.node(node_id).element_type,
                })
            })
            .collect();

        tracing::info!(port = self.backend.config().port, "starting session server");
        let session = SessionServer::start(
            self.backend.clone(),
            self.backend.config().port,
            specs,
            self.graph.parameters().len(),
        )?;
        let port = session.port();
        self.session = Some(session);
        Ok(port)
    }

    /// Ensure the session is up: bind if needed, block until a client has
    /// connected, then send the encryption parameters. Idempotent.
    pub fn server_setup(&mut self) -> Result<()> {
        if self.server_setup_done {
            return Ok(());
        }
        self.start_server()?;
        let session = self.session.as_ref().expect("started above");

        tracing::debug!("waiting until session started");
        session.wait_session_started()?;

        tracing::debug!("sending encryption parameters");
        let mut message = Message::response();
        message.encryption_parameters = Some(self.backend.params().to_bytes());
        session.write_message(&message)?;

        self.server_setup_done = true;
        Ok(())
    }

    fn validate(&self, outputs: &[HETensor], server_inputs: &[HETensor]) -> Result<()> {
        if outputs.len() != self.graph.results().len() {
            return Err(BackendError::ShapeMismatch(format!(
                "{} outputs for {} result nodes",
                outputs.len(),
                self.graph.results().len()
            )));
        }
        if server_inputs.len() != self.graph.parameters().len() {
            return Err(BackendError::ShapeMismatch(format!(
                "{} inputs for {} parameters",
                server_inputs.len(),
                self.graph.parameters().len()
            )));
        }
        for (i, &param_id) in self.graph.parameters().iter().enumerate() {
            let name = self.graph.parameter_name(param_id);
            if self.client_mode() && self.backend.config().tensor(name).from_client {
                continue;
            }
            let expected = &self.graph.node(param_id).output_shape;
            if server_inputs[i].shape() != expected.as_slice() {
                return Err(BackendError::ShapeMismatch(format!(
                    "parameter {name:?} expects shape {expected:?}, got {:?}",
                    server_inputs[i].shape()
                )));
            }
        }
        Ok(())
    }

    pub fn call(&mut self, outputs: &mut [HETensor], server_inputs: &[HETensor]) -> Result<()> {
        self.validate(outputs, server_inputs)?;

        if self.client_mode() {
            self.server_setup()?;
        }

        let mut client_inputs = match &self.session {
            Some(session) => {
                tracing::info!("waiting for client inputs");
                session.wait_client_inputs()?
            }
            None => Vec::new(),
        };

        // Bind parameters and fix their annotations from the data actually
        // bound, then propagate through the graph.
        let mut tensor_map: HashMap<TensorId, HETensor> = HashMap::new();
        let mut param_annotations: HashMap<NodeId, Annotation> = HashMap::new();
        let parameter_ids = self.graph.parameters().to_vec();
        for (i, &param_id) in parameter_ids.iter().enumerate() {
            let name = self.graph.parameter_name(param_id).to_string();
            let config = self.backend.config().tensor(&name);
            let from_client = self.client_mode() && config.from_client;

            let tensor = if from_client {
                let tensor = client_inputs
                    .get_mut(i)
                    .and_then(Option::take)
                    .ok_or_else(|| {
                        BackendError::ClientProtocolError(format!(
                            "client never supplied parameter {name:?}"
                        ))
                    })?;
                tracing::info!(%name, shape = ?tensor.shape(), "bound client parameter");
                tensor
            } else {
                let mut tensor = server_inputs[i].clone();
                if !tensor.any_encrypted_data() {
                    if config.packed {
                        tensor.pack()?;
                    } else {
                        tensor.unpack()?;
                    }
                }
                if config.encrypt && !tensor.any_encrypted_data() {
                    tracing::debug!(%name, "encrypting server parameter");
                    self.backend.encrypt_tensor(&mut tensor)?;
                }
                tensor
            };

            if tensor.is_packed() {
                self.set_batch_size(tensor.batch_size())?;
            }
            param_annotations.insert(
                param_id,
                Annotation {
                    encrypted: tensor.any_encrypted_data(),
                    packed: tensor.is_packed(),
                    from_client,
                },
            );
            tensor_map.insert(param_id, tensor);
        }
        self.annotations = propagate(&self.graph, &param_annotations);

        // Walk the ordered node list.
        for node_id in 0..self.graph.nodes().len() {
            let node = self.graph.node(node_id).clone();
            if matches!(node.op, OpKind::Parameter { .. }) {
                continue;
            }

            let started = Instant::now();
            let out_tensor = self.dispatch(&node, &tensor_map)?;
            let elapsed = started.elapsed();

            let timer = self.timers.entry(node_id).or_insert((Duration::ZERO, 0));
            timer.0 += elapsed;
            timer.1 += 1;
            if self.backend.verbose_op(node.op.name()) {
                tracing::info!(
                    op = node.op.name(),
                    node = node_id,
                    ms = elapsed.as_millis() as u64,
                    "kernel complete"
                );
            }

            tensor_map.insert(node.tensor_id(), out_tensor);

            for &dead in &node.liveness_free_list {
                tensor_map.remove(&dead);
            }
        }

        for (k, &result_id) in self.graph.results().iter().enumerate() {
            let tensor = tensor_map.get(&result_id).ok_or_else(|| {
                BackendError::ShapeMismatch(format!("result tensor {result_id} missing"))
            })?;
            outputs[k] = tensor.clone();
        }

        if let Some(session) = self.session.clone() {
            tracing::info!("sending results to client");
            for wire in outputs[0].to_wire_tensors(MAX_OFFLOAD_BATCH) {
                session.write_message(&Message::response().with_tensor(wire))?;
            }
        }
        Ok(())
    }

    pub fn performance_counters(&self) -> Vec<PerfCounter> {
        let mut counters: Vec<PerfCounter> = self
            .timers
            .iter()
            .map(|(&node_id, &(total, calls))| PerfCounter {
                name: format!("{}_{node_id}", self.graph.node(node_id).op.name()),
                microseconds: total.as_micros() as u64,
                calls,
            })
            .collect();
        counters.sort_by(|a, b| b.microseconds.cmp(&a.microseconds));
        counters
    }

    fn annotation(&self, node_id: NodeId) -> Annotation {
        self.annotations[node_id]
    }

    /// Per-slot shape of a node's output under the current annotation.
    fn out_packed_shape(&self, node: &Node) -> Vec<usize> {
        let mut shape = node.output_shape.clone();
        if self.annotation(node.id).packed {
            if let Some(first) = shape.first_mut() {
                *first = 1;
            }
        }
        shape
    }

    fn values_per_slot(&self, node: &Node) -> usize {
        if self.annotation(node.id).packed {
            self.batch_size
        } else {
            1
        }
    }

    /// Whether an input needs repacking before dispatch: an all-plain
    /// unpacked tensor feeding a packed node (constants in packed graphs).
    fn needs_repack(&self, node: &Node, tensor: &HETensor) -> bool {
        self.annotation(node.id).packed
            && !tensor.is_packed()
            && !tensor.any_encrypted_data()
            && tensor.shape().first() == Some(&self.batch_size)
    }

    fn dispatch(&self, node: &Node, tensor_map: &HashMap<TensorId, HETensor>) -> Result<HETensor> {
        // Materialize repacked copies first so the reference pass below can
        // borrow them alongside the slot map.
        let mut holder = Vec::new();
        for &input in &node.inputs {
            let tensor = tensor_map.get(&input).ok_or_else(|| {
                BackendError::ShapeMismatch(format!("input tensor {input} missing from slot map"))
            })?;
            if self.needs_repack(node, tensor) {
                let mut packed = tensor.clone();
                packed.pack()?;
                holder.push(packed);
            }
        }

        let mut holder_iter = holder.iter();
        let inputs: Vec<&HETensor> = node
            .inputs
            .iter()
            .map(|&input| {
                let tensor = tensor_map.get(&input).expect("checked above");
                if self.needs_repack(node, tensor) {
                    holder_iter.next().expect("adapted tensor recorded")
                } else {
                    tensor
                }
            })
            .collect();

        let annotation = self.annotation(node.id);
        let packed = annotation.packed;
        let out_shape = self.out_packed_shape(node);
        let out_count: usize = out_shape.iter().product::<usize>().max(1);
        let element_type = node.element_type;
        let backend = &self.backend;
        let lazy = backend.lazy_mod();
        let values_per_slot = self.values_per_slot(node);

        let data = match &node.op {
            OpKind::Add => {
                // Lazy modulus never pays off on an isolated addition.
                kernels::add::add(
                    inputs[0].data(),
                    inputs[1].data(),
                    out_count,
                    element_type,
                    backend,
                    false,
                )?
            }
            OpKind::Subtract => kernels::subtract::subtract(
                inputs[0].data(),
                inputs[1].data(),
                out_count,
                element_type,
                backend,
            )?,
            OpKind::Multiply => {
                let mut data = kernels::multiply::multiply(
                    inputs[0].data(),
                    inputs[1].data(),
                    out_count,
                    element_type,
                    backend,
                )?;
                rescale_slots(&mut data, backend)?;
                data
            }
            OpKind::Divide => {
                let mut data = kernels::divide::divide(
                    inputs[0].data(),
                    inputs[1].data(),
                    out_count,
                    element_type,
                    backend,
                    values_per_slot,
                )?;
                rescale_slots(&mut data, backend)?;
                data
            }
            OpKind::Minimum => kernels::minimum::minimum(
                inputs[0].data(),
                inputs[1].data(),
                out_count,
                backend,
                values_per_slot,
            )?,
            OpKind::Power => {
                if self.session.is_some() {
                    tracing::warn!("power is evaluated on the server; not privacy-preserving");
                }
                kernels::power::power(
                    inputs[0].data(),
                    inputs[1].data(),
                    out_count,
                    element_type,
                    backend,
                    values_per_slot,
                )?
            }
            OpKind::Negative => {
                kernels::negate::negate(inputs[0].data(), out_count, element_type, backend)?
            }
            OpKind::Exp => {
                if self.session.is_some() {
                    return Err(BackendError::UnsupportedOp(
                        "Exp is not implemented for the client-aided model".into(),
                    ));
                }
                kernels::exp::exp(inputs[0].data(), out_count, backend, values_per_slot)?
            }
            OpKind::Relu => {
                if self.session.is_some() {
                    self.offload_relu(inputs[0], FunctionCall::Relu)?
                } else {
                    kernels::relu::relu(inputs[0].data(), out_count, backend, values_per_slot)?
                }
            }
            OpKind::BoundedRelu { alpha } => {
                if self.session.is_some() {
                    self.offload_relu(inputs[0], FunctionCall::BoundedRelu { alpha: *alpha })?
                } else {
                    kernels::relu::bounded_relu(
                        inputs[0].data(),
                        out_count,
                        *alpha,
                        backend,
                        values_per_slot,
                    )?
                }
            }
            OpKind::Softmax { axes } => {
                if packed && axes.contains(&0) {
                    return Err(BackendError::UnsupportedOp(
                        "softmax axes cannot contain 0 for packed tensors".into(),
                    ));
                }
                if self.session.is_some() {
                    tracing::warn!("softmax is evaluated on the server; not privacy-preserving");
                }
                kernels::softmax::softmax(
                    inputs[0].data(),
                    &inputs[0].packed_shape(),
                    axes,
                    element_type,
                    backend,
                    values_per_slot,
                )?
            }
            OpKind::Max { reduction_axes } => {
                if packed && reduction_axes.contains(&0) {
                    return Err(BackendError::UnsupportedOp(
                        "max reduction axes cannot contain 0 for packed tensors".into(),
                    ));
                }
                if self.session.is_some() {
                    return Err(BackendError::UnsupportedOp(
                        "Max is not implemented for the client-aided model".into(),
                    ));
                }
                kernels::max::max(
                    inputs[0].data(),
                    &inputs[0].packed_shape(),
                    &out_shape,
                    reduction_axes,
                    backend,
                    values_per_slot,
                )?
            }
            OpKind::Sum { reduction_axes } => {
                if packed && reduction_axes.contains(&0) {
                    return Err(BackendError::UnsupportedOp(
                        "sum reduction axes cannot contain 0 for packed tensors".into(),
                    ));
                }
                let mut data = kernels::sum::sum(
                    inputs[0].data(),
                    &inputs[0].packed_shape(),
                    &out_shape,
                    reduction_axes,
                    element_type,
                    backend,
                    lazy,
                )?;
                if lazy {
                    mod_reduce_slots(&mut data, backend)?;
                }
                data
            }
            OpKind::AvgPool {
                window_shape,
                strides,
                padding_below,
                padding_above,
                include_padding,
            } => {
                let mut data = kernels::avg_pool::avg_pool(
                    inputs[0].data(),
                    &inputs[0].packed_shape(),
                    &out_shape,
                    window_shape,
                    strides,
                    padding_below,
                    padding_above,
                    *include_padding,
                    backend,
                    lazy,
                )?;
                if lazy {
                    mod_reduce_slots(&mut data, backend)?;
                }
                rescale_slots(&mut data, backend)?;
                data
            }
            OpKind::MaxPool {
                window_shape,
                strides,
                padding_below,
                ..
            } => {
                if self.session.is_some() {
                    self.offload_max_pool(
                        inputs[0],
                        &out_shape,
                        window_shape,
                        strides,
                        padding_below,
                    )?
                } else {
                    kernels::max_pool::max_pool(
                        inputs[0].data(),
                        &inputs[0].packed_shape(),
                        &out_shape,
                        window_shape,
                        strides,
                        padding_below,
                        backend,
                        packed,
                        self.batch_size,
                    )?
                }
            }
            OpKind::BatchNormInference { eps } => kernels::batch_norm::batch_norm_inference(
                *eps,
                inputs[0].data(),
                inputs[1].data(),
                inputs[2].data(),
                inputs[3].data(),
                inputs[4].data(),
                &inputs[2].packed_shape(),
                backend,
            )?,
            OpKind::Convolution {
                window_movement_strides,
                window_dilation_strides,
                padding_below,
                padding_above,
            } => {
                if backend.verbose_op(node.op.name()) {
                    tracing::info!(
                        in_shape = ?inputs[0].packed_shape(),
                        filter_shape = ?inputs[1].packed_shape(),
                        out_shape = ?out_shape,
                        "convolution"
                    );
                }
                let mut data = kernels::convolution::convolution(
                    inputs[0].data(),
                    inputs[1].data(),
                    &inputs[0].packed_shape(),
                    &inputs[1].packed_shape(),
                    &out_shape,
                    window_movement_strides,
                    window_dilation_strides,
                    padding_below,
                    padding_above,
                    element_type,
                    backend,
                    lazy,
                )?;
                if lazy {
                    mod_reduce_slots(&mut data, backend)?;
                }
                rescale_slots(&mut data, backend)?;
                data
            }
            OpKind::Dot {
                reduction_axes_count,
            } => {
                let mut data = kernels::dot::dot(
                    inputs[0].data(),
                    inputs[1].data(),
                    &inputs[0].packed_shape(),
                    &inputs[1].packed_shape(),
                    &out_shape,
                    *reduction_axes_count,
                    element_type,
                    backend,
                    lazy,
                )?;
                if lazy {
                    mod_reduce_slots(&mut data, backend)?;
                }
                rescale_slots(&mut data, backend)?;
                data
            }
            OpKind::Broadcast { broadcast_axes } => kernels::broadcast::broadcast(
                inputs[0].data(),
                &inputs[0].packed_shape(),
                &out_shape,
                broadcast_axes,
            )?,
            OpKind::Concat { axis } => {
                let slot_arrays: Vec<&[HEType]> = inputs.iter().map(|t| t.data()).collect();
                let in_shapes: Vec<Vec<usize>> =
                    inputs.iter().map(|t| t.packed_shape()).collect();
                kernels::concat::concat(&slot_arrays, &in_shapes, &out_shape, *axis)?
            }
            OpKind::Constant { values } => kernels::constant::constant(
                values,
                out_count,
                backend.complex_packing(),
            )?,
            OpKind::Pad {
                padding_below,
                mode,
                ..
            } => kernels::pad::pad(
                inputs[0].data(),
                &inputs[1].data()[0],
                &inputs[0].packed_shape(),
                &out_shape,
                padding_below,
                *mode,
            )?,
            OpKind::Reshape {
                input_order,
                output_shape: _,
            } => kernels::reshape::reshape(
                inputs[0].data(),
                &inputs[0].packed_shape(),
                input_order,
                &out_shape,
            )?,
            OpKind::Reverse { reversed_axes } => {
                kernels::reverse::reverse(inputs[0].data(), &inputs[0].packed_shape(), reversed_axes)?
            }
            OpKind::Slice {
                lower_bounds,
                upper_bounds,
                strides,
            } => {
                let in_shape = inputs[0].packed_shape();
                // A packed tensor's axis 0 collapses to one row; a slice
                // addressing the whole batch addresses that row.
                let mut lower = lower_bounds.clone();
                let mut upper = upper_bounds.clone();
                if packed && !upper.is_empty() && upper[0] > in_shape[0] {
                    if upper[0] != self.batch_size {
                        return Err(BackendError::ShapeMismatch(format!(
                            "slice upper bound {} incompatible with batch size {}",
                            upper[0], self.batch_size
                        )));
                    }
                    upper[0] = 1;
                    lower[0] = 0;
                }
                kernels::slice::slice(
                    inputs[0].data(),
                    &in_shape,
                    &lower,
                    strides,
                    &out_shape,
                )?
            }
            OpKind::Result => kernels::result::result(inputs[0].data(), out_count)?,
            OpKind::Parameter { .. } => unreachable!("parameters are skipped by the walk"),
        };

        let mut out = HETensor::new(
            element_type,
            &node.output_shape,
            packed,
            backend.complex_packing(),
            &format!("t{}", node.id),
        );
        if data.len() != out.batched_element_count() {
            return Err(BackendError::ShapeMismatch(format!(
                "kernel for {} produced {} slots, expected {}",
                node.op.name(),
                data.len(),
                out.batched_element_count()
            )));
        }
        out.set_data(data);
        Ok(out)
    }

    /// Client-aided ReLU / bounded ReLU: match chain indices, compute
    /// plaintext slots locally, ship ciphertext slots in batches, and
    /// reassemble positionally.
    fn offload_relu(&self, arg: &HETensor, function: FunctionCall) -> Result<Vec<HEType>> {
        let session = self
            .session
            .as_ref()
            .expect("offload only runs in client mode");
        let backend = &self.backend;

        let mut slots = arg.data().to_vec();
        let smallest = match_to_smallest_chain_index(&mut slots, backend)?;
        tracing::debug!(chain_index = smallest, "matched moduli for offload");

        let element_count = slots.len();
        let mut local: Vec<Option<HEType>> = vec![None; element_count];
        let mut unknown_idx = Vec::with_capacity(element_count);
        for (i, slot) in slots.iter().enumerate() {
            if slot.is_plaintext() {
                let plain = slot.plaintext()?;
                let mapped = match &function {
                    FunctionCall::BoundedRelu { alpha } => {
                        kernels::relu::scalar_bounded_relu(plain, *alpha)
                    }
                    _ => kernels::relu::scalar_relu(plain),
                };
                local[i] = Some(HEType::from_plaintext(mapped, slot.complex_packing()));
            } else {
                unknown_idx.push(i);
            }
        }

        let unknown_count = unknown_idx.len();
        session.begin_relu(element_count, unknown_idx.clone());

        let mut sent = 0usize;
        for batch in unknown_idx.chunks(MAX_OFFLOAD_BATCH) {
            let batch_slots: Vec<_> = batch.iter().map(|&i| slots[i].to_wire_slot()).collect();
            let wire = WireTensor {
                name: "relu".into(),
                shape: vec![self.batch_size as u64, batch_slots.len() as u64],
                packed: arg.is_packed(),
                offset: 0,
                slots: batch_slots,
            };
            tracing::debug!(size = batch.len(), "sending nonlinear request batch");
            session.write_message(
                &Message::request()
                    .with_function(function.clone())
                    .with_tensor(wire),
            )?;
            sent += batch.len();
            // One outstanding request at a time.
            session.wait_relu_done(sent)?;
        }
        debug_assert_eq!(sent, unknown_count);

        let mut returned = session.take_relu_data().into_iter();
        let mut out = Vec::with_capacity(element_count);
        for entry in local {
            let from_client = returned.next().flatten();
            match entry {
                Some(plain_slot) => out.push(plain_slot),
                None => out.push(from_client.ok_or_else(|| {
                    BackendError::ClientProtocolError(
                        "client response left an offloaded slot unfilled".into(),
                    )
                })?),
            }
        }
        Ok(out)
    }

    /// Client-aided max pool: one request per output cell carrying the
    /// window's slots; the client returns a single maximized slot.
    fn offload_max_pool(
        &self,
        arg: &HETensor,
        out_shape: &[usize],
        window_shape: &[usize],
        strides: &[usize],
        padding_below: &[usize],
    ) -> Result<Vec<HEType>> {
        let session = self
            .session
            .as_ref()
            .expect("offload only runs in client mode");

        let in_shape = arg.packed_shape();
        let maximize_lists = kernels::max_pool::max_pool_index_lists(
            &in_shape,
            out_shape,
            window_shape,
            strides,
            padding_below,
        );

        let mut out = Vec::with_capacity(maximize_lists.len());
        for list in &maximize_lists {
            if list.is_empty() {
                return Err(BackendError::ShapeMismatch(
                    "max-pool window is empty".into(),
                ));
            }
            let slots: Vec<_> = list.iter().map(|&i| arg.slot(i).to_wire_slot()).collect();
            let wire = WireTensor {
                name: "max_pool".into(),
                shape: vec![self.batch_size as u64, slots.len() as u64],
                packed: arg.is_packed(),
                offset: 0,
                slots,
            };
            session.begin_max_pool();
            tracing::debug!(window = list.len(), "sending max-pool request");
            session.write_message(
                &Message::request()
                    .with_function(FunctionCall::MaxPool)
                    .with_tensor(wire),
            )?;
            out.push(session.wait_max_pool()?);
        }
        Ok(out)
    }
}
