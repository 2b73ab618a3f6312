//! Static computation graphs over a closed operator set.
//!
//! Nodes arrive fully constructed through [`GraphBuilder`], which checks
//! shapes and element types at insertion and finalizes a topologically
//! ordered node list with per-node liveness free lists. Dispatch is over the
//! closed [`OpKind`] enum; there is no open class hierarchy to fall through.

use std::collections::BTreeSet;

use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::tensor::shape_size;

pub type NodeId = usize;
pub type TensorId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    Constant,
    Edge,
}

/// The supported operator set. Anything outside this enum does not compile
/// into a graph.
#[derive(Debug, Clone)]
pub enum OpKind {
    Add,
    AvgPool {
        window_shape: Vec<usize>,
        strides: Vec<usize>,
        padding_below: Vec<usize>,
        padding_above: Vec<usize>,
        include_padding: bool,
    },
    BatchNormInference {
        eps: f64,
    },
    BoundedRelu {
        alpha: f64,
    },
    Broadcast {
        broadcast_axes: BTreeSet<usize>,
    },
    Concat {
        axis: usize,
    },
    Constant {
        values: Vec<f64>,
    },
    Convolution {
        window_movement_strides: Vec<usize>,
        window_dilation_strides: Vec<usize>,
        padding_below: Vec<usize>,
        padding_above: Vec<usize>,
    },
    Divide,
    Dot {
        reduction_axes_count: usize,
    },
    Exp,
    Max {
        reduction_axes: BTreeSet<usize>,
    },
    MaxPool {
        window_shape: Vec<usize>,
        strides: Vec<usize>,
        padding_below: Vec<usize>,
        padding_above: Vec<usize>,
    },
    Minimum,
    Multiply,
    Negative,
    Pad {
        padding_below: Vec<usize>,
        padding_above: Vec<usize>,
        mode: PadMode,
    },
    Parameter {
        name: String,
    },
    Power,
    Relu,
    Reshape {
        input_order: Vec<usize>,
        output_shape: Vec<usize>,
    },
    Result,
    Reverse {
        reversed_axes: BTreeSet<usize>,
    },
    Slice {
        lower_bounds: Vec<usize>,
        upper_bounds: Vec<usize>,
        strides: Vec<usize>,
    },
    Softmax {
        axes: BTreeSet<usize>,
    },
    Subtract,
    Sum {
        reduction_axes: BTreeSet<usize>,
    },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Add => "Add",
            OpKind::AvgPool { .. } => "AvgPool",
            OpKind::BatchNormInference { .. } => "BatchNormInference",
            OpKind::BoundedRelu { .. } => "BoundedRelu",
            OpKind::Broadcast { .. } => "Broadcast",
            OpKind::Concat { .. } => "Concat",
            OpKind::Constant { .. } => "Constant",
            OpKind::Convolution { .. } => "Convolution",
            OpKind::Divide => "Divide",
            OpKind::Dot { .. } => "Dot",
            OpKind::Exp => "Exp",
            OpKind::Max { .. } => "Max",
            OpKind::MaxPool { .. } => "MaxPool",
            OpKind::Minimum => "Minimum",
            OpKind::Multiply => "Multiply",
            OpKind::Negative => "Negative",
            OpKind::Pad { .. } => "Pad",
            OpKind::Parameter { .. } => "Parameter",
            OpKind::Power => "Power",
            OpKind::Relu => "Relu",
            OpKind::Reshape { .. } => "Reshape",
            OpKind::Result => "Result",
            OpKind::Reverse { .. } => "Reverse",
            OpKind::Slice { .. } => "Slice",
            OpKind::Softmax { .. } => "Softmax",
            OpKind::Subtract => "Subtract",
            OpKind::Sum { .. } => "Sum",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub op: OpKind,
    pub inputs: Vec<NodeId>,
    pub output_shape: Vec<usize>,
    pub element_type: ElementType,
    /// Tensor ids this node's execution retires from the slot map.
    pub liveness_free_list: Vec<TensorId>,
}

impl Node {
    /// A node's single output tensor shares its id.
    pub fn tensor_id(&self) -> TensorId {
        self.id
    }
}

#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    parameters: Vec<NodeId>,
    results: Vec<NodeId>,
}

impl Graph {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn results(&self) -> &[NodeId] {
        &self.results
    }

    pub fn parameter_name(&self, id: NodeId) -> &str {
        match &self.nodes[id].op {
            OpKind::Parameter { name } => name,
            _ => unreachable!("parameter list only holds Parameter nodes"),
        }
    }
}

/// Incremental graph constructor. Shape and type validation happens at
/// insertion, so a successfully built graph dispatches without re-checking.
pub struct GraphBuilder {
    nodes: Vec<Node>,
    parameters: Vec<NodeId>,
    results: Vec<NodeId>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            parameters: Vec::new(),
            results: Vec::new(),
        }
    }

    fn push(
        &mut self,
        op: OpKind,
        inputs: Vec<NodeId>,
        output_shape: Vec<usize>,
        element_type: ElementType,
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            op,
            inputs,
            output_shape,
            element_type,
            liveness_free_list: Vec::new(),
        });
        id
    }

    fn node_shape(&self, id: NodeId) -> Result<&[usize]> {
        self.nodes
            .get(id)
            .map(|n| n.output_shape.as_slice())
            .ok_or_else(|| BackendError::ShapeMismatch(format!("unknown node id {id}")))
    }

    fn node_type(&self, id: NodeId) -> Result<ElementType> {
        self.nodes
            .get(id)
            .map(|n| n.element_type)
            .ok_or_else(|| BackendError::ShapeMismatch(format!("unknown node id {id}")))
    }

    fn check_same_type(&self, ids: &[NodeId]) -> Result<ElementType> {
        let first = self.node_type(ids[0])?;
        for &id in &ids[1..] {
            let ty = self.node_type(id)?;
            if ty != first {
                return Err(BackendError::UnsupportedType(format!(
                    "mixed element types {first} and {ty}"
                )));
            }
        }
        Ok(first)
    }

    pub fn parameter(
        &mut self,
        name: &str,
        element_type: ElementType,
        shape: &[usize],
    ) -> NodeId {
        let id = self.push(
            OpKind::Parameter {
                name: name.to_string(),
            },
            Vec::new(),
            shape.to_vec(),
            element_type,
        );
        self.parameters.push(id);
        id
    }

    pub fn constant(
        &mut self,
        element_type: ElementType,
        shape: &[usize],
        values: Vec<f64>,
    ) -> Result<NodeId> {
        if values.len() != shape_size(shape).max(1) {
            return Err(BackendError::ShapeMismatch(format!(
                "constant of shape {shape:?} needs {} values, got {}",
                shape_size(shape),
                values.len()
            )));
        }
        Ok(self.push(
            OpKind::Constant { values },
            Vec::new(),
            shape.to_vec(),
            element_type,
        ))
    }

    fn elementwise_binary(&mut self, op: OpKind, a: NodeId, b: NodeId) -> Result<NodeId> {
        let ty = self.check_same_type(&[a, b])?;
        let shape_a = self.node_shape(a)?.to_vec();
        let shape_b = self.node_shape(b)?;
        if shape_a != shape_b {
            return Err(BackendError::ShapeMismatch(format!(
                "{} operands {shape_a:?} and {shape_b:?}",
                op.name()
            )));
        }
        Ok(self.push(op, vec![a, b], shape_a, ty))
    }

    fn elementwise_unary(&mut self, op: OpKind, a: NodeId) -> Result<NodeId> {
        let ty = self.node_type(a)?;
        let shape = self.node_shape(a)?.to_vec();
        Ok(self.push(op, vec![a], shape, ty))
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.elementwise_binary(OpKind::Add, a, b)
    }

    pub fn subtract(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.elementwise_binary(OpKind::Subtract, a, b)
    }

    pub fn multiply(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.elementwise_binary(OpKind::Multiply, a, b)
    }

    pub fn divide(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.elementwise_binary(OpKind::Divide, a, b)
    }

    pub fn minimum(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.elementwise_binary(OpKind::Minimum, a, b)
    }

    pub fn power(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.elementwise_binary(OpKind::Power, a, b)
    }

    pub fn negative(&mut self, a: NodeId) -> Result<NodeId> {
        self.elementwise_unary(OpKind::Negative, a)
    }

    pub fn relu(&mut self, a: NodeId) -> Result<NodeId> {
        self.elementwise_unary(OpKind::Relu, a)
    }

    pub fn bounded_relu(&mut self, a: NodeId, alpha: f64) -> Result<NodeId> {
        self.elementwise_unary(OpKind::BoundedRelu { alpha }, a)
    }

    pub fn exp(&mut self, a: NodeId) -> Result<NodeId> {
        self.elementwise_unary(OpKind::Exp, a)
    }

    pub fn softmax(&mut self, a: NodeId, axes: BTreeSet<usize>) -> Result<NodeId> {
        let rank = self.node_shape(a)?.len();
        if axes.iter().any(|&ax| ax >= rank) {
            return Err(BackendError::ShapeMismatch(format!(
                "softmax axes {axes:?} out of range for rank {rank}"
            )));
        }
        self.elementwise_unary(OpKind::Softmax { axes }, a)
    }

    pub fn reverse(&mut self, a: NodeId, reversed_axes: BTreeSet<usize>) -> Result<NodeId> {
        let rank = self.node_shape(a)?.len();
        if reversed_axes.iter().any(|&ax| ax >= rank) {
            return Err(BackendError::ShapeMismatch(format!(
                "reverse axes {reversed_axes:?} out of range for rank {rank}"
            )));
        }
        self.elementwise_unary(OpKind::Reverse { reversed_axes }, a)
    }

    pub fn broadcast(
        &mut self,
        a: NodeId,
        output_shape: &[usize],
        broadcast_axes: BTreeSet<usize>,
    ) -> Result<NodeId> {
        let ty = self.node_type(a)?;
        let in_shape = self.node_shape(a)?.to_vec();
        let squeezed: Vec<usize> = output_shape
            .iter()
            .enumerate()
            .filter(|(axis, _)| !broadcast_axes.contains(axis))
            .map(|(_, &d)| d)
            .collect();
        if squeezed != in_shape {
            return Err(BackendError::ShapeMismatch(format!(
                "broadcast of {in_shape:?} to {output_shape:?} over axes {broadcast_axes:?}"
            )));
        }
        Ok(self.push(
            OpKind::Broadcast { broadcast_axes },
            vec![a],
            output_shape.to_vec(),
            ty,
        ))
    }

    pub fn concat(&mut self, inputs: &[NodeId], axis: usize) -> Result<NodeId> {
        if inputs.is_empty() {
            return Err(BackendError::ShapeMismatch("concat of zero inputs".into()));
        }
        let ty = self.check_same_type(inputs)?;
        let first_shape = self.node_shape(inputs[0])?.to_vec();
        if axis >= first_shape.len() {
            return Err(BackendError::ShapeMismatch(format!(
                "concat axis {axis} out of range for rank {}",
                first_shape.len()
            )));
        }
        let mut axis_total = 0usize;
        for &id in inputs {
            let shape = self.node_shape(id)?;
            if shape.len() != first_shape.len() {
                return Err(BackendError::ShapeMismatch(
                    "concat inputs disagree on rank".into(),
                ));
            }
            for (d, (&got, &expect)) in shape.iter().zip(&first_shape).enumerate() {
                if d != axis && got != expect {
                    return Err(BackendError::ShapeMismatch(format!(
                        "concat inputs disagree on non-concat axis {d}"
                    )));
                }
            }
            axis_total += shape[axis];
        }
        let mut out_shape = first_shape;
        out_shape[axis] = axis_total;
        Ok(self.push(OpKind::Concat { axis }, inputs.to_vec(), out_shape, ty))
    }

    pub fn reshape(
        &mut self,
        a: NodeId,
        input_order: &[usize],
        output_shape: &[usize],
    ) -> Result<NodeId> {
        let ty = self.node_type(a)?;
        let in_shape = self.node_shape(a)?.to_vec();
        let mut sorted = input_order.to_vec();
        sorted.sort_unstable();
        if sorted != (0..in_shape.len()).collect::<Vec<_>>() {
            return Err(BackendError::ShapeMismatch(format!(
                "input order {input_order:?} is not a permutation of rank {}",
                in_shape.len()
            )));
        }
        if shape_size(&in_shape).max(1) != shape_size(output_shape).max(1) {
            return Err(BackendError::ShapeMismatch(format!(
                "reshape {in_shape:?} to {output_shape:?} changes element count"
            )));
        }
        Ok(self.push(
            OpKind::Reshape {
                input_order: input_order.to_vec(),
                output_shape: output_shape.to_vec(),
            },
            vec![a],
            output_shape.to_vec(),
            ty,
        ))
    }

    pub fn slice(
        &mut self,
        a: NodeId,
        lower_bounds: &[usize],
        upper_bounds: &[usize],
        strides: &[usize],
    ) -> Result<NodeId> {
        let ty = self.node_type(a)?;
        let in_shape = self.node_shape(a)?.to_vec();
        let rank = in_shape.len();
        if lower_bounds.len() != rank || upper_bounds.len() != rank || strides.len() != rank {
            return Err(BackendError::ShapeMismatch(format!(
                "slice bounds must have rank {rank}"
            )));
        }
        let mut out_shape = Vec::with_capacity(rank);
        for d in 0..rank {
            if strides[d] == 0 {
                return Err(BackendError::ShapeMismatch("slice stride of zero".into()));
            }
            if lower_bounds[d] > upper_bounds[d] || upper_bounds[d] > in_shape[d] {
                return Err(BackendError::ShapeMismatch(format!(
                    "slice bounds [{}, {}) invalid for axis {d} of extent {}",
                    lower_bounds[d], upper_bounds[d], in_shape[d]
                )));
            }
            out_shape.push((upper_bounds[d] - lower_bounds[d]).div_ceil(strides[d]));
        }
        Ok(self.push(
            OpKind::Slice {
                lower_bounds: lower_bounds.to_vec(),
                upper_bounds: upper_bounds.to_vec(),
                strides: strides.to_vec(),
            },
            vec![a],
            out_shape,
            ty,
        ))
    }

    pub fn pad(
        &mut self,
        a: NodeId,
        pad_value: NodeId,
        padding_below: &[usize],
        padding_above: &[usize],
        mode: PadMode,
    ) -> Result<NodeId> {
        let ty = self.check_same_type(&[a, pad_value])?;
        let in_shape = self.node_shape(a)?.to_vec();
        let rank = in_shape.len();
        if padding_below.len() != rank || padding_above.len() != rank {
            return Err(BackendError::ShapeMismatch(format!(
                "padding must have rank {rank}"
            )));
        }
        let value_shape = self.node_shape(pad_value)?;
        if shape_size(value_shape).max(1) != 1 {
            return Err(BackendError::ShapeMismatch(
                "pad value must be a scalar".into(),
            ));
        }
        let out_shape: Vec<usize> = in_shape
            .iter()
            .zip(padding_below.iter().zip(padding_above))
            .map(|(&d, (&below, &above))| d + below + above)
            .collect();
        Ok(self.push(
            OpKind::Pad {
                padding_below: padding_below.to_vec(),
                padding_above: padding_above.to_vec(),
                mode,
            },
            vec![a, pad_value],
            out_shape,
            ty,
        ))
    }

    pub fn sum(&mut self, a: NodeId, reduction_axes: BTreeSet<usize>) -> Result<NodeId> {
        self.reduction(OpKind::Sum {
            reduction_axes: reduction_axes.clone(),
        }, a, &reduction_axes)
    }

    pub fn max(&mut self, a: NodeId, reduction_axes: BTreeSet<usize>) -> Result<NodeId> {
        self.reduction(OpKind::Max {
            reduction_axes: reduction_axes.clone(),
        }, a, &reduction_axes)
    }

    fn reduction(
        &mut self,
        op: OpKind,
        a: NodeId,
        reduction_axes: &BTreeSet<usize>,
    ) -> Result<NodeId> {
        let ty = self.node_type(a)?;
        let in_shape = self.node_shape(a)?.to_vec();
        if reduction_axes.iter().any(|&ax| ax >= in_shape.len()) {
            return Err(BackendError::ShapeMismatch(format!(
                "reduction axes {reduction_axes:?} out of range for rank {}",
                in_shape.len()
            )));
        }
        let out_shape: Vec<usize> = in_shape
            .iter()
            .enumerate()
            .filter(|(axis, _)| !reduction_axes.contains(axis))
            .map(|(_, &d)| d)
            .collect();
        Ok(self.push(op, vec![a], out_shape, ty))
    }

    pub fn dot(&mut self, a: NodeId, b: NodeId, reduction_axes_count: usize) -> Result<NodeId> {
        let ty = self.check_same_type(&[a, b])?;
        let shape_a = self.node_shape(a)?.to_vec();
        let shape_b = self.node_shape(b)?.to_vec();
        let r = reduction_axes_count;
        if r > shape_a.len() || r > shape_b.len() {
            return Err(BackendError::ShapeMismatch(format!(
                "dot reduction over {r} axes exceeds operand ranks {} and {}",
                shape_a.len(),
                shape_b.len()
            )));
        }
        let contracted_a = &shape_a[shape_a.len() - r..];
        let contracted_b = &shape_b[..r];
        if contracted_a != contracted_b {
            return Err(BackendError::ShapeMismatch(format!(
                "dot contraction dims {contracted_a:?} and {contracted_b:?} differ"
            )));
        }
        let mut out_shape = shape_a[..shape_a.len() - r].to_vec();
        out_shape.extend_from_slice(&shape_b[r..]);
        Ok(self.push(
            OpKind::Dot {
                reduction_axes_count: r,
            },
            vec![a, b],
            out_shape,
            ty,
        ))
    }

    pub fn convolution(
        &mut self,
        data: NodeId,
        filter: NodeId,
        window_movement_strides: &[usize],
        window_dilation_strides: &[usize],
        padding_below: &[usize],
        padding_above: &[usize],
    ) -> Result<NodeId> {
        let ty = self.check_same_type(&[data, filter])?;
        let data_shape = self.node_shape(data)?.to_vec();
        let filter_shape = self.node_shape(filter)?.to_vec();
        if data_shape.len() < 3 || filter_shape.len() != data_shape.len() {
            return Err(BackendError::ShapeMismatch(format!(
                "convolution expects [N, C, spatial...] data and matching filter rank, got {data_shape:?} and {filter_shape:?}"
            )));
        }
        let spatial_rank = data_shape.len() - 2;
        if window_movement_strides.len() != spatial_rank
            || window_dilation_strides.len() != spatial_rank
            || padding_below.len() != spatial_rank
            || padding_above.len() != spatial_rank
        {
            return Err(BackendError::ShapeMismatch(format!(
                "convolution attributes must have spatial rank {spatial_rank}"
            )));
        }
        if filter_shape[1] != data_shape[1] {
            return Err(BackendError::ShapeMismatch(format!(
                "filter input channels {} do not match data channels {}",
                filter_shape[1], data_shape[1]
            )));
        }
        let mut out_shape = vec![data_shape[0], filter_shape[0]];
        for d in 0..spatial_rank {
            let padded = data_shape[2 + d] + padding_below[d] + padding_above[d];
            let extent = (filter_shape[2 + d] - 1) * window_dilation_strides[d] + 1;
            if extent > padded {
                return Err(BackendError::ShapeMismatch(format!(
                    "filter extent {extent} exceeds padded input {padded} on spatial axis {d}"
                )));
            }
            out_shape.push((padded - extent) / window_movement_strides[d] + 1);
        }
        Ok(self.push(
            OpKind::Convolution {
                window_movement_strides: window_movement_strides.to_vec(),
                window_dilation_strides: window_dilation_strides.to_vec(),
                padding_below: padding_below.to_vec(),
                padding_above: padding_above.to_vec(),
            },
            vec![data, filter],
            out_shape,
            ty,
        ))
    }

    fn pool_output_shape(
        &self,
        in_shape: &[usize],
        window_shape: &[usize],
        strides: &[usize],
        padding_below: &[usize],
        padding_above: &[usize],
    ) -> Result<Vec<usize>> {
        if in_shape.len() < 3 {
            return Err(BackendError::ShapeMismatch(format!(
                "pooling expects [N, C, spatial...], got {in_shape:?}"
            )));
        }
        let spatial_rank = in_shape.len() - 2;
        if window_shape.len() != spatial_rank
            || strides.len() != spatial_rank
            || padding_below.len() != spatial_rank
            || padding_above.len() != spatial_rank
        {
            return Err(BackendError::ShapeMismatch(format!(
                "pooling attributes must have spatial rank {spatial_rank}"
            )));
        }
        let mut out_shape = in_shape[..2].to_vec();
        for d in 0..spatial_rank {
            let padded = in_shape[2 + d] + padding_below[d] + padding_above[d];
            if window_shape[d] == 0 || window_shape[d] > padded {
                return Err(BackendError::ShapeMismatch(format!(
                    "window extent {} invalid for padded input {padded} on spatial axis {d}",
                    window_shape[d]
                )));
            }
            out_shape.push((padded - window_shape[d]) / strides[d] + 1);
        }
        Ok(out_shape)
    }

    pub fn avg_pool(
        &mut self,
        a: NodeId,
        window_shape: &[usize],
        strides: &[usize],
        padding_below: &[usize],
        padding_above: &[usize],
        include_padding: bool,
    ) -> Result<NodeId> {
        let ty = self.node_type(a)?;
        let in_shape = self.node_shape(a)?.to_vec();
        let out_shape =
            self.pool_output_shape(&in_shape, window_shape, strides, padding_below, padding_above)?;
        Ok(self.push(
            OpKind::AvgPool {
                window_shape: window_shape.to_vec(),
                strides: strides.to_vec(),
                padding_below: padding_below.to_vec(),
                padding_above: padding_above.to_vec(),
                include_padding,
            },
            vec![a],
            out_shape,
            ty,
        ))
    }

    pub fn max_pool(
        &mut self,
        a: NodeId,
        window_shape: &[usize],
        strides: &[usize],
        padding_below: &[usize],
        padding_above: &[usize],
    ) -> Result<NodeId> {
        let ty = self.node_type(a)?;
        let in_shape = self.node_shape(a)?.to_vec();
        let out_shape =
            self.pool_output_shape(&in_shape, window_shape, strides, padding_below, padding_above)?;
        Ok(self.push(
            OpKind::MaxPool {
                window_shape: window_shape.to_vec(),
                strides: strides.to_vec(),
                padding_below: padding_below.to_vec(),
                padding_above: padding_above.to_vec(),
            },
            vec![a],
            out_shape,
            ty,
        ))
    }

    pub fn batch_norm_inference(
        &mut self,
        gamma: NodeId,
        beta: NodeId,
        input: NodeId,
        mean: NodeId,
        variance: NodeId,
        eps: f64,
    ) -> Result<NodeId> {
        let ty = self.check_same_type(&[gamma, beta, input, mean, variance])?;
        let input_shape = self.node_shape(input)?.to_vec();
        if input_shape.len() < 2 {
            return Err(BackendError::ShapeMismatch(format!(
                "batch norm expects [N, C, ...], got {input_shape:?}"
            )));
        }
        let channels = input_shape[1];
        for (label, id) in [
            ("gamma", gamma),
            ("beta", beta),
            ("mean", mean),
            ("variance", variance),
        ] {
            let shape = self.node_shape(id)?;
            if shape != [channels] {
                return Err(BackendError::ShapeMismatch(format!(
                    "{label} must have shape [{channels}], got {shape:?}"
                )));
            }
        }
        Ok(self.push(
            OpKind::BatchNormInference { eps },
            vec![gamma, beta, input, mean, variance],
            input_shape,
            ty,
        ))
    }

    pub fn result(&mut self, a: NodeId) -> Result<NodeId> {
        let ty = self.node_type(a)?;
        let shape = self.node_shape(a)?.to_vec();
        let id = self.push(OpKind::Result, vec![a], shape, ty);
        self.results.push(id);
        Ok(id)
    }

    /// Finalize: validate the result set and compute liveness free lists.
    pub fn build(mut self) -> Result<Graph> {
        if self.results.is_empty() {
            return Err(BackendError::ShapeMismatch(
                "graph has no result nodes".into(),
            ));
        }

        // Last consumer of each tensor frees it. Parameter and result tensors
        // stay live for the whole call.
        let mut last_use = vec![None::<NodeId>; self.nodes.len()];
        for node in &self.nodes {
            for &input in &node.inputs {
                last_use[input] = Some(node.id);
            }
        }
        let protected: std::collections::HashSet<NodeId> = self
            .parameters
            .iter()
            .chain(self.results.iter())
            .copied()
            .collect();
        for tensor in 0..last_use.len() {
            if protected.contains(&tensor) {
                continue;
            }
            if let Some(consumer) = last_use[tensor] {
                self.nodes[consumer].liveness_free_list.push(tensor);
            }
        }

        Ok(Graph {
            nodes: self.nodes,
            parameters: self.parameters,
            results: self.results,
        })
    }
}
