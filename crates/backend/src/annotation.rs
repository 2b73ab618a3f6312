//! Per-node representation annotations and their propagation.

use std::collections::HashMap;

use crate::graph::{Graph, NodeId, OpKind};

/// How a node's tensor is represented at execution time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Annotation {
    /// Slots are ciphertexts.
    pub encrypted: bool,
    /// Batch axis folded into the slots.
    pub packed: bool,
    /// Parameter arrives over the client session.
    pub from_client: bool,
}

/// Flow annotations from parameters through the graph.
///
/// `encrypted` spreads to any node with an encrypted input; `packed` spreads
/// the same way (packing is a whole-graph layout choice). Constants are plain
/// and unpacked. The pass is a single forward sweep over the topological
/// order, so applying it twice cannot change the outcome.
pub fn propagate(graph: &Graph, parameter_annotations: &HashMap<NodeId, Annotation>) -> Vec<Annotation> {
    let mut annotations = vec![Annotation::default(); graph.nodes().len()];

    for node in graph.nodes() {
        let annotation = match &node.op {
            OpKind::Parameter { .. } => parameter_annotations
                .get(&node.id)
                .copied()
                .unwrap_or_default(),
            OpKind::Constant { .. } => Annotation::default(),
            _ => {
                let mut merged = Annotation::default();
                for &input in &node.inputs {
                    merged.encrypted |= annotations[input].encrypted;
                    merged.packed |= annotations[input].packed;
                }
                merged
            }
        };
        annotations[node.id] = annotation;
    }

    annotations
}
