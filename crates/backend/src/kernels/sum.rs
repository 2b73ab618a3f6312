//! Sum reduction over a set of axes.

use std::collections::BTreeSet;

use rayon::prelude::*;

use crate::backend::HeBackend;
use crate::element::ElementType;
use crate::error::{BackendError, Result};
use crate::he_type::HEType;
use crate::kernels::{coordinates, index_of, SlotAccumulator};

pub fn sum(
    arg: &[HEType],
    in_shape: &[usize],
    out_shape: &[usize],
    reduction_axes: &BTreeSet<usize>,
    element_type: ElementType,
    backend: &HeBackend,
    lazy: bool,
) -> Result<Vec<HEType>> {
    if !backend.is_supported_type(element_type) {
        return Err(BackendError::UnsupportedType(element_type.to_string()));
    }
    let complex = arg
        .first()
        .map(|s| s.complex_packing())
        .unwrap_or_else(|| backend.complex_packing());
    let reduced_shape: Vec<usize> = in_shape
        .iter()
        .enumerate()
        .filter(|(axis, _)| reduction_axes.contains(axis))
        .map(|(_, &d)| d)
        .collect();

    let out_coords = coordinates(out_shape);
    out_coords
        .par_iter()
        .map(|out_coord| {
            let mut acc = SlotAccumulator::new(backend, lazy);
            for reduced_coord in coordinates(&reduced_shape) {
                // Interleave kept and reduced coordinates back into input order.
                let mut in_coord = Vec::with_capacity(in_shape.len());
                let mut kept_iter = out_coord.iter();
                let mut reduced_iter = reduced_coord.iter();
                for axis in 0..in_shape.len() {
                    if reduction_axes.contains(&axis) {
                        in_coord.push(*reduced_iter.next().expect("reduced coord exhausted"));
                    } else {
                        in_coord.push(*kept_iter.next().expect("kept coord exhausted"));
                    }
                }
                acc.accumulate(arg[index_of(&in_coord, in_shape)].clone())?;
            }
            Ok(acc.finish(complex))
        })
        .collect()
}
