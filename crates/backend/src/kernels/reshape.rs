//! Reshape with axis reordering: logically transpose by `input_order`, then
//! read off row-major into the output shape.

use crate::error::Result;
use crate::he_type::HEType;
use crate::kernels::{coordinates, index_of};

pub fn reshape(
    arg: &[HEType],
    in_shape: &[usize],
    input_order: &[usize],
    _out_shape: &[usize],
) -> Result<Vec<HEType>> {
    let permuted_shape: Vec<usize> = input_order.iter().map(|&axis| in_shape[axis]).collect();
    coordinates(&permuted_shape)
        .iter()
        .map(|permuted_coord| {
            let mut in_coord = vec![0usize; in_shape.len()];
            for (j, &axis) in input_order.iter().enumerate() {
                in_coord[axis] = permuted_coord[j];
            }
            Ok(arg[index_of(&in_coord, in_shape)].clone())
        })
        .collect()
}
