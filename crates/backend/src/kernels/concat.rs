//! Concatenation along one axis.

use crate::error::Result;
use crate::he_type::HEType;
use crate::kernels::{coordinates, index_of};

pub fn concat(
    args: &[&[HEType]],
    in_shapes: &[Vec<usize>],
    out_shape: &[usize],
    axis: usize,
) -> Result<Vec<HEType>> {
    let out_size: usize = out_shape.iter().product();
    let mut out: Vec<Option<HEType>> = vec![None; out_size];

    let mut axis_offset = 0;
    for (arg, in_shape) in args.iter().zip(in_shapes) {
        for in_coord in coordinates(in_shape) {
            let mut out_coord = in_coord.clone();
            out_coord[axis] += axis_offset;
            out[index_of(&out_coord, out_shape)] =
                Some(arg[index_of(&in_coord, in_shape)].clone());
        }
        axis_offset += in_shape[axis];
    }

    Ok(out
        .into_iter()
        .map(|slot| slot.expect("concat covers every output coordinate"))
        .collect())
}
