//! Padding in constant and edge modes.

use crate::error::Result;
use crate::graph::PadMode;
use crate::he_type::HEType;
use crate::kernels::{coordinates, index_of};

pub fn pad(
    arg: &[HEType],
    pad_value: &HEType,
    in_shape: &[usize],
    out_shape: &[usize],
    padding_below: &[usize],
    mode: PadMode,
) -> Result<Vec<HEType>> {
    coordinates(out_shape)
        .iter()
        .map(|out_coord| {
            let mut in_coord = Vec::with_capacity(in_shape.len());
            let mut interior = true;
            for (axis, &c) in out_coord.iter().enumerate() {
                if c < padding_below[axis] || c - padding_below[axis] >= in_shape[axis] {
                    interior = false;
                    break;
                }
                in_coord.push(c - padding_below[axis]);
            }

            if interior {
                return Ok(arg[index_of(&in_coord, in_shape)].clone());
            }

            match mode {
                // The pad value is inserted as-is; one slot serves every
                // padded position.
                PadMode::Constant => Ok(pad_value.clone()),
                PadMode::Edge => {
                    let clamped: Vec<usize> = out_coord
                        .iter()
                        .enumerate()
                        .map(|(axis, &c)| {
                            c.saturating_sub(padding_below[axis])
                                .min(in_shape[axis] - 1)
                        })
                        .collect();
                    Ok(arg[index_of(&clamped, in_shape)].clone())
                }
            }
        })
        .collect()
}
