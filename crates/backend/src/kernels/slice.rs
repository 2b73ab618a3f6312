//! Strided slicing.

use crate::error::Result;
use crate::he_type::HEType;
use crate::kernels::{coordinates, index_of};

pub fn slice(
    arg: &[HEType],
    in_shape: &[usize],
    lower_bounds: &[usize],
    strides: &[usize],
    out_shape: &[usize],
) -> Result<Vec<HEType>> {
    coordinates(out_shape)
        .iter()
        .map(|out_coord| {
            let in_coord: Vec<usize> = out_coord
                .iter()
                .enumerate()
                .map(|(axis, &c)| lower_bounds[axis] + c * strides[axis])
                .collect();
            Ok(arg[index_of(&in_coord, in_shape)].clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plaintext::HEPlaintext;

    #[test]
    fn test_strided_slice() {
        let arg: Vec<HEType> = (0..12)
            .map(|i| HEType::from_plaintext(HEPlaintext::scalar(i as f64), false))
            .collect();
        // Rows 1.., every second column of a 3×4 input.
        let out = slice(&arg, &[3, 4], &[1, 0], &[1, 2], &[2, 2]).unwrap();
        let values: Vec<f64> = out.iter().map(|s| s.plaintext().unwrap()[0]).collect();
        assert_eq!(values, vec![4.0, 6.0, 8.0, 10.0]);
    }
}
