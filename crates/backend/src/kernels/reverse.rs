//! Axis reversal.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::he_type::HEType;
use crate::kernels::{coordinates, index_of};

pub fn reverse(
    arg: &[HEType],
    in_shape: &[usize],
    reversed_axes: &BTreeSet<usize>,
) -> Result<Vec<HEType>> {
    coordinates(in_shape)
        .iter()
        .map(|out_coord| {
            let in_coord: Vec<usize> = out_coord
                .iter()
                .enumerate()
                .map(|(axis, &c)| {
                    if reversed_axes.contains(&axis) {
                        in_shape[axis] - 1 - c
                    } else {
                        c
                    }
                })
                .collect();
            Ok(arg[index_of(&in_coord, in_shape)].clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plaintext::HEPlaintext;

    fn plain_slots(values: &[f64]) -> Vec<HEType> {
        values
            .iter()
            .map(|&v| HEType::from_plaintext(HEPlaintext::scalar(v), false))
            .collect()
    }

    #[test]
    fn test_reverse_one_axis() {
        let arg = plain_slots(&[1.0, 2.0, 3.0, 4.0]);
        let out = reverse(&arg, &[2, 2], &BTreeSet::from([1])).unwrap();
        let values: Vec<f64> = out.iter().map(|s| s.plaintext().unwrap()[0]).collect();
        assert_eq!(values, vec![2.0, 1.0, 4.0, 3.0]);
    }

    #[test]
    fn test_reverse_all_axes() {
        let arg = plain_slots(&[1.0, 2.0, 3.0, 4.0]);
        let out = reverse(&arg, &[2, 2], &BTreeSet::from([0, 1])).unwrap();
        let values: Vec<f64> = out.iter().map(|s| s.plaintext().unwrap()[0]).collect();
        assert_eq!(values, vec![4.0, 3.0, 2.0, 1.0]);
    }
}
