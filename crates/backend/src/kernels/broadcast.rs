//! Broadcast along new axes.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::he_type::HEType;
use crate::kernels::{coordinates, index_of};

pub fn broadcast(
    arg: &[HEType],
    in_shape: &[usize],
    out_shape: &[usize],
    broadcast_axes: &BTreeSet<usize>,
) -> Result<Vec<HEType>> {
    coordinates(out_shape)
        .iter()
        .map(|out_coord| {
            let in_coord: Vec<usize> = out_coord
                .iter()
                .enumerate()
                .filter(|(axis, _)| !broadcast_axes.contains(axis))
                .map(|(_, &c)| c)
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
    fn test_broadcast_vector_to_matrix() {
        let arg = plain_slots(&[1.0, 2.0, 3.0]);
        let out = broadcast(&arg, &[3], &[2, 3], &BTreeSet::from([0])).unwrap();
        let values: Vec<f64> = out.iter().map(|s| s.plaintext().unwrap()[0]).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_broadcast_scalar() {
        let arg = plain_slots(&[7.0]);
        let out = broadcast(&arg, &[], &[2, 2], &BTreeSet::from([0, 1])).unwrap();
        assert_eq!(out.len(), 4);
        for slot in &out {
            assert_eq!(slot.plaintext().unwrap()[0], 7.0);
        }
    }
}
