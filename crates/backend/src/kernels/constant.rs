//! Constant materialization.

use crate::error::Result;
use crate::he_type::HEType;
use crate::plaintext::HEPlaintext;

pub fn constant(values: &[f64], count: usize, complex_packing: bool) -> Result<Vec<HEType>> {
    Ok((0..count)
        .map(|i| {
            HEType::from_plaintext(
                HEPlaintext::scalar(values.get(i).copied().unwrap_or(0.0)),
                complex_packing,
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_slots() {
        let out = constant(&[1.0, 2.0, 3.0], 3, false).unwrap();
        let values: Vec<f64> = out.iter().map(|s| s.plaintext().unwrap()[0]).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }
}
