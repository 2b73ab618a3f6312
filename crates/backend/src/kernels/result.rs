//! Result forwarding: copies the computed tensor into the output slots.

use crate::error::Result;
use crate::he_type::HEType;

pub fn result(arg: &[HEType], count: usize) -> Result<Vec<HEType>> {
    Ok(arg[..count].to_vec())
}
