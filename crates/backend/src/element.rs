//! Supported tensor element types.

use crate::error::{BackendError, Result};

/// Host element types the backend accepts. Values are carried as f64 slot
/// vectors internally; the type governs validation and host-buffer layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F64,
    I32,
    I64,
}

impl ElementType {
    pub fn name(&self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "f32" => Ok(ElementType::F32),
            "f64" => Ok(ElementType::F64),
            "i32" => Ok(ElementType::I32),
            "i64" => Ok(ElementType::I64),
            other => Err(BackendError::UnsupportedType(other.to_string())),
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
