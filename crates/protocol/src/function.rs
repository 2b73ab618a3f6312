//! JSON function descriptors attached to offload requests.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// The functions a session may name. `Parameter` announces the inference
/// shape; the rest request client-side evaluation of a nonlinear op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function")]
pub enum FunctionCall {
    Parameter,
    Relu,
    BoundedRelu { alpha: f64 },
    MaxPool,
}

impl FunctionCall {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("function descriptors always serialize")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        // Distinguish an unknown function name from a malformed descriptor.
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ProtocolError::MalformedFunction(e.to_string()))?;
        let name = value
            .get("function")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProtocolError::MalformedFunction("missing \"function\" key".into())
            })?;
        if !matches!(name, "Parameter" | "Relu" | "BoundedRelu" | "MaxPool") {
            return Err(ProtocolError::UnknownFunction(name.to_string()));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::MalformedFunction(e.to_string()))
    }
}
