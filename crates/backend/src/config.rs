//! Backend configuration parsed from a string map.
//!
//! Reserved keys select global behavior; every other key names a tensor and
//! carries a comma-separated attribute list. Unknown attribute tokens are
//! rejected rather than ignored.

use std::collections::HashMap;

use crate::error::{BackendError, Result};

/// Attributes a configuration may assign to a named tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TensorConfig {
    /// Bound from the client session rather than the server caller.
    pub from_client: bool,
    /// Encrypt before execution if not already encrypted.
    pub encrypt: bool,
    /// Use plaintext packing along axis 0.
    pub packed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub tensors: HashMap<String, TensorConfig>,
    pub enable_client: bool,
    /// Garbled-circuit offload; accepted for the external subsystem, only
    /// meaningful alongside `enable_client`.
    pub enable_gc: bool,
    /// Server port for the client session. Port 0 asks the OS for one.
    pub port: u16,
    pub encryption_parameters: Option<String>,
}

impl BackendConfig {
    pub const DEFAULT_PORT: u16 = 34000;

    pub fn parse(map: &HashMap<String, String>) -> Result<Self> {
        let mut config = BackendConfig {
            port: Self::DEFAULT_PORT,
            ..Default::default()
        };

        for (key, value) in map {
            match key.as_str() {
                "enable_client" => config.enable_client = parse_bool(value)?,
                "enable_gc" => config.enable_gc = parse_bool(value)?,
                "encryption_parameters" => {
                    config.encryption_parameters = Some(value.clone());
                }
                "port" => {
                    config.port = value.parse().map_err(|_| {
                        BackendError::InvalidParameters(format!("invalid port {value}"))
                    })?;
                }
                tensor_name => {
                    let mut tensor = TensorConfig::default();
                    for attr in value.split(',') {
                        match attr.trim() {
                            "client_input" => tensor.from_client = true,
                            "encrypt" => tensor.encrypt = true,
                            "packed" => tensor.packed = true,
                            other => {
                                return Err(BackendError::InvalidParameters(format!(
                                    "unknown attribute {other:?} for tensor {tensor_name:?}"
                                )))
                            }
                        }
                    }
                    config.tensors.insert(tensor_name.to_string(), tensor);
                }
            }
        }

        if config.enable_gc && !config.enable_client {
            return Err(BackendError::InvalidParameters(
                "enable_gc requires enable_client".into(),
            ));
        }

        Ok(config)
    }

    pub fn tensor(&self, name: &str) -> TensorConfig {
        self.tensors.get(name).copied().unwrap_or_default()
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(BackendError::InvalidParameters(format!(
            "expected \"True\" or \"False\", got {other:?}"
        ))),
    }
}
