//! Scheme-level encryption parameters: the CKKS parameter blob plus the
//! security level, default encoding scale, and packing mode.

use std::io::{Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Deserialize;

use veilnn_ckks::{CkksContext, EncryptionParameters, Modulus};

use crate::error::{BackendError, Result};

pub const SCHEME_NAME: &str = "HE_SEAL";

const VALID_SECURITY_LEVELS: [u64; 4] = [0, 128, 192, 256];

#[derive(Debug, Clone, PartialEq)]
pub struct HeEncryptionParameters {
    scheme_name: String,
    parms: EncryptionParameters,
    security_level: u64,
    scale: f64,
    complex_packing: bool,
}

#[derive(Deserialize)]
struct ParametersJson {
    scheme_name: String,
    poly_modulus_degree: u64,
    security_level: u64,
    coeff_modulus: Vec<u32>,
    scale: Option<f64>,
    complex_packing: Option<bool>,
}

impl Default for HeEncryptionParameters {
    /// Default real-packing parameters: N=1024, five 30-bit primes, no
    /// security enforcement, scale 2^30.
    fn default() -> Self {
        Self::new(
            SCHEME_NAME,
            1024,
            &[30, 30, 30, 30, 30],
            0,
            (1u64 << 30) as f64,
            false,
        )
        .expect("default parameters are valid")
    }
}

impl HeEncryptionParameters {
    pub fn new(
        scheme_name: &str,
        poly_modulus_degree: u64,
        coeff_modulus_bits: &[u32],
        security_level: u64,
        scale: f64,
        complex_packing: bool,
    ) -> Result<Self> {
        let parms = EncryptionParameters::new(poly_modulus_degree, coeff_modulus_bits)?;
        Self::from_parms(scheme_name, parms, security_level, scale, complex_packing)
    }

    pub fn from_parms(
        scheme_name: &str,
        parms: EncryptionParameters,
        security_level: u64,
        scale: f64,
        complex_packing: bool,
    ) -> Result<Self> {
        if scheme_name != SCHEME_NAME {
            return Err(BackendError::InvalidParameters(format!(
                "invalid scheme name {scheme_name}"
            )));
        }
        if !VALID_SECURITY_LEVELS.contains(&security_level) {
            return Err(BackendError::InvalidParameters(format!(
                "security_level must be one of {VALID_SECURITY_LEVELS:?}, got {security_level}"
            )));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(BackendError::InvalidParameters(format!(
                "invalid scale {scale}"
            )));
        }
        // The context build is the scheme's validity predicate.
        CkksContext::new(parms.clone(), security_level)?;
        Ok(Self {
            scheme_name: scheme_name.to_string(),
            parms,
            security_level,
            scale,
            complex_packing,
        })
    }

    /// Default scale for a modulus chain without an explicit choice: the
    /// second-to-last prime when the chain is deep enough, otherwise a value
    /// leaving headroom for a single multiply.
    pub fn choose_scale(coeff_moduli: &[Modulus]) -> f64 {
        if coeff_moduli.len() > 2 {
            coeff_moduli[coeff_moduli.len() - 2].value as f64
        } else if coeff_moduli.len() > 1 {
            coeff_moduli[coeff_moduli.len() - 1].value as f64 / 4096.0
        } else {
            (coeff_moduli[coeff_moduli.len() - 1].value as f64 / 256.0).sqrt()
        }
    }

    /// Parse a JSON string or a path to a JSON file; an empty configuration
    /// yields the defaults.
    pub fn parse_config_or_default(config: Option<&str>) -> Result<Self> {
        let config = match config {
            None => return Ok(Self::default()),
            Some(c) if c.trim().is_empty() => return Ok(Self::default()),
            Some(c) => c,
        };

        let json_str = if Path::new(config).exists() {
            std::fs::read_to_string(config)?
        } else {
            config.to_string()
        };

        let parsed: ParametersJson = serde_json::from_str(&json_str)
            .map_err(|e| BackendError::InvalidParameters(format!("parameter JSON: {e}")))?;

        let parms =
            EncryptionParameters::new(parsed.poly_modulus_degree, &parsed.coeff_modulus)?;
        let scale = match parsed.scale {
            Some(s) => s,
            None => Self::choose_scale(parms.coeff_modulus()),
        };

        Self::from_parms(
            &parsed.scheme_name,
            parms,
            parsed.security_level,
            scale,
            parsed.complex_packing.unwrap_or(false),
        )
    }

    pub fn scheme_name(&self) -> &str {
        &self.scheme_name
    }

    pub fn parms(&self) -> &EncryptionParameters {
        &self.parms
    }

    pub fn poly_modulus_degree(&self) -> u64 {
        self.parms.poly_modulus_degree()
    }

    pub fn security_level(&self) -> u64 {
        self.security_level
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn complex_packing(&self) -> bool {
        self.complex_packing
    }

    /// Serialized form: `scale || complex_packing || security_level ||
    /// native parameter blob`.
    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_f64::<LittleEndian>(self.scale)?;
        w.write_u8(self.complex_packing as u8)?;
        w.write_u64::<LittleEndian>(self.security_level)?;
        self.parms.save(w)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.save(&mut buf).expect("writing to Vec cannot fail");
        buf
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self> {
        let scale = r.read_f64::<LittleEndian>()?;
        let complex_packing = r.read_u8()? != 0;
        let security_level = r.read_u64::<LittleEndian>()?;
        let parms = EncryptionParameters::load(r)?;
        Self::from_parms(SCHEME_NAME, parms, security_level, scale, complex_packing)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::load(&mut &bytes[..])
    }

    /// Whether two parameter sets derive the same CKKS context. Security
    /// level, scale, and complex packing deliberately do not participate.
    pub fn same_context(a: &Self, b: &Self) -> bool {
        a.scheme_name == b.scheme_name && a.parms == b.parms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = HeEncryptionParameters::default();
        assert_eq!(p.poly_modulus_degree(), 1024);
        assert_eq!(p.parms().coeff_modulus().len(), 5);
        assert_eq!(p.security_level(), 0);
        assert_eq!(p.scale(), (1u64 << 30) as f64);
        assert!(!p.complex_packing());
    }

    #[test]
    fn test_json_parse() {
        let config = r#"{
            "scheme_name": "HE_SEAL",
            "poly_modulus_degree": 2048,
            "security_level": 0,
            "coeff_modulus": [30, 24, 30],
            "scale": 16777216,
            "complex_packing": true
        }"#;
        let p = HeEncryptionParameters::parse_config_or_default(Some(config)).unwrap();
        assert_eq!(p.poly_modulus_degree(), 2048);
        assert_eq!(p.scale(), 16777216.0);
        assert!(p.complex_packing());
    }

    #[test]
    fn test_json_scale_defaulting() {
        let config = r#"{
            "scheme_name": "HE_SEAL",
            "poly_modulus_degree": 2048,
            "security_level": 0,
            "coeff_modulus": [30, 24, 30]
        }"#;
        let p = HeEncryptionParameters::parse_config_or_default(Some(config)).unwrap();
        // Three moduli: the scale defaults to the second-to-last prime.
        let expected = p.parms().coeff_modulus()[1].value as f64;
        assert_eq!(p.scale(), expected);
    }

    #[test]
    fn test_invalid_scheme_rejected() {
        let config = r#"{
            "scheme_name": "BFV",
            "poly_modulus_degree": 2048,
            "security_level": 0,
            "coeff_modulus": [30]
        }"#;
        assert!(matches!(
            HeEncryptionParameters::parse_config_or_default(Some(config)),
            Err(BackendError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let p = HeEncryptionParameters::new(
            SCHEME_NAME,
            2048,
            &[30, 24, 30],
            0,
            (1u64 << 24) as f64,
            true,
        )
        .unwrap();
        let loaded = HeEncryptionParameters::from_bytes(&p.to_bytes()).unwrap();
        assert_eq!(loaded, p);
    }

    #[test]
    fn test_same_context_ignores_ancillary_fields() {
        let a = HeEncryptionParameters::default();
        let b = HeEncryptionParameters::new(
            SCHEME_NAME,
            1024,
            &[30, 30, 30, 30, 30],
            0,
            2.0 * a.scale(),
            true,
        )
        .unwrap();
        assert!(HeEncryptionParameters::same_context(&a, &b));

        let c = HeEncryptionParameters::new(SCHEME_NAME, 2048, &[30, 30], 0, a.scale(), false)
            .unwrap();
        assert!(!HeEncryptionParameters::same_context(&a, &c));
    }

    #[test]
    fn test_security_level_enforced() {
        assert!(matches!(
            HeEncryptionParameters::new(SCHEME_NAME, 1024, &[30], 100, 1e9, false),
            Err(BackendError::InvalidParameters(_))
        ));
        // 150 total bits far exceeds the 128-bit budget at N=1024.
        assert!(HeEncryptionParameters::new(
            SCHEME_NAME,
            1024,
            &[30, 30, 30, 30, 30],
            128,
            1e9,
            false
        )
        .is_err());
    }
}
