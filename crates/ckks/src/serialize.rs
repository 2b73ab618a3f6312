//! Byte-level serialization for ciphertexts and keys.
//!
//! Layout is little-endian u64 throughout: a short header carrying the chain
//! position, scale, and shape, followed by flat limb data. Loading validates
//! the header against the receiving context before touching coefficients.

use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::ciphertext::Ciphertext;
use crate::context::{CkksContext, ParmsId};
use crate::error::{CkksError, Result};
use crate::keys::{PublicKey, RelinKeys};
use crate::poly::RnsPoly;

fn write_poly<W: Write>(w: &mut W, poly: &RnsPoly) -> Result<()> {
    for limb in &poly.limbs {
        for &coeff in limb {
            w.write_u64::<LittleEndian>(coeff)?;
        }
    }
    Ok(())
}

fn read_poly<R: Read>(r: &mut R, n: usize, num_limbs: usize) -> Result<RnsPoly> {
    let mut poly = RnsPoly::zero(n, num_limbs);
    for l in 0..num_limbs {
        for i in 0..n {
            poly.limbs[l][i] = r.read_u64::<LittleEndian>()?;
        }
    }
    Ok(poly)
}

fn check_canonical(poly: &RnsPoly, moduli: &[crate::modulus::Modulus]) -> Result<()> {
    for (l, limb) in poly.limbs.iter().enumerate() {
        let q = moduli[l].value;
        if limb.iter().any(|&c| c >= q) {
            return Err(CkksError::Serialization(format!(
                "coefficient out of range for modulus {q}"
            )));
        }
    }
    Ok(())
}

/// Serialize a ciphertext.
pub fn save_ciphertext<W: Write>(w: &mut W, cipher: &Ciphertext) -> Result<()> {
    w.write_u64::<LittleEndian>(cipher.parms_id.0)?;
    w.write_f64::<LittleEndian>(cipher.scale)?;
    w.write_u64::<LittleEndian>(cipher.size() as u64)?;
    w.write_u8(cipher.is_ntt_form as u8)?;
    w.write_u64::<LittleEndian>(cipher.poly_degree() as u64)?;
    w.write_u64::<LittleEndian>(cipher.num_limbs() as u64)?;
    for poly in &cipher.c {
        write_poly(w, poly)?;
    }
    Ok(())
}

pub fn ciphertext_to_bytes(cipher: &Ciphertext) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        38 + cipher.size() * cipher.num_limbs() * cipher.poly_degree() * 8,
    );
    save_ciphertext(&mut buf, cipher).expect("writing to Vec cannot fail");
    buf
}

/// Deserialize and validate a ciphertext against `context`.
pub fn load_ciphertext<R: Read>(r: &mut R, context: &Arc<CkksContext>) -> Result<Ciphertext> {
    let parms_id = ParmsId(r.read_u64::<LittleEndian>()?);
    let scale = r.read_f64::<LittleEndian>()?;
    let size = r.read_u64::<LittleEndian>()? as usize;
    let is_ntt_form = r.read_u8()? != 0;
    let degree = r.read_u64::<LittleEndian>()? as usize;
    let num_limbs = r.read_u64::<LittleEndian>()? as usize;

    let level = context.get_context_data(parms_id)?;
    if degree != context.poly_degree() {
        return Err(CkksError::Serialization(format!(
            "degree {degree} does not match context degree {}",
            context.poly_degree()
        )));
    }
    if num_limbs != level.num_limbs() {
        return Err(CkksError::Serialization(format!(
            "limb count {num_limbs} does not match chain position ({})",
            level.num_limbs()
        )));
    }
    if !(2..=3).contains(&size) {
        return Err(CkksError::Serialization(format!(
            "implausible ciphertext size {size}"
        )));
    }
    if !(scale.is_finite() && scale > 0.0) {
        return Err(CkksError::Serialization(format!("invalid scale {scale}")));
    }

    let mut c = Vec::with_capacity(size);
    for _ in 0..size {
        let poly = read_poly(r, degree, num_limbs)?;
        check_canonical(&poly, level.moduli())?;
        c.push(poly);
    }

    Ok(Ciphertext {
        c,
        parms_id,
        scale,
        is_ntt_form,
    })
}

pub fn ciphertext_from_bytes(bytes: &[u8], context: &Arc<CkksContext>) -> Result<Ciphertext> {
    load_ciphertext(&mut &bytes[..], context)
}

/// Serialize a public key (two top-level polynomials).
pub fn public_key_to_bytes(key: &PublicKey) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u64::<LittleEndian>(key.parms_id.0).unwrap();
    buf.write_u64::<LittleEndian>(key.b.n as u64).unwrap();
    buf.write_u64::<LittleEndian>(key.b.num_limbs() as u64).unwrap();
    write_poly(&mut buf, &key.b).expect("writing to Vec cannot fail");
    write_poly(&mut buf, &key.a).expect("writing to Vec cannot fail");
    buf
}

pub fn public_key_from_bytes(bytes: &[u8], context: &Arc<CkksContext>) -> Result<PublicKey> {
    let r = &mut &bytes[..];
    let parms_id = ParmsId(r.read_u64::<LittleEndian>()?);
    let n = r.read_u64::<LittleEndian>()? as usize;
    let num_limbs = r.read_u64::<LittleEndian>()? as usize;

    if parms_id != context.first_parms_id() {
        return Err(CkksError::Serialization(
            "public key must sit at the top of the modulus chain".into(),
        ));
    }
    let level = context.get_context_data(parms_id)?;
    if n != context.poly_degree() || num_limbs != level.num_limbs() {
        return Err(CkksError::Serialization(
            "public key shape does not match context".into(),
        ));
    }

    let b = read_poly(r, n, num_limbs)?;
    let a = read_poly(r, n, num_limbs)?;
    check_canonical(&b, level.moduli())?;
    check_canonical(&a, level.moduli())?;
    Ok(PublicKey { b, a, parms_id })
}

/// Serialize relinearization keys (per-digit key pairs).
pub fn relin_keys_to_bytes(keys: &RelinKeys) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u64::<LittleEndian>(keys.parms_id.0).unwrap();
    buf.write_u64::<LittleEndian>(keys.num_digits() as u64).unwrap();
    if let Some((b, _)) = keys.keys.first() {
        buf.write_u64::<LittleEndian>(b.n as u64).unwrap();
        buf.write_u64::<LittleEndian>(b.num_limbs() as u64).unwrap();
    } else {
        buf.write_u64::<LittleEndian>(0).unwrap();
        buf.write_u64::<LittleEndian>(0).unwrap();
    }
    for (b, a) in &keys.keys {
        write_poly(&mut buf, b).expect("writing to Vec cannot fail");
        write_poly(&mut buf, a).expect("writing to Vec cannot fail");
    }
    buf
}

pub fn relin_keys_from_bytes(bytes: &[u8], context: &Arc<CkksContext>) -> Result<RelinKeys> {
    let r = &mut &bytes[..];
    let parms_id = ParmsId(r.read_u64::<LittleEndian>()?);
    let num_digits = r.read_u64::<LittleEndian>()? as usize;
    let n = r.read_u64::<LittleEndian>()? as usize;
    let num_limbs = r.read_u64::<LittleEndian>()? as usize;

    if parms_id != context.first_parms_id() {
        return Err(CkksError::Serialization(
            "relinearization keys must sit at the top of the modulus chain".into(),
        ));
    }
    let level = context.get_context_data(parms_id)?;
    if num_digits != level.num_limbs() || n != context.poly_degree() || num_limbs != level.num_limbs()
    {
        return Err(CkksError::Serialization(
            "relinearization key shape does not match context".into(),
        ));
    }

    let mut keys = Vec::with_capacity(num_digits);
    for _ in 0..num_digits {
        let b = read_poly(r, n, num_limbs)?;
        let a = read_poly(r, n, num_limbs)?;
        check_canonical(&b, level.moduli())?;
        check_canonical(&a, level.moduli())?;
        keys.push((b, a));
    }
    Ok(RelinKeys { keys, parms_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::CkksEncoder;
    use crate::encrypt::Encryptor;
    use crate::keys::KeyGenerator;
    use crate::params::EncryptionParameters;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn context() -> Arc<CkksContext> {
        let parms = EncryptionParameters::new(1024, &[30, 30, 30]).unwrap();
        CkksContext::new(parms, 0).unwrap()
    }

    #[test]
    fn test_ciphertext_roundtrip_exact() {
        let ctx = context();
        let mut rng = StdRng::seed_from_u64(1);
        let keygen = KeyGenerator::new(ctx.clone(), &mut rng);
        let encryptor = Encryptor::new(ctx.clone(), keygen.create_public_key(&mut rng)).unwrap();
        let encoder = CkksEncoder::new(ctx.clone());

        let plain = encoder
            .encode_real(&[0.0, 1.1, 2.2, 3.3], ctx.first_parms_id(), (1u64 << 30) as f64, false)
            .unwrap();
        let cipher = encryptor.encrypt(&plain, &mut rng).unwrap();

        let bytes = ciphertext_to_bytes(&cipher);
        let loaded = ciphertext_from_bytes(&bytes, &ctx).unwrap();

        assert_eq!(loaded.parms_id, cipher.parms_id);
        assert_eq!(loaded.scale, cipher.scale);
        assert_eq!(loaded.size(), cipher.size());
        assert_eq!(loaded.is_ntt_form, cipher.is_ntt_form);
        assert_eq!(loaded.poly_degree(), cipher.poly_degree());
        assert_eq!(loaded.num_limbs(), cipher.num_limbs());
        assert_eq!(loaded.c, cipher.c);
    }

    #[test]
    fn test_rejects_wrong_context() {
        let ctx = context();
        let other_parms = EncryptionParameters::new(1024, &[30, 30]).unwrap();
        let other_ctx = CkksContext::new(other_parms, 0).unwrap();

        let mut rng = StdRng::seed_from_u64(2);
        let keygen = KeyGenerator::new(ctx.clone(), &mut rng);
        let encryptor = Encryptor::new(ctx.clone(), keygen.create_public_key(&mut rng)).unwrap();
        let encoder = CkksEncoder::new(ctx.clone());
        let plain = encoder
            .encode_real(&[1.0], ctx.first_parms_id(), (1u64 << 30) as f64, false)
            .unwrap();
        let cipher = encryptor.encrypt(&plain, &mut rng).unwrap();

        let bytes = ciphertext_to_bytes(&cipher);
        assert!(ciphertext_from_bytes(&bytes, &other_ctx).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_coefficient() {
        let ctx = context();
        let mut rng = StdRng::seed_from_u64(3);
        let keygen = KeyGenerator::new(ctx.clone(), &mut rng);
        let encryptor = Encryptor::new(ctx.clone(), keygen.create_public_key(&mut rng)).unwrap();
        let encoder = CkksEncoder::new(ctx.clone());
        let plain = encoder
            .encode_real(&[1.0], ctx.first_parms_id(), (1u64 << 30) as f64, false)
            .unwrap();
        let cipher = encryptor.encrypt(&plain, &mut rng).unwrap();

        let mut bytes = ciphertext_to_bytes(&cipher);
        // Overwrite the first coefficient with u64::MAX.
        let header = 8 + 8 + 8 + 1 + 8 + 8;
        bytes[header..header + 8].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(ciphertext_from_bytes(&bytes, &ctx).is_err());
    }

    #[test]
    fn test_key_roundtrips() {
        let ctx = context();
        let mut rng = StdRng::seed_from_u64(4);
        let keygen = KeyGenerator::new(ctx.clone(), &mut rng);
        let pk = keygen.create_public_key(&mut rng);
        let rlk = keygen.create_relin_keys(&mut rng);

        let pk2 = public_key_from_bytes(&public_key_to_bytes(&pk), &ctx).unwrap();
        assert_eq!(pk2.b, pk.b);
        assert_eq!(pk2.a, pk.a);

        let rlk2 = relin_keys_from_bytes(&relin_keys_to_bytes(&rlk), &ctx).unwrap();
        assert_eq!(rlk2.num_digits(), rlk.num_digits());
        assert_eq!(rlk2.keys, rlk.keys);
    }
}
