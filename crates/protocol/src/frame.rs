//! Length-prefixed framing: `u64 length (big-endian) || payload`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{ProtocolError, Result};

/// Upper bound on a single frame. Large enough for a full relinearization key
/// set at the widest supported parameters, small enough to reject nonsense
/// lengths before allocating.
pub const MAX_FRAME_LEN: u64 = 1 << 32;

/// Write one frame and flush it.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u64;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            got: len,
            max: MAX_FRAME_LEN,
        });
    }
    w.write_u64::<BigEndian>(len)?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

/// Read one frame. Blocks until the full payload arrives; a clean EOF before
/// the length prefix surfaces as `Io(UnexpectedEof)`.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = r.read_u64::<BigEndian>()?;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            got: len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let payload = vec![1u8, 2, 3, 4, 5];
        let mut buf = Vec::new();
        write_frame(&mut buf, &payload).unwrap();
        assert_eq!(buf.len(), 8 + payload.len());
        assert_eq!(&buf[..8], &5u64.to_be_bytes());

        let decoded = read_frame(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[]).unwrap();
        let decoded = read_frame(&mut buf.as_slice()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_truncated_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[1, 2, 3, 4]).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(matches!(
            read_frame(&mut buf.as_slice()),
            Err(ProtocolError::Io(_))
        ));
    }

    #[test]
    fn test_implausible_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(
            read_frame(&mut buf.as_slice()),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"first").unwrap();
        write_frame(&mut buf, b"second").unwrap();
        let mut cursor = buf.as_slice();
        assert_eq!(read_frame(&mut cursor).unwrap(), b"first");
        assert_eq!(read_frame(&mut cursor).unwrap(), b"second");
    }
}
