//! Outer telegram envelope shared by both wire formats: a four byte start
//! marker opens every telegram and a trailing CRC-32 closes it. The two
//! formats disagree about the range the checksum covers, so each gets its
//! own validator.

use crc::{CRC_32_ISO_HDLC, Crc};
use thiserror::Error;

/// Start-of-text sequence marking the beginning of a telegram.
pub const STX: [u8; 4] = [0x02, 0x02, 0x02, 0x02];

/// CRC-32 as produced by zlib: IEEE 802.3 polynomial in reflected form,
/// initial value and xor-out both `0xFFFFFFFF`.
pub const TELEGRAM_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const CRC_LEN: usize = 4;
const LENGTH_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvelopeError {
    #[error("telegram of {0} bytes is too short for start marker and checksum")]
    TooShort(usize),
    #[error("missing start of frame sequence [0x02 0x02 0x02 0x02], got {0:02x?}")]
    InvalidStartMarker([u8; 4]),
    #[error("expected {expected} payload bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("checksum failed (expected {expected:#010x}, computed {computed:#010x})")]
    CrcMismatch { expected: u32, computed: u32 },
}

fn check_start_marker(data: &[u8]) -> Result<(), EnvelopeError> {
    let mut marker = [0u8; 4];
    marker.copy_from_slice(&data[..STX.len()]);
    if marker != STX {
        return Err(EnvelopeError::InvalidStartMarker(marker));
    }
    Ok(())
}

fn trailing_crc(data: &[u8]) -> u32 {
    let mut crc = [0u8; CRC_LEN];
    crc.copy_from_slice(&data[data.len() - CRC_LEN..]);
    u32::from_le_bytes(crc)
}

/// Validates a Compact telegram and returns its payload: everything up to
/// the trailing CRC, start marker included. The checksum covers the start
/// marker as well.
pub fn verify_compact_telegram(data: &[u8]) -> Result<&[u8], EnvelopeError> {
    if data.len() < STX.len() + CRC_LEN {
        return Err(EnvelopeError::TooShort(data.len()));
    }
    check_start_marker(data)?;

    let payload = &data[..data.len() - CRC_LEN];
    let expected = trailing_crc(data);
    let computed = TELEGRAM_CRC.checksum(payload);
    if expected != computed {
        return Err(EnvelopeError::CrcMismatch { expected, computed });
    }
    Ok(payload)
}

/// Validates a MSGPACK telegram and returns its payload: the MSGPACK buffer
/// between the length prefix and the trailing CRC. The checksum covers the
/// buffer only, without start marker and length prefix.
pub fn verify_msgpack_telegram(data: &[u8]) -> Result<&[u8], EnvelopeError> {
    if data.len() < STX.len() + LENGTH_LEN + CRC_LEN {
        return Err(EnvelopeError::TooShort(data.len()));
    }
    check_start_marker(data)?;

    let mut length = [0u8; LENGTH_LEN];
    length.copy_from_slice(&data[STX.len()..STX.len() + LENGTH_LEN]);
    let expected_len = u32::from_le_bytes(length) as usize;

    let payload = &data[STX.len() + LENGTH_LEN..data.len() - CRC_LEN];
    if payload.len() != expected_len {
        return Err(EnvelopeError::LengthMismatch {
            expected: expected_len,
            actual: payload.len(),
        });
    }

    let expected = trailing_crc(data);
    let computed = TELEGRAM_CRC.checksum(payload);
    if expected != computed {
        return Err(EnvelopeError::CrcMismatch { expected, computed });
    }
    Ok(payload)
}
