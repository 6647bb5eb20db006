//! Little-endian primitive readers used by the telegram parsers and stream
//! extractors. Scalar readers return the decoded value together with the
//! offset of the first byte following it, so reads can be chained through a
//! variable-length layout.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("read of {needed} bytes at offset {offset} exceeds buffer of {len} bytes")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },
    #[error("channel of {count} x {elem} requires {expected} data bytes, got {actual}")]
    ChannelLengthMismatch {
        count: u32,
        elem: &'static str,
        expected: u64,
        actual: usize,
    },
}

fn take<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], DecodeError> {
    let truncated = DecodeError::Truncated {
        offset,
        needed: N,
        len: data.len(),
    };
    let end = offset.checked_add(N).ok_or(truncated.clone())?;
    let bytes = data.get(offset..end).ok_or(truncated)?;
    let mut buf = [0u8; N];
    buf.copy_from_slice(bytes);
    Ok(buf)
}

pub fn read_u8(data: &[u8], offset: usize) -> Result<(u8, usize), DecodeError> {
    let bytes = take::<1>(data, offset)?;
    Ok((bytes[0], offset + 1))
}

pub fn read_u16(data: &[u8], offset: usize) -> Result<(u16, usize), DecodeError> {
    let bytes = take::<2>(data, offset)?;
    Ok((u16::from_le_bytes(bytes), offset + 2))
}

pub fn read_u32(data: &[u8], offset: usize) -> Result<(u32, usize), DecodeError> {
    let bytes = take::<4>(data, offset)?;
    Ok((u32::from_le_bytes(bytes), offset + 4))
}

pub fn read_u64(data: &[u8], offset: usize) -> Result<(u64, usize), DecodeError> {
    let bytes = take::<8>(data, offset)?;
    Ok((u64::from_le_bytes(bytes), offset + 8))
}

pub fn read_i16(data: &[u8], offset: usize) -> Result<(i16, usize), DecodeError> {
    let bytes = take::<2>(data, offset)?;
    Ok((i16::from_le_bytes(bytes), offset + 2))
}

pub fn read_f32(data: &[u8], offset: usize) -> Result<(f32, usize), DecodeError> {
    let bytes = take::<4>(data, offset)?;
    Ok((f32::from_le_bytes(bytes), offset + 4))
}

fn decode_channel<T, const N: usize>(
    count: u32,
    bytes: &[u8],
    elem: &'static str,
    from_le: fn([u8; N]) -> T,
) -> Result<Vec<T>, DecodeError> {
    let expected = count as u64 * N as u64;
    if bytes.len() as u64 != expected {
        return Err(DecodeError::ChannelLengthMismatch {
            count,
            elem,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(chunk);
            from_le(buf)
        })
        .collect())
}

/// Interprets the bytes as a dense array of `count` float32 values.
pub fn decode_f32_channel(count: u32, bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    decode_channel(count, bytes, "float32", f32::from_le_bytes)
}

/// Interprets the bytes as a dense array of `count` uint32 values.
pub fn decode_u32_channel(count: u32, bytes: &[u8]) -> Result<Vec<u32>, DecodeError> {
    decode_channel(count, bytes, "uint32", u32::from_le_bytes)
}

/// Interprets the bytes as a dense array of `count` uint16 values.
pub fn decode_u16_channel(count: u32, bytes: &[u8]) -> Result<Vec<u16>, DecodeError> {
    decode_channel(count, bytes, "uint16", u16::from_le_bytes)
}

/// Interprets the bytes as a dense array of `count` int16 values.
pub fn decode_i16_channel(count: u32, bytes: &[u8]) -> Result<Vec<i16>, DecodeError> {
    decode_channel(count, bytes, "int16", i16::from_le_bytes)
}

/// Interprets the bytes as a dense array of `count` uint8 values.
pub fn decode_u8_channel(count: u32, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    decode_channel(count, bytes, "uint8", u8::from_le_bytes)
}
