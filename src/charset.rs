//! Character codec for char arrays.
//!
//! Char arrays are held as UTF-16 code units, one per array element. On disk
//! they appear as `UInt16`, `UInt8`, `Utf8`, `Utf16` or `Utf32` payloads.

use crate::error::{MatError, Result};
use crate::format::{ByteOrder, MatType};

/// Decodes a char payload into UTF-16 code units.
///
/// # Errors
/// Returns `MatError::Format` for invalid UTF-8/UTF-32 data or a storage type
/// that cannot carry characters.
pub fn decode(ty: MatType, bytes: &[u8], order: ByteOrder) -> Result<Vec<u16>> {
    match ty {
        MatType::UInt8 | MatType::Int8 => Ok(bytes.iter().map(|b| u16::from(*b)).collect()),
        MatType::UInt16 | MatType::Utf16 | MatType::Int16 => Ok(bytes
            .chunks_exact(2)
            .map(|c| order.u16_from([c[0], c[1]]))
            .collect()),
        MatType::Utf8 => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| MatError::format(format!("invalid UTF-8 char data: {e}")))?;
            Ok(text.encode_utf16().collect())
        }
        MatType::Utf32 => {
            let mut units = Vec::with_capacity(bytes.len() / 4);
            for c in bytes.chunks_exact(4) {
                let code = order.u32_from([c[0], c[1], c[2], c[3]]);
                let ch = char::from_u32(code)
                    .ok_or_else(|| MatError::format(format!("invalid UTF-32 code point {code:#x}")))?;
                let mut pair = [0u16; 2];
                units.extend_from_slice(ch.encode_utf16(&mut pair));
            }
            Ok(units)
        }
        other => Err(MatError::format(format!("{other} cannot hold character data"))),
    }
}

/// Encodes UTF-16 code units into a char payload.
///
/// # Errors
/// Returns `MatError::Format` for unpaired surrogates in UTF-8/UTF-32 output and
/// `MatError::Unsupported` for non-character storage types.
pub fn encode(ty: MatType, units: &[u16], order: ByteOrder) -> Result<Vec<u8>> {
    match ty {
        MatType::UInt16 | MatType::Utf16 => {
            Ok(units.iter().flat_map(|u| order.u16_bytes(*u)).collect())
        }
        MatType::Utf8 => {
            let text = String::from_utf16(units)
                .map_err(|e| MatError::format(format!("char data is not valid UTF-16: {e}")))?;
            Ok(text.into_bytes())
        }
        MatType::Utf32 => {
            let mut out = Vec::with_capacity(units.len() * 4);
            for ch in char::decode_utf16(units.iter().copied()) {
                let ch = ch.map_err(|e| MatError::format(format!("unpaired surrogate: {e}")))?;
                out.extend_from_slice(&order.u32_bytes(u32::from(ch)));
            }
            Ok(out)
        }
        other => Err(MatError::Unsupported(format!("writing char data as {other}"))),
    }
}

/// Byte length of [`encode`]'s output without producing it.
pub fn encoded_len(ty: MatType, units: &[u16]) -> Result<usize> {
    match ty {
        MatType::UInt16 | MatType::Utf16 => Ok(units.len() * 2),
        MatType::Utf8 | MatType::Utf32 => {
            let mut len = 0;
            for ch in char::decode_utf16(units.iter().copied()) {
                let ch = ch.map_err(|e| MatError::format(format!("unpaired surrogate: {e}")))?;
                len += if ty == MatType::Utf8 { ch.len_utf8() } else { 4 };
            }
            Ok(len)
        }
        other => Err(MatError::Unsupported(format!("writing char data as {other}"))),
    }
}
