//! Hex text <-> byte/word conversion used for addresses and data on the link.

use thiserror::Error;

const DIGITS: &[u8; 16] = b"0123456789ABCDEF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("invalid hex digit {0:?}")]
    InvalidDigit(char),
    #[error("expected {expected} hex digits, found {found}")]
    WrongWidth { expected: usize, found: usize },
}

#[inline]
pub fn nibble(c: u8) -> Result<u8, HexError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(HexError::InvalidDigit(c as char)),
    }
}

/// Appends the two upper-case digits of `b` to `out`.
#[inline]
pub fn push_hex2(out: &mut Vec<u8>, b: u8) {
    out.push(DIGITS[(b >> 4) as usize]);
    out.push(DIGITS[(b & 0x0F) as usize]);
}

pub fn byte_to_hex2(b: u8) -> String {
    format!("{:02X}", b)
}

pub fn word_to_hex4(w: u16) -> String {
    format!("{:04X}", w)
}

pub fn hex2_to_byte(s: &str) -> Result<u8, HexError> {
    let bytes = s.as_bytes();
    if bytes.len() != 2 {
        return Err(HexError::WrongWidth {
            expected: 2,
            found: bytes.len(),
        });
    }
    Ok((nibble(bytes[0])? << 4) | nibble(bytes[1])?)
}

pub fn hex4_to_word(s: &str) -> Result<u16, HexError> {
    let bytes = s.as_bytes();
    if bytes.len() != 4 {
        return Err(HexError::WrongWidth {
            expected: 4,
            found: bytes.len(),
        });
    }
    let mut word = 0u16;
    for &c in bytes {
        word = (word << 4) | nibble(c)? as u16;
    }
    Ok(word)
}

/// Decodes a stream of hex digit pairs ("00FFA9...") into bytes.
pub fn decode_pairs(text: &[u8]) -> Result<Vec<u8>, HexError> {
    if text.len() % 2 != 0 {
        return Err(HexError::WrongWidth {
            expected: text.len() + 1,
            found: text.len(),
        });
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    for pair in text.chunks_exact(2) {
        out.push((nibble(pair[0])? << 4) | nibble(pair[1])?);
    }
    Ok(out)
}
