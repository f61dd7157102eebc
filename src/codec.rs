//! Byte and text encoding helpers shared by derivation and marshaling.
//!
//! Everything that turns strings and integers into the exact byte layouts the
//! algorithm hashes lives here, so that every version's message construction
//! goes through the same, tested primitives.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use unicode_normalization::{is_nfc_quick, IsNormalized, UnicodeNormalization};

use crate::error::MpwError;

/// How the length prefix of a string is counted.
///
/// Early algorithm versions counted UTF-8 characters where later ones count
/// bytes. Both must stay available for bit-exact compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    /// Number of encoded UTF-8 bytes.
    Bytes,
    /// Number of Unicode scalar values.
    Characters,
}

impl LengthUnit {
    /// Measure `text` in this unit.
    pub fn measure(self, text: &str) -> usize {
        match self {
            Self::Bytes => text.len(),
            Self::Characters => text.chars().count(),
        }
    }
}

/// Append `value` as four big-endian bytes.
pub fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Append a big-endian length prefix (counted in `unit`) followed by the
/// UTF-8 bytes of `text`.
pub fn push_length_prefixed(
    buf: &mut Vec<u8>,
    text: &str,
    unit: LengthUnit,
) -> Result<(), MpwError> {
    let length = u32::try_from(unit.measure(text))
        .map_err(|_| MpwError::InvalidParameter("string too long".into()))?;
    push_u32(buf, length);
    buf.extend_from_slice(text.as_bytes());
    Ok(())
}

/// Canonical (NFC) form of a name, used to compare site names for equality.
///
/// Derivation itself always hashes the exact bytes it is given.
pub fn normalize(text: &str) -> Cow<'_, str> {
    match is_nfc_quick(text.chars()) {
        IsNormalized::Yes => Cow::Borrowed(text),
        _ => Cow::Owned(text.nfc().collect()),
    }
}

/// Standard, padded base-64.
pub fn base64_encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode standard, padded base-64.
pub fn base64_decode(text: &str) -> Result<Vec<u8>, MpwError> {
    BASE64
        .decode(text.trim())
        .map_err(|_| MpwError::InvalidParameter("invalid base-64".into()))
}

/// Escape a text field for a tab-separated line: backslash, tab, line feed
/// and carriage return become two-character sequences.
pub fn escape_field(text: &str) -> Cow<'_, str> {
    if !text.contains(['\\', '\t', '\n', '\r']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Inverse of [`escape_field`]. Fails on a dangling or unknown escape.
pub fn unescape_field(text: &str) -> Result<Cow<'_, str>, MpwError> {
    if !text.contains('\\') {
        return Ok(Cow::Borrowed(text));
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            _ => return Err(MpwError::InvalidParameter("invalid escape sequence".into())),
        }
    }
    Ok(Cow::Owned(out))
}

/// Compare two byte strings in time that depends only on their lengths.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    std::hint::black_box(diff) == 0
}
