//! Shared encoding helpers.

use base64::Engine;
use num_bigint::BigUint;

/// Format bytes as plain uppercase hex (e.g., "ABCDEF").
pub fn hex_upper(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Encode bytes as standard padded base64.
pub fn base64_standard(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode standard padded base64.
pub fn base64_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(data)
}

/// Render a big-endian unsigned integer as decimal text.
///
/// DSA and ECDSA key components are stored as decimal strings so that
/// downstream consumers of the JSON do not need a big-integer type.
pub fn decimal_from_be_bytes(bytes: &[u8]) -> String {
    BigUint::from_bytes_be(bytes).to_str_radix(10)
}

/// Number of significant bits in a big-endian unsigned integer.
pub fn bit_len_be(bytes: &[u8]) -> u32 {
    BigUint::from_bytes_be(bytes).bits() as u32
}

/// Maximum content length for DER TLV encoding with a 3-byte length field.
const MAX_DER_CONTENT_LEN: usize = 0xFF_FFFF; // 16 MiB

/// Wrap content bytes in a DER tag-length-value envelope.
///
/// Supports content lengths up to [`MAX_DER_CONTENT_LEN`] (16 MiB).
/// Returns `None` if content exceeds this limit.
pub(crate) fn der_wrap(tag: u8, content: &[u8]) -> Option<Vec<u8>> {
    let len = content.len();
    if len > MAX_DER_CONTENT_LEN {
        return None;
    }
    let mut buf = Vec::with_capacity(1 + 4 + len);
    buf.push(tag);
    if len < 0x80 {
        buf.push(len as u8);
    } else if len < 0x100 {
        buf.push(0x81);
        buf.push(len as u8);
    } else if len < 0x1_0000 {
        buf.push(0x82);
        buf.push((len >> 8) as u8);
        buf.push(len as u8);
    } else {
        buf.push(0x83);
        buf.push((len >> 16) as u8);
        buf.push((len >> 8) as u8);
        buf.push(len as u8);
    }
    buf.extend_from_slice(content);
    Some(buf)
}
