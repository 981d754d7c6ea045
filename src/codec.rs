//! Payload codec: gzip and base64 helpers.
//!
//! Frames on the socket are JSON text, so compressed payloads travel as
//! base64 strings of a gzip blob:
//!
//! ```text
//! Value ──json──► bytes ──gzip──► bytes ──base64──► "H4sIAAAA..."
//! ```
//!
//! Compression is best-effort on the way out (callers fall back to the plain
//! payload) and degrades on the way in (callers log and keep the raw value).

// ============================================================================
// Imports
// ============================================================================

use std::io::{Read, Write};

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Standard alphabet decoder that accepts 0, 1 or 2 trailing `=`.
const LENIENT_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ============================================================================
// Gzip
// ============================================================================

/// Gzip-compresses a byte buffer.
///
/// # Errors
///
/// Returns [`Error::Io`] if the encoder fails.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses a gzip buffer.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the input is not a valid gzip stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::decode(format!("gzip decompress failed: {e}")))?;
    Ok(out)
}

// ============================================================================
// Base64
// ============================================================================

/// Encodes bytes with the standard alphabet and padding.
#[inline]
#[must_use]
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes standard-alphabet base64, with or without padding.
///
/// # Errors
///
/// Returns [`Error::Decode`] on invalid characters or length.
pub fn base64_decode(text: &str) -> Result<Vec<u8>> {
    LENIENT_DECODER
        .decode(text.trim_end_matches('='))
        .map_err(|e| Error::decode(format!("base64 decode failed: {e}")))
}

// ============================================================================
// JSON Payloads
// ============================================================================

/// Serializes, compresses and base64-encodes a JSON payload.
///
/// # Errors
///
/// Returns an error if serialization or compression fails.
pub fn encode_payload(payload: &Value) -> Result<String> {
    let json = serde_json::to_vec(payload)?;
    let compressed = compress(&json)?;
    Ok(base64_encode(&compressed))
}

/// Inverse of [`encode_payload`].
///
/// # Errors
///
/// Returns [`Error::Decode`] if any stage fails.
pub fn decode_payload(encoded: &str) -> Result<Value> {
    let compressed = base64_decode(encoded)?;
    let json = decompress(&compressed)?;
    serde_json::from_slice(&json)
        .map_err(|e| Error::decode(format!("decompressed payload is not JSON: {e}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_compress_empty() {
        let compressed = compress(&[]).expect("compress");
        assert!(!compressed.is_empty());
        assert!(decompress(&compressed).expect("decompress").is_empty());
    }

    #[test]
    fn test_compress_shrinks_repetitive_data() {
        let data = "session-".repeat(1000);
        let compressed = compress(data.as_bytes()).expect("compress");
        assert!(compressed.len() < data.len());
        assert_eq!(compressed[0], 0x1f);
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        let err = decompress(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_base64_padding_tolerance() {
        // "a" -> "YQ==", "ab" -> "YWI=", "abc" -> "YWJj"
        assert_eq!(base64_decode("YQ==").expect("two pads"), b"a");
        assert_eq!(base64_decode("YQ=").expect("one pad"), b"a");
        assert_eq!(base64_decode("YQ").expect("no pad"), b"a");
        assert_eq!(base64_decode("YWI=").expect("one pad"), b"ab");
        assert_eq!(base64_decode("YWI").expect("no pad"), b"ab");
        assert_eq!(base64_decode("YWJj").expect("no pad needed"), b"abc");
    }

    #[test]
    fn test_base64_rejects_invalid_chars() {
        assert!(base64_decode("%%%%").is_err());
    }

    #[test]
    fn test_payload_roundtrip() {
        let payload = json!({"sessions": [{"id": 1, "title": "hello"}], "total": 1});
        let encoded = encode_payload(&payload).expect("encode");
        assert_eq!(decode_payload(&encoded).expect("decode"), payload);
    }

    #[test]
    fn test_decode_payload_not_json() {
        let encoded = base64_encode(&compress(b"not json").expect("compress"));
        let err = decode_payload(&encoded).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    proptest! {
        #[test]
        fn prop_gzip_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let compressed = compress(&data).expect("compress");
            prop_assert_eq!(decompress(&compressed).expect("decompress"), data);
        }

        #[test]
        fn prop_base64_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(base64_decode(&base64_encode(&data)).expect("decode"), data);
        }
    }
}
