//! Base64 transport encoding for image payloads.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub fn encode_image(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a payload, tolerating the line breaks MIME-style encoders insert.
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact)
}
