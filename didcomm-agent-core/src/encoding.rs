//! Base64url and base58 helpers shared by the envelope codec and decorators.
//!
//! Output is always padded base64url. Input is accepted with or without
//! padding, since peers disagree on this.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::error::Result;

const B64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encodes bytes as padded base64url.
pub fn b64url_encode(data: impl AsRef<[u8]>) -> String {
    B64URL.encode(data)
}

/// Decodes base64url, padded or not.
///
/// # Errors
///
/// Returns [`base64::DecodeError`] if the input is not base64url.
pub fn b64url_decode(data: impl AsRef<[u8]>) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    B64URL.decode(data)
}

/// Encodes bytes as base58 (bitcoin alphabet).
pub fn b58_encode(data: impl AsRef<[u8]>) -> String {
    bs58::encode(data).into_string()
}

/// Decodes a base58 string.
///
/// # Errors
///
/// Returns an error if the input is not valid base58.
pub fn b58_decode(data: &str) -> Result<Vec<u8>> {
    Ok(bs58::decode(data).into_vec()?)
}

/// Decodes a base58 verkey into exactly 32 bytes.
///
/// # Errors
///
/// Returns an error if the input is not base58 or does not decode to 32 bytes.
pub fn b58_to_key_bytes(verkey: &str) -> Result<[u8; 32]> {
    let bytes = b58_decode(verkey)?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        crate::Error::InvalidFormat(format!(
            "expected a 32 byte key, found {} bytes",
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b64url_accepts_unpadded_input() {
        let encoded = b64url_encode(b"ab");
        assert_eq!(encoded, "YWI=");
        assert_eq!(b64url_decode("YWI=").unwrap(), b"ab");
        assert_eq!(b64url_decode("YWI").unwrap(), b"ab");
    }

    #[test]
    fn test_b64url_uses_url_alphabet() {
        let encoded = b64url_encode([0xfb, 0xff]);
        assert_eq!(encoded, "-_8=");
        assert!(b64url_decode("+/8=").is_err());
    }

    #[test]
    fn test_key_bytes_length_is_checked() {
        let short = b58_encode([1u8; 16]);
        assert!(b58_to_key_bytes(&short).is_err());

        let full = b58_encode([7u8; 32]);
        assert_eq!(b58_to_key_bytes(&full).unwrap(), [7u8; 32]);

        assert!(b58_to_key_bytes("0OIl").is_err());
    }
}
