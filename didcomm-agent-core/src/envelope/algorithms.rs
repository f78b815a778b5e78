//! Cryptographic primitives used by the envelope codec.
//!
//! This module provides:
//! - Ed25519 to X25519 key conversion (verkey → box public key, signing key → box secret key)
//! - Authenticated box and anonymous sealed box (XSalsa20-Poly1305)
//! - Content encryption (XChaCha20-Poly1305 with additional authenticated data)

use chacha20poly1305::aead::{KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::{PublicKey as BoxPublicKey, SalsaBox, SecretKey as BoxSecretKey};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use super::error::{EnvelopeError, Result};
use crate::encoding::b58_to_key_bytes;

/// Content encryption key size in bytes.
pub const CEK_SIZE: usize = 32;

/// Nonce size shared by XChaCha20-Poly1305 and XSalsa20-Poly1305.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Generates a random key of the given size.
pub fn generate_random_key(size: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; size]);
    OsRng.fill_bytes(&mut key);
    key
}

/// Generates a random 24 byte nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Parses a base58 Ed25519 verkey.
///
/// # Errors
///
/// Returns [`EnvelopeError::InvalidKey`] if the value is not base58, is not
/// 32 bytes, or is not a valid curve point.
pub fn parse_verkey(verkey: &str) -> Result<VerifyingKey> {
    let bytes = b58_to_key_bytes(verkey).map_err(|e| EnvelopeError::InvalidKey(e.to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| EnvelopeError::InvalidKey(e.to_string()))
}

/// Converts an Ed25519 verkey to its X25519 box public key.
pub fn verkey_to_box_public(verkey: &VerifyingKey) -> BoxPublicKey {
    BoxPublicKey::from(verkey.to_montgomery().to_bytes())
}

/// Converts an Ed25519 signing key to its X25519 box secret key.
pub fn signing_key_to_box_secret(key: &SigningKey) -> BoxSecretKey {
    let mut scalar = Zeroizing::new(key.to_scalar_bytes());
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;
    BoxSecretKey::from(*scalar)
}

/// Encrypts `message` from `sender` to `recipient` with a crypto box.
///
/// # Errors
///
/// Returns [`EnvelopeError::Encryption`] if the box cannot be produced.
pub fn box_encrypt(
    recipient: &BoxPublicKey,
    sender: &BoxSecretKey,
    nonce: &[u8; NONCE_SIZE],
    message: &[u8],
) -> Result<Vec<u8>> {
    let salsa_box = SalsaBox::new(recipient, sender);
    crypto_box::aead::Aead::encrypt(&salsa_box, GenericArray::from_slice(nonce), message)
        .map_err(|_| EnvelopeError::Encryption("crypto box failed".to_string()))
}

/// Opens a crypto box produced by [`box_encrypt`].
///
/// # Errors
///
/// Returns [`EnvelopeError::AuthenticationFailed`] if the nonce has the wrong
/// length or the box does not authenticate.
pub fn box_open(
    sender: &BoxPublicKey,
    recipient: &BoxSecretKey,
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(EnvelopeError::AuthenticationFailed);
    }
    let salsa_box = SalsaBox::new(sender, recipient);
    crypto_box::aead::Aead::decrypt(&salsa_box, GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| EnvelopeError::AuthenticationFailed)
}

/// Anonymously seals `message` to `recipient`.
///
/// # Errors
///
/// Returns [`EnvelopeError::Encryption`] if sealing fails.
pub fn seal(recipient: &BoxPublicKey, message: &[u8]) -> Result<Vec<u8>> {
    recipient
        .seal(&mut OsRng, message)
        .map_err(|_| EnvelopeError::Encryption("sealed box failed".to_string()))
}

/// Opens a sealed box addressed to `recipient`.
///
/// # Errors
///
/// Returns [`EnvelopeError::AuthenticationFailed`] if the box does not open.
pub fn unseal(recipient: &BoxSecretKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    recipient
        .unseal(ciphertext)
        .map_err(|_| EnvelopeError::AuthenticationFailed)
}

/// Encrypts data using XChaCha20-Poly1305.
///
/// Returns the ciphertext and the detached 16 byte tag.
///
/// # Errors
///
/// Returns [`EnvelopeError::InvalidKey`] for a key that is not 32 bytes and
/// [`EnvelopeError::Encryption`] if the cipher fails.
pub fn encrypt_xchacha20poly1305(
    key: &[u8],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    if key.len() != CEK_SIZE {
        return Err(EnvelopeError::InvalidKey("Invalid key length".to_string()));
    }

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| EnvelopeError::InvalidKey(e.to_string()))?;

    let mut ciphertext = chacha20poly1305::aead::Aead::encrypt(
        &cipher,
        XNonce::from_slice(nonce),
        Payload {
            msg: plaintext,
            aad,
        },
    )
    .map_err(|e| EnvelopeError::Encryption(e.to_string()))?;

    let tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);
    Ok((ciphertext, tag))
}

/// Decrypts data using XChaCha20-Poly1305.
///
/// # Errors
///
/// Returns [`EnvelopeError::AuthenticationFailed`] for any length mismatch
/// or authentication failure.
pub fn decrypt_xchacha20poly1305(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>> {
    if key.len() != CEK_SIZE || nonce.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
        return Err(EnvelopeError::AuthenticationFailed);
    }

    let cipher =
        XChaCha20Poly1305::new_from_slice(key).map_err(|_| EnvelopeError::AuthenticationFailed)?;

    let mut ciphertext_with_tag = ciphertext.to_vec();
    ciphertext_with_tag.extend_from_slice(tag);

    chacha20poly1305::aead::Aead::decrypt(
        &cipher,
        XNonce::from_slice(nonce),
        Payload {
            msg: &ciphertext_with_tag,
            aad,
        },
    )
    .map_err(|_| EnvelopeError::AuthenticationFailed)
}
