//! AEAD seal/open with an embedded plaintext hash.
//!
//! The AEAD plaintext is `hex(sha256(payload)) || "::" || payload`. The GCM
//! tag already detects ciphertext tampering; the embedded hash is a second
//! layer that still identifies substituted content if the key itself leaks
//! and an adversary re-encrypts modified data, and doubles as a stable
//! fingerprint for chain-of-custody records.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Key, Nonce, Tag,
};
use anyhow::Result;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::vault::format::{NONCE_LEN, TAG_LEN};
use crate::vault::VaultError;

/// Length of the lowercase hex SHA-256 prefix inside the plaintext.
pub const HASH_HEX_LEN: usize = 64;

/// Two-byte separator between the hash prefix and the payload.
pub const HASH_SEPARATOR: &[u8; 2] = b"::";

/// Encrypt `payload` under `key` with a fresh random nonce.
///
/// Returns the nonce and `ciphertext || tag`. Nonces are drawn fresh from
/// the CSPRNG on every call; a nonce must never repeat under the same key.
pub fn seal(key: &[u8; 32], payload: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let hash_hex = sha256_hex(payload);

    let mut plaintext = Vec::with_capacity(HASH_HEX_LEN + HASH_SEPARATOR.len() + payload.len());
    plaintext.extend_from_slice(hash_hex.as_bytes());
    plaintext.extend_from_slice(HASH_SEPARATOR);
    plaintext.extend_from_slice(payload);

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut plaintext)
        .map_err(|_| VaultError::MalformedPayload("encryption failed".to_string()))?;

    plaintext.extend_from_slice(tag.as_slice());
    Ok((nonce, plaintext))
}

/// Decrypt `ciphertext || tag` and verify the embedded hash.
///
/// Returns `(payload, stored_hash_hex)`. Failure ladder:
/// - tag verification failure -> `TamperedCiphertext`
/// - missing separator or non-UTF8 hash prefix -> `MalformedPayload`
/// - recomputed hash differs from the stored one -> `IntegrityMismatch`
///
/// No partial output is ever produced.
pub fn open(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    ciphertext_and_tag: &[u8],
) -> Result<(Vec<u8>, String)> {
    if ciphertext_and_tag.len() < TAG_LEN {
        return Err(
            VaultError::MalformedPayload("ciphertext shorter than the AEAD tag".to_string()).into(),
        );
    }
    let tag_offset = ciphertext_and_tag.len() - TAG_LEN;
    let mut buffer = ciphertext_and_tag[..tag_offset].to_vec();
    let tag = Tag::from_slice(&ciphertext_and_tag[tag_offset..]);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut buffer, tag)
        .map_err(|_| VaultError::TamperedCiphertext)?;

    let sep_index = find_separator(&buffer).ok_or_else(|| {
        VaultError::MalformedPayload("hash separator missing from payload".to_string())
    })?;
    let stored_hash = std::str::from_utf8(&buffer[..sep_index])
        .map_err(|_| VaultError::MalformedPayload("hash prefix is not valid UTF-8".to_string()))?
        .to_string();
    let payload = buffer[sep_index + HASH_SEPARATOR.len()..].to_vec();

    let computed_hash = sha256_hex(&payload);
    if computed_hash != stored_hash {
        return Err(VaultError::IntegrityMismatch {
            stored: stored_hash,
            computed: computed_hash,
        }
        .into());
    }

    Ok((payload, stored_hash))
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn find_separator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HASH_SEPARATOR.len())
        .position(|w| w == HASH_SEPARATOR)
}
