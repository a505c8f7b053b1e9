//! Vault round-trip and tamper-detection laws.

use anyhow::Result;
use edge_vision::vault::crypto::sha256_hex;
use edge_vision::{Vault, VaultError};

const KEY: [u8; 32] = [11u8; 32];

/// Container header length up to the ciphertext: nonce + timestamp + meta
/// length field + the metadata itself.
fn ciphertext_offset(meta_json: &[u8]) -> usize {
    12 + 8 + 4 + meta_json.len()
}

#[test]
fn decrypt_of_encrypt_is_identity_with_hash() -> Result<()> {
    let vault = Vault::from_key(KEY);
    for payload in [
        b"".to_vec(),
        b"hello".to_vec(),
        vec![0u8; 1024 * 1024],
        (0..=255u8).cycle().take(10_000).collect::<Vec<u8>>(),
    ] {
        let container = vault.encrypt(&payload, b"{}")?;
        let unsealed = vault.decrypt(&container)?;
        assert_eq!(unsealed.payload, payload);
        assert_eq!(unsealed.hash_hex, sha256_hex(&payload));
    }
    Ok(())
}

#[test]
fn container_survives_disk_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("evidence_cam0_20240115120000_0000.enc");
    let vault = Vault::from_key(KEY);
    vault.seal_to_file(b"frame data", br#"{"camera_id":"cam0"}"#, &path)?;

    let unsealed = vault.open_file(&path)?;
    assert_eq!(unsealed.payload, b"frame data");
    assert_eq!(unsealed.meta_json, br#"{"camera_id":"cam0"}"#);
    Ok(())
}

#[test]
fn flipping_a_ciphertext_bit_reports_tampering() -> Result<()> {
    // Encrypt payload "hello" with empty metadata, then flip the byte five
    // bytes into the ciphertext region.
    let vault = Vault::from_key(KEY);
    let meta = b"{}";
    let mut container = vault.encrypt(b"hello", meta)?;

    let offset = ciphertext_offset(meta) + 5;
    container[offset] ^= 0x01;

    let err = vault.decrypt(&container).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VaultError>(),
        Some(VaultError::TamperedCiphertext)
    ));
    Ok(())
}

#[test]
fn every_single_bit_flip_in_ciphertext_is_detected() -> Result<()> {
    let vault = Vault::from_key(KEY);
    let meta = b"{}";
    let container = vault.encrypt(b"payload under test", meta)?;
    let start = ciphertext_offset(meta);

    // Walk a sample of byte positions across ciphertext and tag.
    for pos in (start..container.len()).step_by(7) {
        let mut tampered = container.clone();
        tampered[pos] ^= 0x80;
        assert!(
            vault.decrypt(&tampered).is_err(),
            "flip at offset {} went undetected",
            pos
        );
    }
    Ok(())
}

#[test]
fn header_tampering_is_detected() -> Result<()> {
    let vault = Vault::from_key(KEY);
    let mut container = vault.encrypt(b"payload", b"{}")?;
    // Nonce byte: AEAD opens under a different nonce, tag cannot verify.
    container[0] ^= 0x01;
    let err = vault.decrypt(&container).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VaultError>(),
        Some(VaultError::TamperedCiphertext)
    ));
    Ok(())
}

#[test]
fn key_holding_adversary_substitution_fails_integrity() -> Result<()> {
    // Simulate an adversary who knows the key: decrypt a valid container,
    // swap the hash prefix for sha256("") and re-encrypt with a fresh
    // nonce. The AEAD verifies, the embedded hash does not.
    use aes_gcm::aead::{AeadInPlace, KeyInit};
    use aes_gcm::{Aes256Gcm, Key, Nonce};
    use rand::RngCore;

    let vault = Vault::from_key(KEY);
    let container = vault.encrypt(b"original evidence", b"{}")?;
    let unsealed = vault.decrypt(&container)?;

    let stale_hash = sha256_hex(b"");
    let mut plaintext = Vec::new();
    plaintext.extend_from_slice(stale_hash.as_bytes());
    plaintext.extend_from_slice(b"::");
    plaintext.extend_from_slice(&unsealed.payload);

    let mut nonce = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&KEY));
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut plaintext)
        .unwrap();
    plaintext.extend_from_slice(tag.as_slice());

    let mut forged = Vec::new();
    forged.extend_from_slice(&nonce);
    forged.extend_from_slice(&unsealed.timestamp.to_le_bytes());
    forged.extend_from_slice(&(unsealed.meta_json.len() as u32).to_le_bytes());
    forged.extend_from_slice(&unsealed.meta_json);
    forged.extend_from_slice(&plaintext);

    let err = vault.decrypt(&forged).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VaultError>(),
        Some(VaultError::IntegrityMismatch { .. })
    ));
    Ok(())
}

#[test]
fn wrong_key_cannot_decrypt() -> Result<()> {
    let vault = Vault::from_key(KEY);
    let container = vault.encrypt(b"secret", b"{}")?;

    let other = Vault::from_key([99u8; 32]);
    let err = other.decrypt(&container).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VaultError>(),
        Some(VaultError::TamperedCiphertext)
    ));
    Ok(())
}

#[test]
fn truncated_container_is_malformed_not_partial() -> Result<()> {
    let vault = Vault::from_key(KEY);
    let container = vault.encrypt(b"secret", b"{}")?;
    for cut in [0, 10, 20, container.len() - 1] {
        let result = vault.decrypt(&container[..cut]);
        assert!(result.is_err(), "cut at {} produced output", cut);
    }
    Ok(())
}
