//! Hybrid RSA-OAEP evidence containers.
//!
//! Each file is encrypted under a fresh 32-byte AEAD session key which is
//! wrapped with RSA-OAEP(SHA-256) under a configured public key. The edge
//! device only ever holds the public half, so captured hardware cannot
//! decrypt its own archive. The payload contract (embedded hash, integrity
//! ladder) is identical to the symmetric vault.
//!
//! Layout: `HYBRID1\0` magic, u32 LE wrapped-key length, wrapped key, then
//! a standard container (nonce, timestamp, metadata, ciphertext+tag).

use anyhow::{Context, Result};
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::Path;
use zeroize::Zeroize;

use crate::frame::wall_clock_secs;
use crate::vault::format::read_u32;
use crate::vault::{crypto, write_atomic, Container, Unsealed, VaultError, KEY_LEN};

/// File magic identifying hybrid containers.
pub const HYBRID_MAGIC: &[u8; 8] = b"HYBRID1\0";

/// Upper bound on the wrapped session key (RSA-8192 would be 1024 bytes).
const MAX_WRAPPED_KEY_LEN: usize = 2048;

pub struct HybridVault {
    public_key: Option<RsaPublicKey>,
    private_key: Option<RsaPrivateKey>,
}

impl HybridVault {
    /// Encrypt-only vault for the edge device.
    pub fn for_encryption(public_key_pem: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(public_key_pem)
            .map_err(|e| VaultError::KeyMissing(format!("{}: {}", public_key_pem.display(), e)))?;
        let public_key = RsaPublicKey::from_public_key_pem(&pem)
            .map_err(|e| VaultError::KeyMissing(format!("invalid RSA public key: {}", e)))?;
        Ok(Self {
            public_key: Some(public_key),
            private_key: None,
        })
    }

    /// Decrypt-capable vault for the review workstation.
    pub fn for_decryption(private_key_pem: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(private_key_pem)
            .map_err(|e| VaultError::KeyMissing(format!("{}: {}", private_key_pem.display(), e)))?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .map_err(|e| VaultError::KeyMissing(format!("invalid RSA private key: {}", e)))?;
        let public_key = private_key.to_public_key();
        Ok(Self {
            public_key: Some(public_key),
            private_key: Some(private_key),
        })
    }

    /// Construct from in-memory keys (tests, key tooling).
    pub fn from_keys(public_key: Option<RsaPublicKey>, private_key: Option<RsaPrivateKey>) -> Self {
        Self {
            public_key,
            private_key,
        }
    }

    /// True when `bytes` carry the hybrid container magic.
    pub fn is_hybrid(bytes: &[u8]) -> bool {
        bytes.len() >= HYBRID_MAGIC.len() && &bytes[..HYBRID_MAGIC.len()] == HYBRID_MAGIC
    }

    pub fn encrypt(&self, payload: &[u8], meta_json: &[u8]) -> Result<Vec<u8>> {
        let public_key = self
            .public_key
            .as_ref()
            .ok_or_else(|| VaultError::KeyMissing("RSA public key required".to_string()))?;

        let mut session_key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut session_key);

        let wrapped = public_key
            .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), &session_key)
            .map_err(|e| VaultError::KeyMissing(format!("session key wrap failed: {}", e)))?;

        let (nonce, ciphertext) = crypto::seal(&session_key, payload)?;
        session_key.zeroize();

        let container = Container {
            nonce,
            timestamp: wall_clock_secs(),
            meta_json: meta_json.to_vec(),
            ciphertext,
        };

        let inner = container.encode();
        let mut out = Vec::with_capacity(HYBRID_MAGIC.len() + 4 + wrapped.len() + inner.len());
        out.extend_from_slice(HYBRID_MAGIC);
        out.extend_from_slice(&(wrapped.len() as u32).to_le_bytes());
        out.extend_from_slice(&wrapped);
        out.extend_from_slice(&inner);
        Ok(out)
    }

    pub fn decrypt(&self, bytes: &[u8]) -> Result<Unsealed> {
        let private_key = self
            .private_key
            .as_ref()
            .ok_or_else(|| VaultError::KeyMissing("RSA private key required".to_string()))?;

        if !Self::is_hybrid(bytes) {
            return Err(
                VaultError::MalformedPayload("missing hybrid container magic".to_string()).into(),
            );
        }

        let mut cursor = HYBRID_MAGIC.len();
        let wrapped_len = read_u32(bytes, &mut cursor)? as usize;
        if wrapped_len > MAX_WRAPPED_KEY_LEN {
            return Err(VaultError::MalformedPayload(format!(
                "wrapped key length {} exceeds maximum {}",
                wrapped_len, MAX_WRAPPED_KEY_LEN
            ))
            .into());
        }
        if cursor + wrapped_len > bytes.len() {
            return Err(VaultError::MalformedPayload("container truncated".to_string()).into());
        }
        let wrapped = &bytes[cursor..cursor + wrapped_len];
        cursor += wrapped_len;

        let mut session_key_bytes = private_key
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| VaultError::TamperedCiphertext)?;
        if session_key_bytes.len() != KEY_LEN {
            session_key_bytes.zeroize();
            return Err(
                VaultError::MalformedPayload("unwrapped session key length".to_string()).into(),
            );
        }
        let mut session_key = [0u8; KEY_LEN];
        session_key.copy_from_slice(&session_key_bytes);
        session_key_bytes.zeroize();

        let container = Container::decode(&bytes[cursor..])?;
        let result = crypto::open(&session_key, &container.nonce, &container.ciphertext);
        session_key.zeroize();
        let (payload, hash_hex) = result?;

        Ok(Unsealed {
            payload,
            hash_hex,
            meta_json: container.meta_json,
            timestamp: container.timestamp,
        })
    }

    pub fn seal_to_file(&self, payload: &[u8], meta_json: &[u8], path: &Path) -> Result<()> {
        let encoded = self.encrypt(payload, meta_json)?;
        write_atomic(path, &encoded).map_err(VaultError::Io)?;
        Ok(())
    }

    pub fn open_file(&self, path: &Path) -> Result<Unsealed> {
        let bytes =
            std::fs::read(path).map_err(|e| anyhow::Error::new(VaultError::Io(e)))?;
        self.decrypt(&bytes)
            .with_context(|| format!("decrypt {}", path.display()))
    }
}
