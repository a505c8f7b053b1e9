//! Authenticated encryption of evidence payloads.
//!
//! The vault owns the symmetric key and the on-disk container format. It is
//! stateless past construction: encrypt draws a fresh nonce per call and
//! decrypt returns the payload to the caller without retaining it. Key
//! bytes are zeroized when the vault is dropped.

use anyhow::{Context, Result};
use rand::RngCore;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

pub mod crypto;
mod format;
#[cfg(feature = "hybrid-vault")]
pub mod hybrid;

pub use format::Container;

use crate::frame::wall_clock_secs;

/// Symmetric key length (AES-256).
pub const KEY_LEN: usize = 32;

/// Vault failure taxonomy. Every variant terminates the operation; the
/// vault never falls back to partial output.
#[derive(Debug)]
pub enum VaultError {
    /// Key file could not be loaded or generated.
    KeyMissing(String),
    /// AEAD tag verification failed: ciphertext or nonce was modified.
    TamperedCiphertext,
    /// Recovered plaintext or container framing does not match the format.
    MalformedPayload(String),
    /// The embedded payload hash does not recompute.
    IntegrityMismatch { stored: String, computed: String },
    /// Underlying file IO failure.
    Io(std::io::Error),
}

impl std::fmt::Display for VaultError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultError::KeyMissing(msg) => write!(f, "vault key unavailable: {}", msg),
            VaultError::TamperedCiphertext => {
                write!(f, "integrity verification failed: ciphertext tampered")
            }
            VaultError::MalformedPayload(msg) => write!(f, "malformed evidence payload: {}", msg),
            VaultError::IntegrityMismatch { stored, computed } => write!(
                f,
                "integrity verification failed: stored hash {} != computed {}",
                stored, computed
            ),
            VaultError::Io(err) => write!(f, "evidence io error: {}", err),
        }
    }
}

impl std::error::Error for VaultError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VaultError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Io(err)
    }
}

/// Result of a successful decrypt.
#[derive(Debug)]
pub struct Unsealed {
    /// The serialized evidence package, bit-for-bit as encrypted.
    pub payload: Vec<u8>,
    /// Lowercase hex SHA-256 fingerprint embedded at encryption time.
    pub hash_hex: String,
    /// Container metadata JSON.
    pub meta_json: Vec<u8>,
    /// Container write timestamp (seconds since epoch).
    pub timestamp: f64,
}

pub struct Vault {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("key", &"<redacted>").finish()
    }
}

impl Vault {
    /// Load the key from `key_path`, generating and persisting a fresh one
    /// on first use. The key file is created with owner-only permissions.
    pub fn open(key_path: &Path) -> Result<Self> {
        let key = load_or_create_key(key_path)?;
        Ok(Self { key })
    }

    /// Construct from raw key bytes (tests, key rotation tooling).
    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Encrypt `payload` with `meta_json` into container bytes.
    pub fn encrypt(&self, payload: &[u8], meta_json: &[u8]) -> Result<Vec<u8>> {
        let (nonce, ciphertext) = crypto::seal(&self.key, payload)?;
        let container = Container {
            nonce,
            timestamp: wall_clock_secs(),
            meta_json: meta_json.to_vec(),
            ciphertext,
        };
        Ok(container.encode())
    }

    /// Decrypt container bytes, verifying both the AEAD tag and the
    /// embedded payload hash.
    pub fn decrypt(&self, container_bytes: &[u8]) -> Result<Unsealed> {
        let container = Container::decode(container_bytes)?;
        let (payload, hash_hex) = crypto::open(&self.key, &container.nonce, &container.ciphertext)?;
        Ok(Unsealed {
            payload,
            hash_hex,
            meta_json: container.meta_json,
            timestamp: container.timestamp,
        })
    }

    /// Encrypt and write a container atomically: the bytes land in a
    /// `.tmp` sibling, are fsynced, then renamed over the final name.
    pub fn seal_to_file(&self, payload: &[u8], meta_json: &[u8], path: &Path) -> Result<()> {
        let encoded = self.encrypt(payload, meta_json)?;
        write_atomic(path, &encoded).map_err(VaultError::Io)?;
        Ok(())
    }

    /// Read and decrypt a container file.
    pub fn open_file(&self, path: &Path) -> Result<Unsealed> {
        let bytes = read_file(path).map_err(VaultError::Io)?;
        self.decrypt(&bytes)
            .with_context(|| format!("decrypt {}", path.display()))
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

fn load_or_create_key(key_path: &Path) -> Result<[u8; KEY_LEN]> {
    if key_path.exists() {
        let bytes = read_file(key_path)
            .map_err(|e| VaultError::KeyMissing(format!("{}: {}", key_path.display(), e)))?;
        if bytes.len() != KEY_LEN {
            return Err(VaultError::KeyMissing(format!(
                "{}: expected {} bytes, found {}",
                key_path.display(),
                KEY_LEN,
                bytes.len()
            ))
            .into());
        }
        #[cfg(unix)]
        {
            let mode = fs::metadata(key_path)?.permissions().mode() & 0o777;
            if mode != 0o600 {
                fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))?;
            }
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        log::info!("loaded encryption key from {}", key_path.display());
        Ok(key)
    } else {
        if let Some(parent) = key_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    VaultError::KeyMissing(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options
            .open(key_path)
            .map_err(|e| VaultError::KeyMissing(format!("{}: {}", key_path.display(), e)))?;
        file.write_all(&key)
            .map_err(|e| VaultError::KeyMissing(e.to_string()))?;
        file.sync_all()
            .map_err(|e| VaultError::KeyMissing(e.to_string()))?;

        log::info!("generated new encryption key: {}", key_path.display());
        log::warn!("back up the key file; evidence is unrecoverable without it");
        Ok(key)
    }
}

pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = tmp_sibling(path);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn read_file(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}
