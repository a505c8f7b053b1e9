use anyhow::Result;

use crate::vault::VaultError;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AEAD authentication tag length in bytes (appended to the ciphertext).
pub const TAG_LEN: usize = 16;

/// Maximum allowed container metadata size (1 MiB). Metadata is a small
/// JSON object; anything larger is a corrupt or hostile file.
const MAX_META_LEN: usize = 1024 * 1024;

/// On-disk evidence container.
///
/// Layout, all integers little-endian:
/// ```text
/// [nonce      : 12 bytes]
/// [timestamp  : 8 bytes, IEEE-754 double, seconds since epoch]
/// [meta_len   : 4 bytes, unsigned]
/// [meta_json  : meta_len bytes, UTF-8]
/// [ciphertext : rest of file; ends with the 16-byte AEAD tag]
/// ```
#[derive(Clone, Debug)]
pub struct Container {
    pub nonce: [u8; NONCE_LEN],
    pub timestamp: f64,
    pub meta_json: Vec<u8>,
    /// Ciphertext with the AEAD tag appended.
    pub ciphertext: Vec<u8>,
}

impl Container {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            NONCE_LEN + 8 + 4 + self.meta_json.len() + self.ciphertext.len(),
        );
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&(self.meta_json.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.meta_json);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = 0usize;

        let nonce_bytes = read_slice(bytes, &mut cursor, NONCE_LEN)?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let ts_bytes = read_slice(bytes, &mut cursor, 8)?;
        let timestamp = f64::from_le_bytes(ts_bytes.try_into().expect("8-byte slice"));

        let meta_len = read_u32(bytes, &mut cursor)? as usize;
        if meta_len > MAX_META_LEN {
            return Err(VaultError::MalformedPayload(format!(
                "metadata length {} exceeds maximum {}",
                meta_len, MAX_META_LEN
            ))
            .into());
        }
        let meta_json = read_slice(bytes, &mut cursor, meta_len)?.to_vec();
        if std::str::from_utf8(&meta_json).is_err() {
            return Err(
                VaultError::MalformedPayload("metadata is not valid UTF-8".to_string()).into(),
            );
        }

        let ciphertext = bytes[cursor..].to_vec();
        if ciphertext.len() < TAG_LEN {
            return Err(VaultError::MalformedPayload(
                "ciphertext shorter than the AEAD tag".to_string(),
            )
            .into());
        }

        Ok(Self {
            nonce,
            timestamp,
            meta_json,
            ciphertext,
        })
    }
}

pub(crate) fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = read_slice(bytes, cursor, 4)?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

pub(crate) fn read_slice<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| VaultError::MalformedPayload("container truncated".to_string()))?;
    let out = &bytes[*cursor..end];
    *cursor = end;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Container {
        Container {
            nonce: [7u8; NONCE_LEN],
            timestamp: 1_700_000_000.25,
            meta_json: br#"{"camera_id":"cam0"}"#.to_vec(),
            ciphertext: vec![3u8; 48],
        }
    }

    #[test]
    fn round_trip() -> Result<()> {
        let container = sample();
        let decoded = Container::decode(&container.encode())?;
        assert_eq!(decoded.nonce, container.nonce);
        assert_eq!(decoded.timestamp, container.timestamp);
        assert_eq!(decoded.meta_json, container.meta_json);
        assert_eq!(decoded.ciphertext, container.ciphertext);
        Ok(())
    }

    #[test]
    fn header_layout_is_bit_exact() {
        let container = sample();
        let bytes = container.encode();
        assert_eq!(&bytes[..NONCE_LEN], &[7u8; NONCE_LEN]);
        assert_eq!(
            &bytes[NONCE_LEN..NONCE_LEN + 8],
            &1_700_000_000.25f64.to_le_bytes()
        );
        let meta_len = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
        assert_eq!(meta_len as usize, container.meta_json.len());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = sample().encode();
        for cut in [0, 5, 12, 19, 23] {
            assert!(Container::decode(&bytes[..cut]).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn oversized_meta_len_is_rejected() {
        let mut bytes = sample().encode();
        // Rewrite meta_len to a huge value.
        bytes[20..24].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(Container::decode(&bytes).is_err());
    }

    #[test]
    fn ciphertext_shorter_than_tag_is_rejected() {
        let mut container = sample();
        container.ciphertext = vec![0u8; TAG_LEN - 1];
        assert!(Container::decode(&container.encode()).is_err());
    }
}
