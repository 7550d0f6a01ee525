//! AES-256-GCM envelope for exported backups.
//!
//! Layout: `MAGIC || nonce (12 bytes) || ciphertext+tag`.

use crate::{error::Result, Error};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};

const MAGIC: &[u8] = b"STASHENC1";
const NONCE_LEN: usize = 12;

/// Whether `data` carries the encrypted-export marker.
pub fn is_sealed(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

pub struct ExportCipher {
    cipher: Aes256Gcm,
}

impl ExportCipher {
    /// Build from a hex-encoded 32-byte key.
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| Error::Encryption(format!("invalid key encoding: {e}")))?;
        if bytes.len() != 32 {
            return Err(Error::Encryption(format!(
                "key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let body = sealed
            .strip_prefix(MAGIC)
            .ok_or_else(|| Error::Encryption("not an encrypted export".into()))?;
        if body.len() < NONCE_LEN {
            return Err(Error::Encryption("truncated envelope".into()));
        }
        let (nonce, ciphertext) = body.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Encryption("decryption failed: wrong key or tampered data".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn seal_and_open() {
        let cipher = ExportCipher::from_hex(KEY).unwrap();
        let sealed = cipher.seal(b"{\"id\":\"b1\"}").unwrap();
        assert!(is_sealed(&sealed));
        assert_eq!(cipher.open(&sealed).unwrap(), b"{\"id\":\"b1\"}");
    }

    #[test]
    fn nonces_differ() {
        let cipher = ExportCipher::from_hex(KEY).unwrap();
        assert_ne!(cipher.seal(b"x").unwrap(), cipher.seal(b"x").unwrap());
    }

    #[test]
    fn tampering_and_wrong_keys_fail() {
        let cipher = ExportCipher::from_hex(KEY).unwrap();
        let mut sealed = cipher.seal(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 1;
        assert!(matches!(cipher.open(&sealed), Err(Error::Encryption(_))));

        let other = ExportCipher::from_hex(&"ab".repeat(32)).unwrap();
        let sealed = cipher.seal(b"payload").unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn bad_keys_rejected() {
        assert!(ExportCipher::from_hex("zz").is_err());
        assert!(ExportCipher::from_hex("abcd").is_err());
    }
}
