//! Tape at-rest encryption: AES-256-GCM with an `AGCTAPE1` magic prefix.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::tape::TapeError;

/// Magic prefix marking an encrypted tape file.
pub const TAPE_MAGIC: &[u8; 8] = b"AGCTAPE1";

const NONCE_LEN: usize = 12;

/// A 256-bit tape encryption key.
#[derive(Clone)]
pub struct TapeKey([u8; 32]);

impl TapeKey {
    /// Parse the `CHAOS_TAPE_KEY` value: a 64-char hex string is used as
    /// raw key material; anything else is hashed with SHA-256 so operator
    /// passphrases still yield a full-strength key.
    pub fn from_env_value(value: &str) -> Self {
        if value.len() == 64 {
            if let Ok(bytes) = hex::decode(value) {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                return Self(key);
            }
        }
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        Self(hasher.finalize().into())
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

/// Whether a tape file on disk is encrypted.
pub fn is_encrypted(data: &[u8]) -> bool {
    data.len() >= TAPE_MAGIC.len() && &data[..TAPE_MAGIC.len()] == TAPE_MAGIC
}

/// Encrypt a serialized tape: `AGCTAPE1 || nonce || ciphertext`.
pub fn seal(key: &TapeKey, plaintext: &[u8]) -> Result<Vec<u8>, TapeError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = key
        .cipher()
        .encrypt(nonce, plaintext)
        .map_err(|_| TapeError::Crypto("tape encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(TAPE_MAGIC.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(TAPE_MAGIC);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an encrypted tape file back to the serialized JSON document.
pub fn open(key: &TapeKey, data: &[u8]) -> Result<Vec<u8>, TapeError> {
    if !is_encrypted(data) {
        return Err(TapeError::Crypto("missing AGCTAPE1 magic prefix".to_string()));
    }
    let rest = &data[TAPE_MAGIC.len()..];
    if rest.len() < NONCE_LEN {
        return Err(TapeError::Crypto("encrypted tape is truncated".to_string()));
    }
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| TapeError::Crypto("tape decryption failed (wrong key?)".to_string()))
}
