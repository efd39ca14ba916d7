//! Field cipher
//!
//! AES-256-GCM with HKDF-derived sub-keys. Two modes:
//!
//! - **Randomized**: fresh OS-random 96-bit nonce per call. Equal plaintexts
//!   produce different ciphertexts.
//! - **Deterministic**: the nonce is the truncated HMAC-SHA256 of the
//!   plaintext under a separate key (synthetic IV). Equal plaintexts produce
//!   equal ciphertexts, so equality predicates can be evaluated against the
//!   stored form. Decryption recomputes the HMAC and rejects mismatches.
//!
//! Output is base64 of `nonce || ciphertext || tag`.

use crate::crypto::error::CryptoError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Length of AES-256 key in bytes.
pub const KEY_LENGTH: usize = 32;

/// Length of GCM nonce in bytes.
const NONCE_LENGTH: usize = 12;

/// Length of GCM authentication tag in bytes.
const TAG_LENGTH: usize = 16;

const RANDOMIZED_INFO: &[u8] = b"docstore-field-randomized-v1";
const DETERMINISTIC_INFO: &[u8] = b"docstore-field-deterministic-v1";
const SIV_MAC_INFO: &[u8] = b"docstore-field-siv-mac-v1";

/// Key material provider contract used by the encryption adapter
pub trait FieldCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;

    /// Same plaintext always yields the same ciphertext
    fn encrypt_deterministic(&self, plaintext: &str) -> Result<String, CryptoError>;

    fn decrypt_deterministic(&self, ciphertext: &str) -> Result<String, CryptoError>;
}

/// AES-256-GCM field cipher keyed by a single master key
#[derive(Clone)]
pub struct AesFieldCipher {
    randomized_key: [u8; KEY_LENGTH],
    deterministic_key: [u8; KEY_LENGTH],
    mac_key: [u8; KEY_LENGTH],
}

impl fmt::Debug for AesFieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesFieldCipher")
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

impl AesFieldCipher {
    /// Derive the cipher's sub-keys from a 32-byte master key
    pub fn new(master_key: [u8; KEY_LENGTH]) -> Result<Self, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(None, &master_key);
        let derive = |info: &[u8]| -> Result<[u8; KEY_LENGTH], CryptoError> {
            let mut key = [0u8; KEY_LENGTH];
            hkdf.expand(info, &mut key)
                .map_err(|e| CryptoError::InvalidKey(format!("key derivation failed: {e}")))?;
            Ok(key)
        };

        Ok(Self {
            randomized_key: derive(RANDOMIZED_INFO)?,
            deterministic_key: derive(DETERMINISTIC_INFO)?,
            mac_key: derive(SIV_MAC_INFO)?,
        })
    }

    /// Create a cipher from a base64-encoded master key.
    pub fn from_base64(base64_key: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(base64_key.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("invalid base64 key: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Create a cipher from a hex-encoded master key.
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("invalid hex key: {e}")))?;
        Self::from_bytes(&bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidKey(format!(
                "key must be {} bytes, got {}",
                KEY_LENGTH,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Self::new(key)
    }

    /// Generate a random master key, base64-encoded
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        STANDARD.encode(key)
    }

    fn seal(
        key: &[u8; KEY_LENGTH],
        nonce_bytes: &[u8; NONCE_LENGTH],
        plaintext: &str,
    ) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::EncryptionFailed(format!("failed to create cipher: {e}")))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(nonce_bytes), plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    fn open(key: &[u8; KEY_LENGTH], encoded: &str) -> Result<(Vec<u8>, String), CryptoError> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::DecryptionFailed(format!("invalid base64: {e}")))?;
        if bytes.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(CryptoError::DecryptionFailed(
                "ciphertext too short".to_string(),
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::DecryptionFailed(format!("failed to create cipher: {e}")))?;
        let (nonce_bytes, encrypted) = bytes.split_at(NONCE_LENGTH);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), encrypted)
            .map_err(|e| CryptoError::DecryptionFailed(format!("decryption failed: {e}")))?;
        let plaintext = String::from_utf8(plaintext).map_err(|e| {
            CryptoError::DecryptionFailed(format!("decrypted data is not valid UTF-8: {e}"))
        })?;

        Ok((nonce_bytes.to_vec(), plaintext))
    }

    fn synthetic_nonce(&self, plaintext: &str) -> Result<[u8; NONCE_LENGTH], CryptoError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key)
            .map_err(|e| CryptoError::EncryptionFailed(format!("failed to create mac: {e}")))?;
        mac.update(plaintext.as_bytes());
        let digest = mac.finalize().into_bytes();

        let mut nonce = [0u8; NONCE_LENGTH];
        nonce.copy_from_slice(&digest[..NONCE_LENGTH]);
        Ok(nonce)
    }
}

impl FieldCipher for AesFieldCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        Self::seal(&self.randomized_key, &nonce, plaintext)
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        Self::open(&self.randomized_key, ciphertext).map(|(_, plaintext)| plaintext)
    }

    fn encrypt_deterministic(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = self.synthetic_nonce(plaintext)?;
        Self::seal(&self.deterministic_key, &nonce, plaintext)
    }

    fn decrypt_deterministic(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let (nonce, plaintext) = Self::open(&self.deterministic_key, ciphertext)?;
        if nonce != self.synthetic_nonce(&plaintext)? {
            return Err(CryptoError::DecryptionFailed(
                "synthetic nonce does not match plaintext".to_string(),
            ));
        }
        Ok(plaintext)
    }
}
