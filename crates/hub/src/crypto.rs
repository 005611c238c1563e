//! Encrypted payload envelope: AES-256-CBC with an HMAC-SHA256 tag.
//!
//! The wire format is the base64 of a JSON object `{iv, value, mac}` where
//! `iv` and `value` are themselves base64 and `mac` is the hex HMAC of the
//! two base64 strings concatenated. Firmware seals sensor readings in this
//! envelope before POSTing them; the hub opens it and hands the plaintext
//! JSON to the ingest pipeline.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("payload is not a valid envelope: {0}")]
    MalformedEnvelope(String),

    #[error("payload MAC verification failed")]
    MacMismatch,

    #[error("decryption failed (bad key or corrupted ciphertext)")]
    DecryptFailed,
}

/// Inner JSON structure of the envelope, all fields required.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    iv: String,
    value: String,
    mac: String,
}

/// Symmetric codec for the sensor payload envelope. One shared key covers
/// both encryption and authentication, matching the firmware side.
#[derive(Clone)]
pub struct EventCipher {
    key: [u8; KEY_LEN],
}

impl EventCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Build a cipher from a base64-encoded 32-byte key (the form the key
    /// takes in config.toml / the `APP_KEY` env var).
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::MalformedEnvelope(format!("key is not base64: {e}")))?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::MalformedEnvelope("key must be 32 bytes".to_string()))?;
        Ok(Self::new(key))
    }

    /// Open an envelope and return the plaintext bytes.
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let outer = BASE64
            .decode(trim_ascii(payload))
            .map_err(|e| CryptoError::MalformedEnvelope(format!("not base64: {e}")))?;
        let envelope: Envelope = serde_json::from_slice(&outer)
            .map_err(|e| CryptoError::MalformedEnvelope(format!("not an envelope: {e}")))?;

        self.verify_mac(&envelope)?;

        let iv = BASE64
            .decode(&envelope.iv)
            .map_err(|e| CryptoError::MalformedEnvelope(format!("bad iv: {e}")))?;
        if iv.len() != IV_LEN {
            return Err(CryptoError::MalformedEnvelope(format!(
                "iv must be {IV_LEN} bytes, got {}",
                iv.len()
            )));
        }
        let ciphertext = BASE64
            .decode(&envelope.value)
            .map_err(|e| CryptoError::MalformedEnvelope(format!("bad value: {e}")))?;

        Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|_| CryptoError::DecryptFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }

    /// Seal plaintext bytes into an envelope. Used by the node firmware and
    /// by tests; the hub itself only decrypts.
    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext =
            Aes256CbcEnc::new(&self.key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let iv_b64 = BASE64.encode(iv);
        let value_b64 = BASE64.encode(ciphertext);
        let mac = hex_encode(&self.compute_mac(&iv_b64, &value_b64));

        let envelope = Envelope {
            iv: iv_b64,
            value: value_b64,
            mac,
        };
        // Envelope is three strings; serialization cannot fail.
        BASE64.encode(serde_json::to_vec(&envelope).unwrap())
    }

    fn compute_mac(&self, iv_b64: &str, value_b64: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(iv_b64.as_bytes());
        mac.update(value_b64.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    fn verify_mac(&self, envelope: &Envelope) -> Result<(), CryptoError> {
        let expected = hex_decode(&envelope.mac).ok_or(CryptoError::MacMismatch)?;
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(envelope.iv.as_bytes());
        mac.update(envelope.value.as_bytes());
        mac.verify_slice(&expected).map_err(|_| CryptoError::MacMismatch)
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(s), Some(e)) => &bytes[s..=e],
        _ => &[],
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
