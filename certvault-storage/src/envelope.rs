//! Stored value envelope and its optional encryption.
//!
//! Every value is wrapped as JSON `{"value": <base64>, "modified": <RFC 3339>}`
//! before it is written. With a 32-byte key the JSON is sealed with
//! AES-256-GCM and stored as `nonce (12 bytes) || ciphertext`; with an empty
//! key it is stored as-is.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use certvault_core::{CodecError, DecodeError, Timestamp, AES_KEY_LEN};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// AES-GCM nonce length (96 bits is the standard).
pub const NONCE_LEN: usize = 12;

/// A stored value plus its write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEnvelope {
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    pub modified: Timestamp,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// Encodes values into envelopes and back.
#[derive(Clone)]
pub struct EnvelopeCodec {
    cipher: Option<Aes256Gcm>,
}

impl std::fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

impl EnvelopeCodec {
    /// Build a codec for `key`. An empty key selects plaintext mode; any other
    /// length than 32 bytes is rejected.
    pub fn new(key: &[u8]) -> Result<Self, CodecError> {
        if key.is_empty() {
            return Ok(Self::plaintext());
        }
        if key.len() != AES_KEY_LEN {
            return Err(CodecError::Encode {
                reason: format!("AES key must be {} bytes, got {}", AES_KEY_LEN, key.len()),
            });
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| CodecError::Encode {
            reason: format!("invalid key: {}", e),
        })?;
        Ok(Self {
            cipher: Some(cipher),
        })
    }

    pub fn plaintext() -> Self {
        Self { cipher: None }
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Wrap `value` stamped with `modified` and seal it.
    pub fn encode(&self, value: &[u8], modified: Timestamp) -> Result<Vec<u8>, CodecError> {
        let envelope = StoredEnvelope {
            value: value.to_vec(),
            modified,
        };
        let json = serde_json::to_vec(&envelope).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })?;

        let Some(cipher) = &self.cipher else {
            return Ok(json);
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), json.as_slice())
            .map_err(|e| CodecError::Encode {
                reason: format!("encryption failed: {}", e),
            })?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open and unwrap stored bytes.
    pub fn decode(&self, stored: &[u8]) -> Result<StoredEnvelope, DecodeError> {
        let json = match &self.cipher {
            None => stored.to_vec(),
            Some(cipher) => {
                if stored.len() < NONCE_LEN {
                    return Err(DecodeError::Truncated { len: stored.len() });
                }
                let (nonce, ciphertext) = stored.split_at(NONCE_LEN);
                cipher
                    .decrypt(Nonce::from_slice(nonce), ciphertext)
                    .map_err(|_| DecodeError::Authentication)?
            }
        };

        serde_json::from_slice(&json).map_err(|e| DecodeError::MalformedEnvelope {
            reason: e.to_string(),
        })
    }
}
