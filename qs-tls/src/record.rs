//! Authenticated record codec
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┬──────────────┐
//! │ nonce (12 B) │ AES-256-GCM ciphertext       │ tag (16 B)   │
//! └──────────────┴──────────────────────────────┴──────────────┘
//! ```
//!
//! Nonces are drawn uniformly at random for every record; there is no
//! associated data.

use aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{QsTlsError, Result};
use crate::message::Message;
use crate::types::SessionKey;

/// AES-GCM nonce length
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length
pub const TAG_LEN: usize = 16;

/// Encrypt raw plaintext into `nonce || ciphertext || tag`
pub fn seal(key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| QsTlsError::Encryption(format!("encryption failed: {}", e)))?;

    let mut record = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    record.extend_from_slice(&nonce_bytes);
    record.extend_from_slice(&ciphertext);
    Ok(record)
}

/// Verify and decrypt a record produced by [`seal`]
pub fn open(key: &SessionKey, record: &[u8]) -> Result<Vec<u8>> {
    if record.len() < NONCE_LEN {
        return Err(QsTlsError::Format(format!(
            "record too short: {} bytes",
            record.len()
        )));
    }
    let (nonce, ciphertext) = record.split_at(NONCE_LEN);
    cipher(key)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| QsTlsError::Authentication)
}

/// Encode a message into one self-contained record
pub fn encode(key: &SessionKey, message: &Message) -> Result<Vec<u8>> {
    let plaintext = message.to_json()?;
    seal(key, &plaintext)
}

/// Decode one record back into a message
pub fn decode(key: &SessionKey, data: &[u8]) -> Result<Message> {
    let plaintext = open(key, data)?;
    Message::from_json(&plaintext)
}

fn cipher(key: &SessionKey) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| QsTlsError::Encryption(format!("failed to create cipher: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SessionKey {
        SessionKey::from_bytes([byte; 32])
    }

    #[test]
    fn record_layout() {
        let plaintext = Message::chat("hello").to_json().unwrap();
        let record = encode(&key(1), &Message::chat("hello")).unwrap();
        assert_eq!(record.len(), NONCE_LEN + plaintext.len() + TAG_LEN);
    }

    #[test]
    fn round_trip_all_types() {
        let k = key(7);
        let messages = [
            Message::chat("hello"),
            Message::chat(""),
            Message::chat("量子鍵 🔐"),
            Message::Heartbeat {
                timestamp: 1_700_000_000.123_456,
            },
            Message::HeartbeatAck {
                orig_timestamp: Some(1.5),
                server_timestamp: 2.25,
            },
            Message::HeartbeatAck {
                orig_timestamp: None,
                server_timestamp: 2.25,
            },
            Message::Quit,
        ];
        for message in messages {
            let record = encode(&k, &message).unwrap();
            assert_eq!(decode(&k, &record).unwrap(), message);
        }
    }

    #[test]
    fn nonces_are_fresh_per_record() {
        let k = key(2);
        let a = encode(&k, &Message::Quit).unwrap();
        let b = encode(&k, &Message::Quit).unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn undersized_record_is_format_error() {
        assert!(matches!(
            decode(&key(1), &[0u8; NONCE_LEN - 1]),
            Err(QsTlsError::Format(_))
        ));
        assert!(matches!(decode(&key(1), &[]), Err(QsTlsError::Format(_))));
    }

    #[test]
    fn nonce_only_record_fails_authentication() {
        assert!(matches!(
            decode(&key(1), &[0u8; NONCE_LEN]),
            Err(QsTlsError::Authentication)
        ));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let record = encode(&key(1), &Message::chat("secret")).unwrap();
        assert!(matches!(
            decode(&key(2), &record),
            Err(QsTlsError::Authentication)
        ));
    }

    #[test]
    fn every_single_bit_flip_is_detected() {
        let k = key(3);
        let record = encode(&k, &Message::chat("tamper me")).unwrap();
        for byte in NONCE_LEN..record.len() {
            for bit in 0..8 {
                let mut tampered = record.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    matches!(decode(&k, &tampered), Err(QsTlsError::Authentication)),
                    "flip at byte {} bit {} was not detected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn authenticated_garbage_is_format_error() {
        let k = key(4);
        let record = seal(&k, b"not a message").unwrap();
        assert!(matches!(decode(&k, &record), Err(QsTlsError::Format(_))));
    }
}
