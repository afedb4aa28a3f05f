//! Hybrid key derivation
//!
//! The session key is `HKDF-SHA256(ikm = preshared || shared_secret)` with no
//! salt and the fixed [`HKDF_INFO`] label.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{HandshakeError, Result};
use crate::keys::PresharedSecret;
use crate::types::{SessionKey, HKDF_INFO, SESSION_KEY_LEN};

/// Derive `out_len` bytes of key material from both secrets
pub fn derive(
    preshared: &PresharedSecret,
    shared_secret: &[u8],
    out_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(
        preshared.as_bytes().len() + shared_secret.len(),
    ));
    ikm.extend_from_slice(preshared.as_bytes());
    ikm.extend_from_slice(shared_secret);

    let hk = Hkdf::<Sha256>::new(None, &ikm);
    let mut okm = Zeroizing::new(vec![0u8; out_len]);
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|_| HandshakeError::KeyDerivation)?;
    Ok(okm)
}

/// Derive the 32-byte AES-256 session key
pub fn derive_session_key(preshared: &PresharedSecret, shared_secret: &[u8]) -> Result<SessionKey> {
    let okm = derive(preshared, shared_secret, SESSION_KEY_LEN)?;
    let mut key = [0u8; SESSION_KEY_LEN];
    key.copy_from_slice(&okm);
    Ok(SessionKey::from_bytes(key))
}
