//! Single-use X25519 key pairs

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};

use crate::error::HandshakeError;

/// Length of a raw X25519 public key on the wire
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ephemeral key pair generated for exactly one handshake
///
/// The secret half is consumed by [`EphemeralKeyPair::exchange`], so a pair
/// can never feed two shared-secret computations.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a fresh key pair from the OS RNG
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Raw public key bytes to send to the peer
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public.to_bytes()
    }

    /// Compute the shared secret with the peer's raw public key
    pub fn exchange(self, peer_public: &[u8]) -> Result<SharedSecret, HandshakeError> {
        let peer = parse_public_key(peer_public)?;
        let shared = self.secret.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return Err(HandshakeError::InvalidPublicKey(
                "low-order point".to_string(),
            ));
        }
        Ok(shared)
    }
}

/// Parse a raw 32-byte public key
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, HandshakeError> {
    let raw: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
        HandshakeError::InvalidPublicKey(format!(
            "expected {} bytes, got {}",
            PUBLIC_KEY_LEN,
            bytes.len()
        ))
    })?;
    Ok(PublicKey::from(raw))
}
