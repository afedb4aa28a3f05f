//! Type definitions for the qs-tls protocol

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the pre-shared secret after normalization
pub const PRESHARED_SECRET_LEN: usize = 32;

/// Length of the derived session key (AES-256)
pub const SESSION_KEY_LEN: usize = 32;

/// HKDF info label binding derived keys to this protocol
pub const HKDF_INFO: &[u8] = b"qs-tls-stage106";

/// Protocol identifier string
pub const PROTOCOL_ID: &str = "/qs-tls/stage106";

/// Which side of the handshake this peer plays
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Connecting side; reads the responder's public key first
    Initiator,
    /// Listening side; sends its public key first
    Responder,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a connection
///
/// States are ordered; a session only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    Handshaking,
    Established,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Handshaking => "handshaking",
            SessionState::Established => "established",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Symmetric key protecting every record of one connection
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }

    /// Short non-secret fingerprint for log correlation
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionKey").field(&self.fingerprint()).finish()
    }
}
