//! Error types for the qs-tls protocol

use thiserror::Error;

/// Errors that can occur during qs-tls operations
#[derive(Debug, Error)]
pub enum QsTlsError {
    /// The pre-shared secret could not be read from its store
    #[error("key material unavailable: {0}")]
    KeyMaterial(#[source] std::io::Error),

    /// Handshake protocol error
    #[error("handshake error: {0}")]
    Handshake(HandshakeError),

    /// Invalid record length prefix, undersized record or malformed plaintext
    #[error("format error: {0}")]
    Format(String),

    /// AEAD tag verification failed
    #[error("record authentication failed")]
    Authentication,

    /// Peer closed the stream in the middle of a read
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// I/O error during communication
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Encryption failure on the sending side
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Operation not permitted in the current session state
    #[error("session error: {0}")]
    Session(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Specific handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Connection closed before the peer's public key was fully received
    #[error("connection closed during handshake")]
    ConnectionClosed,

    /// Peer public key has the wrong length or is not a usable point
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Handshake steps were driven out of order
    #[error("invalid handshake state: {0}")]
    InvalidState(&'static str),

    /// Requested session key length is out of range for HKDF
    #[error("key derivation failed")]
    KeyDerivation,
}

impl From<HandshakeError> for QsTlsError {
    fn from(e: HandshakeError) -> Self {
        QsTlsError::Handshake(e)
    }
}

impl QsTlsError {
    /// Whether this error is the ordinary end of a connection rather than a fault
    pub fn is_connection_closed(&self) -> bool {
        matches!(
            self,
            QsTlsError::ConnectionClosed | QsTlsError::Handshake(HandshakeError::ConnectionClosed)
        )
    }
}

/// Result type for qs-tls operations
pub type Result<T> = std::result::Result<T, QsTlsError>;
