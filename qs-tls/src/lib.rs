//! Hybrid pre-shared key + X25519 secure transport
//!
//! Two peers holding the same pre-shared secret (for example the output of a
//! quantum key distribution run) agree on a session key by mixing that secret
//! with a fresh ephemeral X25519 exchange, then talk over AES-256-GCM records.
//!
//! # Protocol Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Hybrid Handshake                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  1. Pre-shared secret  │  32 bytes, padded or truncated     │
//! │  2. X25519 ECDH        │  one ephemeral key pair per side   │
//! │  3. Session key        │  HKDF-SHA256(psk || x25519_ss)     │
//! │  4. Records            │  u32 len || nonce || AES-256-GCM   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The ephemeral keys are not authenticated; the pre-shared secret is the only
//! thing binding the two ends together.
//!
//! # Example
//!
//! ```rust,ignore
//! use qs_tls::{connect, QsTlsConfig, QsTransport};
//!
//! let transport = QsTransport::new(QsTlsConfig::default());
//! let (session, mut events) = connect(&transport).await?;
//! let handle = session.handle();
//! tokio::spawn(session.run());
//!
//! handle.send_chat("hello").await?;
//! ```

pub mod config;
pub mod error;
pub mod exchange;
pub mod framing;
pub mod handshake;
pub mod kdf;
pub mod keys;
pub mod message;
pub mod record;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;

pub use config::{QsTlsConfig, QsTlsConfigBuilder};
pub use error::{HandshakeError, QsTlsError, Result};
pub use handshake::HybridHandshake;
pub use keys::{FileKeyMaterial, KeyMaterialProvider, PresharedSecret, StaticKeyMaterial};
pub use message::Message;
pub use server::{connect, QsServer};
pub use session::{
    CloseReason, SecureSession, SessionEvent, SessionEvents, SessionHandle, SessionStats,
};
pub use transport::QsTransport;
pub use types::{Role, SessionKey, SessionState};
