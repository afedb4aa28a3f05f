//! Secure transport layer: turns a raw stream into a [`SecureSession`]

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::QsTlsConfig;
use crate::error::Result;
use crate::handshake::HybridHandshake;
use crate::keys::{FileKeyMaterial, KeyMaterialProvider};
use crate::session::{SecureSession, SessionEvents};
use crate::types::{Role, SessionState, PROTOCOL_ID};

/// Transport layer for establishing secure connections
#[derive(Clone)]
pub struct QsTransport {
    config: QsTlsConfig,
    key_material: Arc<dyn KeyMaterialProvider>,
}

impl QsTransport {
    /// Create a transport that reads the pre-shared secret from the configured key file
    pub fn new(config: QsTlsConfig) -> Self {
        let key_material = Arc::new(FileKeyMaterial::new(config.key_path.clone()));
        Self {
            config,
            key_material,
        }
    }

    /// Create a transport with an explicit source of key material
    pub fn with_key_material(
        config: QsTlsConfig,
        key_material: Arc<dyn KeyMaterialProvider>,
    ) -> Self {
        Self {
            config,
            key_material,
        }
    }

    pub fn config(&self) -> &QsTlsConfig {
        &self.config
    }

    /// Upgrade a socket connection as the initiator (connecting side)
    pub async fn upgrade_outbound<S>(&self, socket: S) -> Result<(SecureSession<S>, SessionEvents)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.upgrade(socket, Role::Initiator).await
    }

    /// Upgrade a socket connection as the responder (listening side)
    pub async fn upgrade_inbound<S>(&self, socket: S) -> Result<(SecureSession<S>, SessionEvents)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.upgrade(socket, Role::Responder).await
    }

    async fn upgrade<S>(
        &self,
        mut socket: S,
        role: Role,
    ) -> Result<(SecureSession<S>, SessionEvents)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // Key material is loaded before anything touches the wire.
        let preshared = self.key_material.load()?;

        if self.config.verbose_logging {
            tracing::debug!(
                protocol = PROTOCOL_ID,
                role = %role,
                state = %SessionState::Handshaking,
                "starting handshake"
            );
        }

        let key = HybridHandshake::new(role, preshared)
            .with_verbose_logging(self.config.verbose_logging)
            .run(&mut socket)
            .await?;

        tracing::info!(role = %role, key_id = %key.fingerprint(), "handshake complete");

        Ok(SecureSession::new(socket, key, role))
    }
}
