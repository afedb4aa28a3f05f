//! Hybrid handshake: pre-shared secret + ephemeral X25519
//!
//! ```text
//!   Responder                              Initiator
//!   ─────────                              ─────────
//!   generate ephemeral
//!   send pk_R (32 raw bytes)  ──────────▶  receive pk_R
//!                                          generate ephemeral
//!   receive pk_I              ◀──────────  send pk_I (32 raw bytes)
//!   key = HKDF(psk || X25519(sk_R, pk_I))  key = HKDF(psk || X25519(sk_I, pk_R))
//! ```
//!
//! The responder always writes first and the initiator always reads first,
//! so neither side can end up waiting on the other.
//!
//! Public keys are accepted as received: the exchange is unauthenticated
//! Diffie-Hellman and an active man in the middle who also holds the
//! pre-shared secret can interpose.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{HandshakeError, QsTlsError, Result};
use crate::exchange::{EphemeralKeyPair, PUBLIC_KEY_LEN};
use crate::kdf;
use crate::keys::PresharedSecret;
use crate::types::{Role, SessionKey};

/// Handshake state for one connection attempt
pub struct HybridHandshake {
    role: Role,
    preshared: PresharedSecret,
    ephemeral: Option<EphemeralKeyPair>,
    verbose_logging: bool,
}

impl HybridHandshake {
    /// Create a new handshake instance
    pub fn new(role: Role, preshared: PresharedSecret) -> Self {
        Self {
            role,
            preshared,
            ephemeral: None,
            verbose_logging: false,
        }
    }

    /// Emit a debug event for every handshake step
    pub fn with_verbose_logging(mut self, verbose: bool) -> Self {
        self.verbose_logging = verbose;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Our ephemeral public key, generating the key pair on first use
    pub fn local_public_key(&mut self) -> [u8; PUBLIC_KEY_LEN] {
        self.ephemeral
            .get_or_insert_with(EphemeralKeyPair::generate)
            .public_bytes()
    }

    /// Consume the peer's public key and derive the session key
    ///
    /// Fails if [`local_public_key`](Self::local_public_key) was never called,
    /// since the peer cannot have received our half of the exchange.
    pub fn complete(mut self, peer_public: &[u8]) -> Result<SessionKey> {
        let ephemeral = self
            .ephemeral
            .take()
            .ok_or(HandshakeError::InvalidState("local public key was never sent"))?;
        let shared = ephemeral.exchange(peer_public)?;
        let key = kdf::derive_session_key(&self.preshared, shared.as_bytes())?;

        if self.verbose_logging {
            tracing::debug!(
                role = %self.role,
                key_id = %key.fingerprint(),
                "session key derived"
            );
        }

        Ok(key)
    }

    /// Run the responder side over `stream`
    pub async fn respond<S>(mut self, stream: &mut S) -> Result<SessionKey>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // Step 1: Send our public key
        let local = self.local_public_key();
        write_public_key(stream, &local).await?;
        if self.verbose_logging {
            tracing::debug!(public_key = %hex::encode(local), "sent responder public key");
        }

        // Step 2: Receive the initiator's public key
        let peer = read_public_key(stream).await?;
        if self.verbose_logging {
            tracing::debug!(public_key = %hex::encode(peer), "received initiator public key");
        }

        // Step 3: Exchange and derive
        self.complete(&peer)
    }

    /// Run the initiator side over `stream`
    pub async fn initiate<S>(mut self, stream: &mut S) -> Result<SessionKey>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // Step 1: Receive the responder's public key
        let peer = read_public_key(stream).await?;
        if self.verbose_logging {
            tracing::debug!(public_key = %hex::encode(peer), "received responder public key");
        }

        // Step 2: Generate and send our public key
        let local = self.local_public_key();
        write_public_key(stream, &local).await?;
        if self.verbose_logging {
            tracing::debug!(public_key = %hex::encode(local), "sent initiator public key");
        }

        // Step 3: Exchange and derive
        self.complete(&peer)
    }

    /// Run whichever side `role` names
    pub async fn run<S>(self, stream: &mut S) -> Result<SessionKey>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.role {
            Role::Initiator => self.initiate(stream).await,
            Role::Responder => self.respond(stream).await,
        }
    }
}

async fn write_public_key<S>(stream: &mut S, key: &[u8; PUBLIC_KEY_LEN]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(key).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_public_key<S>(stream: &mut S) -> Result<[u8; PUBLIC_KEY_LEN]>
where
    S: AsyncRead + Unpin,
{
    let mut key = [0u8; PUBLIC_KEY_LEN];
    match stream.read_exact(&mut key).await {
        Ok(_) => Ok(key),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(HandshakeError::ConnectionClosed.into())
        }
        Err(e) => Err(QsTlsError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QsTlsError;
    use tokio::io::duplex;

    fn psk(byte: u8) -> PresharedSecret {
        PresharedSecret::from_source_bytes(&[byte; 32])
    }

    #[test]
    fn in_memory_handshake_agrees() {
        let mut responder = HybridHandshake::new(Role::Responder, psk(1));
        let mut initiator = HybridHandshake::new(Role::Initiator, psk(1));

        let responder_pub = responder.local_public_key();
        let initiator_pub = initiator.local_public_key();

        let k_r = responder.complete(&initiator_pub).unwrap();
        let k_i = initiator.complete(&responder_pub).unwrap();
        assert_eq!(k_r, k_i);
    }

    #[test]
    fn local_public_key_is_stable_within_attempt() {
        let mut hs = HybridHandshake::new(Role::Responder, psk(1));
        assert_eq!(hs.local_public_key(), hs.local_public_key());
    }

    #[test]
    fn complete_without_local_key_is_rejected() {
        let mut peer = HybridHandshake::new(Role::Responder, psk(1));
        let peer_pub = peer.local_public_key();

        let result = HybridHandshake::new(Role::Initiator, psk(1)).complete(&peer_pub);
        assert!(matches!(
            result,
            Err(QsTlsError::Handshake(HandshakeError::InvalidState(_)))
        ));
    }

    #[tokio::test]
    async fn duplex_handshake_agrees() {
        let (mut a, mut b) = duplex(1024);
        let responder = HybridHandshake::new(Role::Responder, psk(0)).with_verbose_logging(true);
        let initiator = HybridHandshake::new(Role::Initiator, psk(0));

        let (k_r, k_i) = tokio::join!(responder.run(&mut a), initiator.run(&mut b));
        assert_eq!(k_r.unwrap(), k_i.unwrap());
    }

    #[tokio::test]
    async fn differing_preshared_secrets_give_differing_keys() {
        let (mut a, mut b) = duplex(1024);
        let responder = HybridHandshake::new(Role::Responder, psk(1));
        let initiator = HybridHandshake::new(Role::Initiator, psk(2));

        let (k_r, k_i) = tokio::join!(responder.respond(&mut a), initiator.initiate(&mut b));
        assert_ne!(k_r.unwrap(), k_i.unwrap());
    }

    #[tokio::test]
    async fn initiator_short_read_is_connection_closed() {
        let (mut a, mut b) = duplex(1024);
        a.write_all(&[7u8; 20]).await.unwrap();
        drop(a);

        let result = HybridHandshake::new(Role::Initiator, psk(1))
            .initiate(&mut b)
            .await;
        assert!(matches!(
            result,
            Err(QsTlsError::Handshake(HandshakeError::ConnectionClosed))
        ));
    }

    #[tokio::test]
    async fn responder_short_read_is_connection_closed() {
        let (mut a, mut b) = duplex(1024);
        let responder = tokio::spawn(async move {
            HybridHandshake::new(Role::Responder, psk(1))
                .respond(&mut a)
                .await
        });

        // Read the responder's key, send half of ours, hang up.
        let mut pk = [0u8; PUBLIC_KEY_LEN];
        b.read_exact(&mut pk).await.unwrap();
        b.write_all(&[1u8; 16]).await.unwrap();
        drop(b);

        let result = responder.await.unwrap();
        assert!(matches!(
            result,
            Err(QsTlsError::Handshake(HandshakeError::ConnectionClosed))
        ));
    }

    #[tokio::test]
    async fn low_order_peer_key_is_rejected() {
        let (mut a, mut b) = duplex(1024);
        a.write_all(&[0u8; PUBLIC_KEY_LEN]).await.unwrap();

        let result = HybridHandshake::new(Role::Initiator, psk(1))
            .initiate(&mut b)
            .await;
        assert!(matches!(
            result,
            Err(QsTlsError::Handshake(HandshakeError::InvalidPublicKey(_)))
        ));
    }
}
