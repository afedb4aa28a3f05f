//! Pre-shared key material
//!
//! The pre-shared secret is distributed out of band (for example the final
//! key of a QKD link) and is always normalized to exactly
//! [`PRESHARED_SECRET_LEN`] bytes: short sources are right-padded with zero
//! bytes, long sources are truncated.

use std::fmt;
use std::path::{Path, PathBuf};

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{QsTlsError, Result};
use crate::types::PRESHARED_SECRET_LEN;

/// Default location of the pre-shared key file
pub const DEFAULT_KEY_PATH: &str = "final_key.bin";

/// Fixed-length pre-shared secret
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PresharedSecret([u8; PRESHARED_SECRET_LEN]);

impl PresharedSecret {
    /// Apply the pad/truncate policy to raw source bytes
    pub fn from_source_bytes(source: &[u8]) -> Self {
        let mut secret = [0u8; PRESHARED_SECRET_LEN];
        let len = source.len().min(PRESHARED_SECRET_LEN);
        secret[..len].copy_from_slice(&source[..len]);
        Self(secret)
    }

    pub fn as_bytes(&self) -> &[u8; PRESHARED_SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for PresharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PresharedSecret(..)")
    }
}

/// Source of the pre-shared secret
pub trait KeyMaterialProvider: Send + Sync {
    /// Load and normalize the secret
    fn load(&self) -> Result<PresharedSecret>;
}

/// Reads the secret from a file on disk
#[derive(Clone, Debug)]
pub struct FileKeyMaterial {
    path: PathBuf,
}

impl FileKeyMaterial {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileKeyMaterial {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PATH)
    }
}

impl KeyMaterialProvider for FileKeyMaterial {
    fn load(&self) -> Result<PresharedSecret> {
        let raw = Zeroizing::new(std::fs::read(&self.path).map_err(|e| {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "failed to read pre-shared key"
            );
            QsTlsError::KeyMaterial(e)
        })?);
        if raw.len() != PRESHARED_SECRET_LEN {
            tracing::debug!(
                path = %self.path.display(),
                len = raw.len(),
                "normalizing pre-shared key to {} bytes",
                PRESHARED_SECRET_LEN
            );
        }
        Ok(PresharedSecret::from_source_bytes(&raw))
    }
}

/// Secret held in memory
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StaticKeyMaterial {
    bytes: Vec<u8>,
}

impl StaticKeyMaterial {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for StaticKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeyMaterial")
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl KeyMaterialProvider for StaticKeyMaterial {
    fn load(&self) -> Result<PresharedSecret> {
        Ok(PresharedSecret::from_source_bytes(&self.bytes))
    }
}
