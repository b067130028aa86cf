//! Per-object key generation

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use s3hsm_core::{CipherKind, CipherSpec, HsmError, HsmResult};

/// Raw key for one object. Zeroized on drop.
#[derive(Clone)]
pub struct EncryptionKey {
    kind: CipherKind,
    bytes: Vec<u8>,
}

impl EncryptionKey {
    /// Wrap existing key material, checking it fits the cipher.
    pub fn from_bytes(kind: CipherKind, bytes: Vec<u8>) -> HsmResult<Self> {
        if bytes.len() != kind.key_len() {
            let actual = bytes.len();
            let mut bytes = bytes;
            bytes.zeroize();
            return Err(HsmError::InvalidKeyLength {
                expected: kind.key_len(),
                actual,
            });
        }
        Ok(Self { kind, bytes })
    }

    /// Key material recovered from a location.
    pub fn from_spec(spec: &CipherSpec) -> HsmResult<Self> {
        Self::from_bytes(spec.kind(), spec.key().to_vec())
    }

    /// Cipher metadata to embed in the object's location.
    pub fn to_spec(&self) -> CipherSpec {
        CipherSpec::new(self.kind, self.bytes.clone())
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("kind", &self.kind)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh random key for `kind` from the operating system CSPRNG.
pub fn generate_key(kind: CipherKind) -> EncryptionKey {
    let mut bytes = vec![0u8; kind.key_len()];
    OsRng.fill_bytes(&mut bytes);
    tracing::debug!(cipher = %kind, "generated object key");
    EncryptionKey { kind, bytes }
}
