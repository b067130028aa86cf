//! AES output-feedback keystream

use aes::{Aes192, Aes256};
use ofb::cipher::{KeyIvInit, StreamCipher};
use ofb::Ofb;

use s3hsm_core::types::BLOCK_SIZE;
use s3hsm_core::{CipherKind, HsmError, HsmResult};

use crate::keys::EncryptionKey;

/// All-zero IV. Safe only because every key encrypts exactly one object.
const ZERO_IV: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

/// Keystream state for one object. Encryption and decryption are the same
/// operation; state carries over between calls so input may be fed in
/// pieces of any size.
pub enum Keystream {
    Aes192(Box<Ofb<Aes192>>),
    Aes256(Box<Ofb<Aes256>>),
}

impl Keystream {
    pub fn new(key: &EncryptionKey) -> HsmResult<Self> {
        let bytes = key.as_bytes();
        let invalid = |_| HsmError::InvalidKeyLength {
            expected: key.kind().key_len(),
            actual: bytes.len(),
        };
        Ok(match key.kind() {
            CipherKind::Aes192Ofb => Keystream::Aes192(Box::new(
                Ofb::<Aes192>::new_from_slices(bytes, &ZERO_IV).map_err(invalid)?,
            )),
            CipherKind::Aes256Ofb => Keystream::Aes256(Box::new(
                Ofb::<Aes256>::new_from_slices(bytes, &ZERO_IV).map_err(invalid)?,
            )),
        })
    }

    /// XOR the next `buf.len()` keystream bytes into `buf`.
    pub fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Keystream::Aes192(c) => c.apply_keystream(buf),
            Keystream::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

impl std::fmt::Debug for Keystream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Keystream::Aes192(_) => CipherKind::Aes192Ofb,
            Keystream::Aes256(_) => CipherKind::Aes256Ofb,
        };
        f.debug_tuple("Keystream").field(&kind).finish()
    }
}
