//! s3hsm-crypto: per-object encryption for stored objects
//!
//! Every encrypted object gets its own random key, which is never stored
//! anywhere except in the object's location string. Content is encrypted
//! with AES in output-feedback mode starting from an all-zero IV, so the
//! same key must never be used for two objects.
//!
//! ```text
//! store:    file ──▶ EncryptReader ──▶ backend upload
//! retrieve: backend download ──▶ DecryptWriter ──▶ file
//! ```

pub mod cipher;
pub mod keys;
pub mod stream;

pub use cipher::Keystream;
pub use keys::{generate_key, EncryptionKey};
pub use stream::{DecryptWriter, EncryptReader};
