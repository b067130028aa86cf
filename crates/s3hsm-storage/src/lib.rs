//! s3hsm-storage: object store backends behind one capability trait
//!
//! | Backend        | Signing | Use case                          |
//! |----------------|---------|-----------------------------------|
//! | `OpendalStore` | v4      | current S3-compatible stores      |
//! | `SigV2Store`   | v2      | older stores without SigV4        |
//! | memory         | none    | tests and dry runs                |
//!
//! Backends are picked by [`connect`] from the configured signature version;
//! callers only ever see `Arc<dyn ObjectStore>`.

pub mod connect;
pub mod operator;
pub mod sigv2;
pub mod store;

pub use connect::{connect, Connector, MemoryConnector, S3Connector};
pub use operator::{build_operator, OpendalStore};
pub use sigv2::SigV2Store;
pub use store::{ByteSink, ByteSource, ObjectStore, DATA_MIME_TYPE};
