//! s3hsm-core: shared types, configuration schema, error taxonomy and the
//! self-describing object location codec.

pub mod config;
pub mod error;
pub mod location;
pub mod params;
pub mod types;

pub use error::{HsmError, HsmResult};
pub use location::{CipherSpec, LocationLayout, ObjectAddress, ObjectLocation};
pub use params::ConnectionParams;
pub use types::{CipherKind, SignatureVersion};
