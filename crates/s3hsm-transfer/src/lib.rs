//! s3hsm-transfer: moves files between local disk and the object store

pub mod engine;
pub mod fault;

pub use engine::{Engine, LocationSettings, Phase, RetrieveReport, StoreReport};
pub use fault::{FaultInjection, InjectedFailure};
