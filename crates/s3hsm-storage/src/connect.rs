//! Backend factory: picks an object store implementation for the configured
//! signature version.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use s3hsm_core::{ConnectionParams, HsmResult, SignatureVersion};

use crate::operator::OpendalStore;
use crate::sigv2::SigV2Store;
use crate::store::ObjectStore;

/// Build the store matching `params.signature_version()`.
pub fn connect(params: &ConnectionParams) -> HsmResult<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match params.signature_version() {
        SignatureVersion::V4 => Arc::new(OpendalStore::s3(params.clone())),
        SignatureVersion::V2 => Arc::new(SigV2Store::new(params)?),
    };
    debug!(
        backend = store.name(),
        endpoint = %params.endpoint_url(),
        "connected"
    );
    Ok(store)
}

/// Something that can hand out a connected store.
///
/// Connecting is deferred until an operation needs the backend, so work
/// that fails earlier never touches the network.
pub trait Connector: Send + Sync {
    fn connect(&self) -> HsmResult<Arc<dyn ObjectStore>>;
}

/// Connects to an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Connector {
    params: ConnectionParams,
}

impl S3Connector {
    pub fn new(params: ConnectionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }
}

impl Connector for S3Connector {
    fn connect(&self) -> HsmResult<Arc<dyn ObjectStore>> {
        connect(&self.params)
    }
}

/// Hands out one shared in-memory store and counts connections.
pub struct MemoryConnector {
    store: Arc<OpendalStore>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> HsmResult<Self> {
        Ok(Self {
            store: Arc::new(OpendalStore::memory()?),
            connects: AtomicUsize::new(0),
        })
    }

    /// How many times [`Connector::connect`] has been called.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Direct access to the backing store, bypassing the counter.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> HsmResult<Arc<dyn ObjectStore>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.clone())
    }
}
