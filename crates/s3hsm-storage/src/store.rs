//! Object store capability trait

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use s3hsm_core::HsmResult;

/// Content type of every uploaded object.
pub const DATA_MIME_TYPE: &str = "binary/octet-stream";

/// Byte source handed to an upload. Owned, so backends can move it into a
/// streaming request body.
pub type ByteSource = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Byte sink a download writes into.
pub type ByteSink<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// Put, get and delete of whole objects, addressed by bucket and key.
///
/// Implementations stream: neither direction may hold a whole object in
/// memory.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for log lines.
    fn name(&self) -> &'static str;

    /// Upload everything `source` yields to `bucket/key`, replacing any
    /// existing object. `content_length` is the exact number of bytes the
    /// source will produce. Returns the number of bytes sent.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        source: ByteSource,
        content_length: u64,
    ) -> HsmResult<u64>;

    /// Stream `bucket/key` into `sink`, flushing it at the end. Returns the
    /// number of bytes received.
    ///
    /// Fails with `HsmError::NotFound` when the object does not exist.
    async fn download(&self, bucket: &str, key: &str, sink: ByteSink<'_>) -> HsmResult<u64>;

    /// Remove `bucket/key`. Whatever the backend reports is passed on.
    async fn delete(&self, bucket: &str, key: &str) -> HsmResult<()>;
}
