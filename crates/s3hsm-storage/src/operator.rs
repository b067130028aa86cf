//! OpenDAL-backed object store (S3 signature v4, in-memory)

use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::Operator;
use secrecy::ExposeSecret;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use s3hsm_core::{ConnectionParams, HsmError, HsmResult};

use crate::store::{ByteSink, ByteSource, ObjectStore, DATA_MIME_TYPE};

/// Size of each read from the upload source.
const READ_BUF_SIZE: usize = 1024 * 1024;

/// Upload part size. S3 rejects multipart parts below 5 MiB, so the writer
/// buffers up to this much before sending a part.
const WRITE_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Build an OpenDAL Operator for one bucket of an S3-compatible endpoint.
///
/// Uses path-style addressing (default in opendal 0.55), which is required by
/// MinIO, Ceph RGW and most non-AWS stores. Do NOT call
/// enable_virtual_host_style() here. No retry layer: retrying is the HSM's job.
pub fn build_operator(params: &ConnectionParams, bucket: &str) -> HsmResult<Operator> {
    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let builder = opendal::services::S3::default()
        .endpoint(&params.endpoint_url())
        .region(params.region())
        .bucket(bucket)
        .access_key_id(params.access_key_id())
        .secret_access_key(params.secret_access_key().expose_secret())
        .disable_config_load()
        .disable_ec2_metadata();

    let op = Operator::new(builder)
        .map_err(|e| HsmError::Config(format!("creating S3 operator for bucket {bucket}: {e}")))?;

    if params.trace() {
        Ok(op.layer(opendal::layers::LoggingLayer::default()).finish())
    } else {
        Ok(op.finish())
    }
}

enum Operators {
    /// One S3 operator per bucket, built on demand
    S3(ConnectionParams),
    /// A single operator; buckets become top-level directories
    Shared(Operator),
}

/// [`ObjectStore`] on top of OpenDAL.
pub struct OpendalStore {
    operators: Operators,
}

impl OpendalStore {
    pub fn s3(params: ConnectionParams) -> Self {
        Self {
            operators: Operators::S3(params),
        }
    }

    /// Store objects under `<bucket>/<key>` of an existing operator.
    pub fn shared(op: Operator) -> Self {
        Self {
            operators: Operators::Shared(op),
        }
    }

    /// Process-local in-memory store.
    pub fn memory() -> HsmResult<Self> {
        let op = Operator::new(opendal::services::Memory::default())
            .map_err(HsmError::backend)?
            .finish();
        Ok(Self::shared(op))
    }

    fn locate(&self, bucket: &str, key: &str) -> HsmResult<(Operator, String)> {
        match &self.operators {
            Operators::S3(params) => Ok((build_operator(params, bucket)?, key.to_string())),
            Operators::Shared(op) => Ok((op.clone(), format!("{bucket}/{key}"))),
        }
    }
}

fn map_opendal_err(err: opendal::Error, bucket: &str, key: &str) -> HsmError {
    if err.kind() == opendal::ErrorKind::NotFound {
        HsmError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        HsmError::Backend(format!("{bucket}/{key}: {err}"))
    }
}

fn map_stream_err(err: std::io::Error, bucket: &str, key: &str) -> HsmError {
    if err.kind() == std::io::ErrorKind::NotFound {
        HsmError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        HsmError::Backend(format!("{bucket}/{key}: {err}"))
    }
}

#[async_trait]
impl ObjectStore for OpendalStore {
    fn name(&self) -> &'static str {
        match self.operators {
            Operators::S3(_) => "s3v4",
            Operators::Shared(_) => "opendal",
        }
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        mut source: ByteSource,
        content_length: u64,
    ) -> HsmResult<u64> {
        let (op, path) = self.locate(bucket, key)?;
        debug!(bucket, key, content_length, "upload starting");

        let mut writer = op
            .writer_with(&path)
            .chunk(WRITE_CHUNK_SIZE)
            .content_type(DATA_MIME_TYPE)
            .await
            .map_err(|e| map_opendal_err(e, bucket, key))?;

        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut sent = 0u64;
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer
                .write(buf[..n].to_vec())
                .await
                .map_err(|e| map_opendal_err(e, bucket, key))?;
            sent += n as u64;
        }
        writer
            .close()
            .await
            .map_err(|e| map_opendal_err(e, bucket, key))?;

        if sent != content_length {
            tracing::warn!(bucket, key, sent, content_length, "source size changed during upload");
        }
        debug!(bucket, key, bytes = sent, "upload complete");
        Ok(sent)
    }

    async fn download(&self, bucket: &str, key: &str, sink: ByteSink<'_>) -> HsmResult<u64> {
        let (op, path) = self.locate(bucket, key)?;
        debug!(bucket, key, "download starting");

        let reader = op
            .reader(&path)
            .await
            .map_err(|e| map_opendal_err(e, bucket, key))?;
        let stream = reader
            .into_bytes_stream(..)
            .await
            .map_err(|e| map_opendal_err(e, bucket, key))?;
        let mut stream = std::pin::pin!(stream);

        let mut received = 0u64;
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|e| map_stream_err(e, bucket, key))?
        {
            sink.write_all(&chunk).await?;
            received += chunk.len() as u64;
        }
        sink.flush().await?;

        debug!(bucket, key, bytes = received, "download complete");
        Ok(received)
    }

    async fn delete(&self, bucket: &str, key: &str) -> HsmResult<()> {
        let (op, path) = self.locate(bucket, key)?;
        // S3 answers 204 for a missing key; the HSM must hear NotFound.
        op.stat(&path)
            .await
            .map_err(|e| map_opendal_err(e, bucket, key))?;
        op.delete(&path)
            .await
            .map_err(|e| map_opendal_err(e, bucket, key))?;
        debug!(bucket, key, "deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3hsm_core::config::StorageConfig;
    use secrecy::SecretString;

    fn params(trace: bool) -> ConnectionParams {
        let storage = StorageConfig {
            endpoint: "localhost:9000".into(),
            trace,
            ..Default::default()
        };
        ConnectionParams::from_config(&storage, "test-key", SecretString::from("test-secret".to_string()))
            .unwrap()
    }

    fn source(data: &[u8]) -> ByteSource {
        Box::new(std::io::Cursor::new(data.to_vec()))
    }

    #[test]
    fn test_build_operator_valid() {
        let op = build_operator(&params(false), "test-bucket");
        assert!(op.is_ok(), "operator construction should succeed");
    }

    #[test]
    fn test_build_operator_with_trace() {
        assert!(build_operator(&params(true), "test-bucket").is_ok());
    }

    #[tokio::test]
    async fn test_memory_upload_download() {
        let store = OpendalStore::memory().unwrap();
        let data = b"hello object store".to_vec();

        let sent = store
            .upload("bucket", "obj", source(&data), data.len() as u64)
            .await
            .unwrap();
        assert_eq!(sent, data.len() as u64);

        let mut out = Vec::new();
        let received = store.download("bucket", "obj", &mut out).await.unwrap();
        assert_eq!(received, data.len() as u64);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_memory_upload_larger_than_read_buffer() {
        let store = OpendalStore::memory().unwrap();
        let data: Vec<u8> = (0..(READ_BUF_SIZE * 2 + 123)).map(|i| (i % 251) as u8).collect();

        store
            .upload("bucket", "big", source(&data), data.len() as u64)
            .await
            .unwrap();

        let mut out = Vec::new();
        store.download("bucket", "big", &mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_buckets_are_separate() {
        let store = OpendalStore::memory().unwrap();
        store.upload("a", "obj", source(b"in a"), 4).await.unwrap();

        let mut out = Vec::new();
        let err = store.download("b", "obj", &mut out).await.unwrap_err();
        assert!(matches!(err, HsmError::NotFound { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let store = OpendalStore::memory().unwrap();
        let mut out = Vec::new();
        let err = store.download("bucket", "missing", &mut out).await.unwrap_err();
        assert!(matches!(
            err,
            HsmError::NotFound { ref bucket, ref key } if bucket == "bucket" && key == "missing"
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_object() {
        let store = OpendalStore::memory().unwrap();
        store.upload("bucket", "obj", source(b"bye"), 3).await.unwrap();
        store.delete("bucket", "obj").await.unwrap();

        let mut out = Vec::new();
        assert!(store.download("bucket", "obj", &mut out).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = OpendalStore::memory().unwrap();
        let err = store.delete("bucket", "never-written").await.unwrap_err();
        assert!(matches!(
            err,
            HsmError::NotFound { ref bucket, ref key } if bucket == "bucket" && key == "never-written"
        ));
    }
}
