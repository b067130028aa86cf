//! Transfer engine: store, retrieve and purge one object per call
//!
//! Each operation runs the same phases:
//!   Idle → Connecting → Transferring → Done (or Failed)
//!
//! Every transition is logged with the elapsed time. All diagnostics,
//! including those emitted by the storage backends, go to the `Dispatch`
//! handed to [`Engine::new`] and nowhere else.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncWriteExt, BufReader};
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn, Dispatch};

use s3hsm_core::config::HsmConfig;
use s3hsm_core::{CipherKind, HsmError, HsmResult, LocationLayout, ObjectLocation};
use s3hsm_crypto::{generate_key, DecryptWriter, EncryptReader, EncryptionKey};
use s3hsm_storage::Connector;

/// How new objects are named and encrypted.
#[derive(Debug, Clone)]
pub struct LocationSettings {
    pub scheme: String,
    pub instance: String,
    pub layout: LocationLayout,
    pub cipher: CipherKind,
}

impl LocationSettings {
    pub fn from_config(config: &HsmConfig) -> Self {
        Self {
            scheme: config.location.scheme.clone(),
            instance: config.location.instance.clone(),
            layout: config.location.layout,
            cipher: config.crypto.cipher,
        }
    }
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self::from_config(&HsmConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Transferring,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Transferring => "transferring",
            Phase::Done => "done",
            Phase::Failed => "failed",
        })
    }
}

/// Result of storing a single file
#[derive(Debug)]
pub struct StoreReport {
    /// Where the object went; carries the key when encrypted
    pub location: ObjectLocation,
    pub bytes: u64,
}

/// Result of retrieving a single object
#[derive(Debug)]
pub struct RetrieveReport {
    pub local_path: PathBuf,
    pub bytes: u64,
}

/// Phase bookkeeping for one operation.
struct Tracker {
    op: &'static str,
    phase: Phase,
    started: Instant,
}

impl Tracker {
    fn start(op: &'static str) -> Self {
        debug!(op, phase = %Phase::Idle, "operation starting");
        Self {
            op,
            phase: Phase::Idle,
            started: Instant::now(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!(
            op = self.op,
            from = %self.phase,
            to = %phase,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "phase change"
        );
        self.phase = phase;
    }

    fn finish<T>(mut self, result: HsmResult<T>) -> HsmResult<T> {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                self.enter(Phase::Done);
                info!(op = self.op, elapsed_ms, "operation complete");
            }
            Err(e) => {
                let failed_in = self.phase;
                self.enter(Phase::Failed);
                warn!(
                    op = self.op,
                    phase = %failed_in,
                    elapsed_ms,
                    bad_location = e.is_bad_location(),
                    error = %e,
                    "operation failed"
                );
            }
        }
        result
    }
}

pub struct Engine {
    connector: Arc<dyn Connector>,
    settings: LocationSettings,
    diagnostics: Dispatch,
}

impl Engine {
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: LocationSettings,
        diagnostics: Dispatch,
    ) -> Self {
        Self {
            connector,
            settings,
            diagnostics,
        }
    }

    /// Upload `local_path` to `bucket/object_key` and return its location.
    ///
    /// With `encrypt` set a fresh key is generated for this object only and
    /// embedded in the returned location. A failed upload may leave a
    /// partial object behind; nothing is cleaned up.
    pub async fn store(
        &self,
        object_key: &str,
        local_path: &Path,
        bucket: &str,
        encrypt: bool,
    ) -> HsmResult<StoreReport> {
        self.store_inner(object_key, local_path, bucket, encrypt)
            .with_subscriber(self.diagnostics.clone())
            .await
    }

    /// Download the object at `location` into `local_path`, decrypting it
    /// when the location carries a key. The file is created or truncated
    /// and is only readable by its owner.
    pub async fn retrieve(&self, location: &str, local_path: &Path) -> HsmResult<RetrieveReport> {
        self.retrieve_inner(location, local_path)
            .with_subscriber(self.diagnostics.clone())
            .await
    }

    /// Delete the object at `location`. A missing object is
    /// [`HsmError::NotFound`].
    pub async fn purge(&self, location: &str) -> HsmResult<()> {
        self.purge_inner(location)
            .with_subscriber(self.diagnostics.clone())
            .await
    }

    async fn store_inner(
        &self,
        object_key: &str,
        local_path: &Path,
        bucket: &str,
        encrypt: bool,
    ) -> HsmResult<StoreReport> {
        let mut tracker = Tracker::start("store");
        let result: HsmResult<StoreReport> = async {
            let file = tokio::fs::File::open(local_path).await.map_err(|source| {
                HsmError::SourceUnavailable {
                    path: local_path.to_path_buf(),
                    source,
                }
            })?;
            let size = file
                .metadata()
                .await
                .map_err(|source| HsmError::SourceUnavailable {
                    path: local_path.to_path_buf(),
                    source,
                })?
                .len();

            let key = encrypt.then(|| generate_key(self.settings.cipher));
            // Build the location up front so a bad bucket or key fails before any upload.
            let location = self.settings.layout.locate(
                &self.settings.scheme,
                &self.settings.instance,
                bucket,
                object_key,
                key.as_ref().map(EncryptionKey::to_spec),
            )?;
            let reader = EncryptReader::new(BufReader::new(file), key.as_ref())?;
            drop(key);

            tracker.enter(Phase::Connecting);
            let store = self.connector.connect()?;

            tracker.enter(Phase::Transferring);
            info!(
                path = %local_path.display(),
                bucket,
                key = object_key,
                size,
                encrypted = reader.is_encrypting(),
                backend = store.name(),
                "storing"
            );
            let bytes = store
                .upload(bucket, object_key, Box::new(reader), size)
                .await?;

            Ok(StoreReport { location, bytes })
        }
        .await;
        tracker.finish(result)
    }

    async fn retrieve_inner(&self, location: &str, local_path: &Path) -> HsmResult<RetrieveReport> {
        let mut tracker = Tracker::start("retrieve");
        let result: HsmResult<RetrieveReport> = async {
            let location = ObjectLocation::decode(location)?;
            let address = self.settings.layout.resolve(&location)?;
            let key = location
                .cipher()
                .map(EncryptionKey::from_spec)
                .transpose()?;

            if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = open_destination(local_path).await?;
            let mut writer = DecryptWriter::new(file, key.as_ref())?;
            drop(key);

            tracker.enter(Phase::Connecting);
            let store = self.connector.connect()?;

            tracker.enter(Phase::Transferring);
            info!(
                path = %local_path.display(),
                bucket = %address.bucket,
                key = %address.key,
                encrypted = writer.is_decrypting(),
                backend = store.name(),
                "retrieving"
            );
            let bytes = store
                .download(&address.bucket, &address.key, &mut writer)
                .await?;
            writer.shutdown().await?;
            writer.into_inner().sync_all().await?;

            Ok(RetrieveReport {
                local_path: local_path.to_path_buf(),
                bytes,
            })
        }
        .await;
        tracker.finish(result)
    }

    async fn purge_inner(&self, location: &str) -> HsmResult<()> {
        let mut tracker = Tracker::start("purge");
        let result: HsmResult<()> = async {
            let location = ObjectLocation::decode(location)?;
            let address = self.settings.layout.resolve(&location)?;

            tracker.enter(Phase::Connecting);
            let store = self.connector.connect()?;

            tracker.enter(Phase::Transferring);
            info!(
                bucket = %address.bucket,
                key = %address.key,
                encrypted = location.is_encrypted(),
                backend = store.name(),
                "purging"
            );
            store.delete(&address.bucket, &address.key).await
        }
        .await;
        tracker.finish(result)
    }
}

#[cfg(unix)]
async fn open_destination(path: &Path) -> HsmResult<tokio::fs::File> {
    Ok(tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await?)
}

#[cfg(not(unix))]
async fn open_destination(path: &Path) -> HsmResult<tokio::fs::File> {
    Ok(tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3hsm_storage::MemoryConnector;

    fn engine(connector: Arc<MemoryConnector>) -> Engine {
        Engine::new(connector, LocationSettings::default(), Dispatch::none())
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = HsmConfig::default();
        config.location.layout = LocationLayout::ParentDir;
        config.crypto.cipher = CipherKind::Aes192Ofb;
        let settings = LocationSettings::from_config(&config);
        assert_eq!(settings.scheme, "s3");
        assert_eq!(settings.layout, LocationLayout::ParentDir);
        assert_eq!(settings.cipher, CipherKind::Aes192Ofb);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Transferring.to_string(), "transferring");
        assert_eq!(Phase::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn test_malformed_location_never_connects() {
        let connector = Arc::new(MemoryConnector::new().unwrap());
        let engine = engine(connector.clone());

        let err = engine.purge("not a valid uri").await.unwrap_err();
        assert!(matches!(err, HsmError::MalformedLocation(_)), "got {err:?}");

        let tmp = tempfile::TempDir::new().unwrap();
        let err = engine
            .retrieve("s3://b/k?etype=rot13&ekey=ab", &tmp.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, HsmError::UnsupportedCipher(_)), "got {err:?}");

        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_object_key_fails_before_connect() {
        let connector = Arc::new(MemoryConnector::new().unwrap());
        let engine = engine(connector.clone());

        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::write(&src, b"data").unwrap();

        let err = engine.store("a//b", &src, "hsm", false).await.unwrap_err();
        assert!(matches!(err, HsmError::MalformedLocation(_)), "got {err:?}");
        assert_eq!(connector.connect_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_retrieved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let connector = Arc::new(MemoryConnector::new().unwrap());
        let engine = engine(connector);

        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::write(&src, b"private").unwrap();
        let report = engine.store("obj", &src, "hsm", true).await.unwrap();

        let dst = tmp.path().join("dst");
        engine
            .retrieve(&report.location.encode(), &dst)
            .await
            .unwrap();
        let mode = std::fs::metadata(&dst).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
