use serde::{Deserialize, Serialize};

use crate::location::LocationLayout;
use crate::types::CipherKind;

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HsmConfig {
    pub storage: StorageConfig,
    pub location: LocationConfig,
    pub crypto: CryptoConfig,
    pub fault: FaultConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// S3 endpoint as `host[:port]`, without a scheme
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Talk HTTPS to the endpoint
    pub use_ssl: bool,
    /// Request signing protocol: "v2" or "v4"
    pub signature_version: String,
    /// Log every backend request and response
    pub trace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Scheme written into locations (the HSM instance type)
    pub scheme: String,
    /// HSM instance name, used as the authority by the parent-dir layout
    pub instance: String,
    /// Bucket/key layout inside a location
    pub layout: LocationLayout,
    /// Bucket used by `store` when none is given
    pub default_bucket: String,
}

/// Per-object encryption
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Encrypt stored objects unless the command line says otherwise
    pub enabled: bool,
    /// Cipher for new objects; pick one per deployment
    pub cipher: CipherKind,
}

/// Fault injection, for exercising the caller's timeout and retry handling
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Sleep this many seconds before doing anything
    pub delay_secs: Option<u64>,
    /// Exit with this code instead of contacting the backend
    pub fail_code: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:9000".into(),
            region: "us-east-1".into(),
            use_ssl: false,
            signature_version: "v4".into(),
            trace: false,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            scheme: "s3".into(),
            instance: "s3hsm".into(),
            layout: LocationLayout::HostBucket,
            default_bucket: "hsm".into(),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cipher: CipherKind::Aes256Ofb,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
