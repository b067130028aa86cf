//! Backend connection parameters, fixed for the lifetime of an invocation.

use secrecy::{ExposeSecret, SecretString};

use crate::config::StorageConfig;
use crate::error::{HsmError, HsmResult};
use crate::types::SignatureVersion;

#[derive(Debug, Clone)]
pub struct ConnectionParams {
    endpoint: String,
    region: String,
    access_key_id: String,
    secret_access_key: SecretString,
    use_ssl: bool,
    signature_version: SignatureVersion,
    trace: bool,
}

impl ConnectionParams {
    /// Validate the storage config and combine it with credentials.
    ///
    /// The endpoint must be a bare `host[:port]`; TLS is chosen by `use_ssl`
    /// alone, so an endpoint carrying a scheme is rejected.
    pub fn from_config(
        storage: &StorageConfig,
        access_key_id: &str,
        secret_access_key: SecretString,
    ) -> HsmResult<Self> {
        let endpoint = storage.endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(HsmError::Config("storage.endpoint is empty".into()));
        }
        if endpoint.contains("://") {
            return Err(HsmError::Config(format!(
                "storage.endpoint must be host[:port] without a scheme (got '{endpoint}'); \
                 use storage.use_ssl to select HTTPS"
            )));
        }
        if endpoint.contains('/') {
            return Err(HsmError::Config(format!(
                "storage.endpoint must not contain a path (got '{endpoint}')"
            )));
        }
        if access_key_id.is_empty() {
            return Err(HsmError::Config("S3 access key is not set".into()));
        }
        if secret_access_key.expose_secret().is_empty() {
            return Err(HsmError::Config("S3 secret key is not set".into()));
        }

        let signature_version = storage.signature_version.parse()?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            region: storage.region.clone(),
            access_key_id: access_key_id.to_string(),
            secret_access_key,
            use_ssl: storage.use_ssl,
            signature_version,
            trace: storage.trace,
        })
    }

    /// Endpoint with the scheme selected by `use_ssl`.
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}", self.endpoint)
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &SecretString {
        &self.secret_access_key
    }

    pub fn signature_version(&self) -> SignatureVersion {
        self.signature_version
    }

    pub fn trace(&self) -> bool {
        self.trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn test_from_default_config() {
        let params =
            ConnectionParams::from_config(&StorageConfig::default(), "key", secret("secret"))
                .unwrap();
        assert_eq!(params.endpoint_url(), "http://localhost:9000");
        assert_eq!(params.signature_version(), SignatureVersion::V4);
        assert!(!params.trace());
    }

    #[test]
    fn test_use_ssl_selects_https() {
        let storage = StorageConfig {
            endpoint: "s3.example.org".into(),
            use_ssl: true,
            ..Default::default()
        };
        let params = ConnectionParams::from_config(&storage, "key", secret("secret")).unwrap();
        assert_eq!(params.endpoint_url(), "https://s3.example.org");
    }

    #[test]
    fn test_endpoint_with_scheme_rejected() {
        let storage = StorageConfig {
            endpoint: "https://s3.example.org".into(),
            ..Default::default()
        };
        let err = ConnectionParams::from_config(&storage, "key", secret("secret")).unwrap_err();
        assert!(matches!(err, HsmError::Config(_)));
        assert!(err.to_string().contains("use_ssl"));
    }

    #[test]
    fn test_unsupported_signature_version() {
        let storage = StorageConfig {
            signature_version: "v3".into(),
            ..Default::default()
        };
        let err = ConnectionParams::from_config(&storage, "key", secret("secret")).unwrap_err();
        assert!(matches!(err, HsmError::Config(_)));
    }

    #[test]
    fn test_missing_credentials() {
        let storage = StorageConfig::default();
        assert!(ConnectionParams::from_config(&storage, "", secret("secret")).is_err());
        assert!(ConnectionParams::from_config(&storage, "key", secret("")).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let params =
            ConnectionParams::from_config(&StorageConfig::default(), "key", secret("hunter2"))
                .unwrap();
        assert!(!format!("{params:?}").contains("hunter2"));
    }
}
