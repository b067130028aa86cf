//! Fault injection for exercising the caller's timeout and error handling

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use s3hsm_core::config::FaultConfig;
use s3hsm_core::{HsmError, HsmResult};

/// The process should exit with this code instead of doing any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("injected failure, exit code {0}")]
pub struct InjectedFailure(pub i32);

impl InjectedFailure {
    pub fn code(&self) -> i32 {
        self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultInjection {
    delay: Option<Duration>,
    fail_code: Option<i32>,
}

impl FaultInjection {
    pub fn new(delay: Option<Duration>, fail_code: Option<i32>) -> HsmResult<Self> {
        if fail_code == Some(0) {
            return Err(HsmError::Config(
                "fault.fail_code must be non-zero; 0 would report success".into(),
            ));
        }
        Ok(Self { delay, fail_code })
    }

    pub fn from_config(config: &FaultConfig) -> HsmResult<Self> {
        Self::new(config.delay_secs.map(Duration::from_secs), config.fail_code)
    }

    /// Sleep for the configured delay, then fail if a code is configured.
    pub async fn inject(&self) -> Result<(), InjectedFailure> {
        if let Some(delay) = self.delay {
            warn!(delay_secs = delay.as_secs_f64(), "fault injection: delaying");
            tokio::time::sleep(delay).await;
        }
        if let Some(code) = self.fail_code {
            warn!(code, "fault injection: failing");
            return Err(InjectedFailure(code));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_zero_fail_code_rejected() {
        let err = FaultInjection::new(None, Some(0)).unwrap_err();
        assert!(matches!(err, HsmError::Config(_)));
    }

    #[test]
    fn test_from_config() {
        let config = FaultConfig {
            delay_secs: Some(3),
            fail_code: Some(7),
        };
        let fault = FaultInjection::from_config(&config).unwrap();
        assert_eq!(
            fault,
            FaultInjection::new(Some(Duration::from_secs(3)), Some(7)).unwrap()
        );
        assert_eq!(FaultInjection::default(), FaultInjection::new(None, None).unwrap());
    }

    #[tokio::test]
    async fn test_inactive_returns_immediately() {
        let start = Instant::now();
        FaultInjection::default().inject().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_fail_code_returned() {
        let fault = FaultInjection::new(None, Some(42)).unwrap();
        let err = fault.inject().await.unwrap_err();
        assert_eq!(err.code(), 42);
        assert_eq!(err.to_string(), "injected failure, exit code 42");
    }

    #[tokio::test]
    async fn test_delay_waits() {
        let delay = Duration::from_millis(150);
        let fault = FaultInjection::new(Some(delay), None).unwrap();
        let start = Instant::now();
        fault.inject().await.unwrap();
        assert!(start.elapsed() >= delay);
    }
}
