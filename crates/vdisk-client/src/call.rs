//! Timeout and bounded retry around volume driver calls

use crate::client::{ClientError, ClientResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use vdisk_common::VolumeDriverConfig;

/// How a single volume driver call is bounded and retried
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl CallPolicy {
    #[must_use]
    pub const fn new(timeout: Duration, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            timeout,
            max_attempts,
            backoff,
        }
    }

    #[must_use]
    pub const fn from_config(config: &VolumeDriverConfig) -> Self {
        Self::new(
            Duration::from_secs(config.call_timeout_secs),
            config.max_attempts,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op`, turning an elapsed timeout into [`ClientError::Timeout`] and
    /// repeating transient failures up to `max_attempts` times in total
    pub async fn call<T, F, Fut>(&self, what: &str, mut op: F) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout),
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        what, attempt, self.max_attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
                other => return other,
            }
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::from_config(&VolumeDriverConfig::default())
    }
}
