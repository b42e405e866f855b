//! Bounded exponential backoff for opening sessions.

use std::time::Duration;

use tracing::{info, warn};
use vigil_core::config::RetryConfig;

use crate::{connector::Connector, error::Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting. Useful in tests.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1:
    /// base, 2×base, 4×base, … capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }
}

/// Call `connector.open()` until it succeeds, fails permanently, or the attempt
/// budget is exhausted. Only [`ConnectorError::is_transient`] errors are retried.
///
/// [`ConnectorError::is_transient`]: crate::error::ConnectorError::is_transient
pub async fn open_with_retry(connector: &mut dyn Connector, policy: &RetryPolicy) -> Result<()> {
    let (address, port) = connector.endpoint();
    let target = format!("{address}:{port}");
    let mut attempt = 1;

    loop {
        match connector.open().await {
            Ok(()) => {
                if attempt > 1 {
                    info!(target = %target, attempt, "session opened after retry");
                }
                return Ok(());
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    target = %target,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    err = %e,
                    "transient connect failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;
    use crate::types::{CommandOutput, PrivilegeProbe};
    use async_trait::async_trait;
    use vigil_core::Protocol;

    #[test]
    fn delays_double_until_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
        assert_eq!(policy.delay_after(4), Duration::from_secs(10));
        assert_eq!(policy.delay_after(40), Duration::from_secs(10));
    }

    /// Fails `open` with the queued errors, then succeeds.
    struct Flaky {
        errors: Vec<ConnectorError>,
        opens: u32,
    }

    #[async_trait]
    impl Connector for Flaky {
        fn protocol(&self) -> Protocol {
            Protocol::Ssh
        }
        fn endpoint(&self) -> (&str, u16) {
            ("flaky", 22)
        }
        async fn open(&mut self) -> Result<()> {
            self.opens += 1;
            match self.errors.pop() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
        async fn probe_privilege(&mut self) -> Result<PrivilegeProbe> {
            unreachable!()
        }
        async fn run(&mut self, _c: &str, _t: Duration) -> Result<CommandOutput> {
            unreachable!()
        }
        async fn close(&mut self) {}
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let mut c = Flaky {
            errors: vec![
                ConnectorError::Transport("reset".into()),
                ConnectorError::ConnectTimeout { ms: 10 },
            ],
            opens: 0,
        };
        open_with_retry(&mut c, &fast_policy(3)).await.unwrap();
        assert_eq!(c.opens, 3);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let mut c = Flaky {
            errors: vec![ConnectorError::Auth("bad password".into())],
            opens: 0,
        };
        let err = open_with_retry(&mut c, &fast_policy(3)).await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(c.opens, 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let mut c = Flaky {
            errors: (0..10)
                .map(|_| ConnectorError::Unreachable("refused".into()))
                .collect(),
            opens: 0,
        };
        assert!(open_with_retry(&mut c, &fast_policy(3)).await.is_err());
        assert_eq!(c.opens, 3);
    }
}
