use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::policy::RetryPolicy;

/// Put coordinator configuration.
///
/// Durations are written as integer milliseconds in config files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Re-read the key after a majority accept before reporting success.
    pub verify: bool,
    pub verify_attempts: u32,
    /// Wait before each verification read so replication can catch up.
    #[serde(with = "duration_ms")]
    pub settle_delay: Duration,
    /// Timeout for a single call to a single replica.
    #[serde(with = "duration_ms")]
    pub replica_timeout: Duration,
    /// Overall bound on one coordinator call. Derived from the other
    /// fields when unset.
    #[serde(with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            verify: true,
            verify_attempts: 3,
            settle_delay: Duration::from_millis(200),
            replica_timeout: Duration::from_secs(2),
            deadline: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> SyncResult<()> {
        if self.replica_timeout.is_zero() {
            return Err(SyncError::InvalidConfig(
                "replica_timeout must be positive".into(),
            ));
        }
        if self.verify && self.verify_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "verify_attempts must be at least 1 when verify is enabled".into(),
            ));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(
                "retry.multiplier must be a finite number >= 1.0".into(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(SyncError::InvalidConfig(
                "retry.base_delay must not exceed retry.max_delay".into(),
            ));
        }
        Ok(())
    }

    /// The configured deadline, or one long enough for every attempt to
    /// run to completion.
    ///
    /// One attempt costs a put round trip, a digest or withdraw round trip,
    /// and the verification reads with their settle delays.
    pub fn effective_deadline(&self) -> Duration {
        if let Some(deadline) = self.deadline {
            return deadline;
        }
        let verify_rounds = if self.verify { self.verify_attempts } else { 0 };
        let per_attempt = self.replica_timeout * (2 + verify_rounds)
            + self.settle_delay * verify_rounds;
        per_attempt * self.retry.max_attempts() + self.retry.total_backoff()
    }
}

/// `Duration` as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// `Option<Duration>` as optional integer milliseconds.
pub mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
