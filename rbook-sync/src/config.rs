use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Faculty member whose classes and submissions are synced
    pub faculty_id: String,
    /// Rejected deliveries tolerated before a submission is dropped
    pub max_retries: u32,
    /// Age after which a cache entry counts as stale
    pub stale_after_hours: i64,
    /// Deadline for every single remote call
    #[serde(with = "duration_ms")]
    pub remote_timeout: Duration,
    /// Idle period before a draft edit is written
    #[serde(with = "duration_ms")]
    pub draft_debounce: Duration,
    /// Classes processed between yields back to the scheduler
    pub yield_every: usize,
    /// Background sync period; `None` disables the background loop
    #[serde(default, with = "opt_duration_ms")]
    pub sync_interval: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            faculty_id: String::new(),
            max_retries: 5,
            stale_after_hours: 24,
            remote_timeout: Duration::from_secs(15),
            draft_debounce: Duration::from_secs(1),
            yield_every: 1,
            sync_interval: None,
        }
    }
}

impl SyncConfig {
    pub fn new(faculty_id: impl Into<String>) -> Self {
        Self {
            faculty_id: faculty_id.into(),
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_stale_after_hours(mut self, hours: i64) -> Self {
        self.stale_after_hours = hours;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn with_draft_debounce(mut self, debounce: Duration) -> Self {
        self.draft_debounce = debounce;
        self
    }

    pub fn with_yield_every(mut self, classes: usize) -> Self {
        self.yield_every = classes;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.faculty_id.is_empty() {
            return Err("faculty_id must be set".to_string());
        }
        if self.stale_after_hours <= 0 {
            return Err("stale_after_hours must be greater than 0".to_string());
        }
        if self.remote_timeout.is_zero() {
            return Err("remote_timeout must be greater than 0".to_string());
        }
        if self.yield_every == 0 {
            return Err("yield_every must be greater than 0".to_string());
        }
        if let Some(interval) = self.sync_interval {
            if interval.is_zero() {
                return Err("sync_interval must be greater than 0 when set".to_string());
            }
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
