use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub lzt: LztConfig,
    pub g2g: G2gConfig,
    pub scheduler: SchedulerConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://relist.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LztConfig {
    pub base_url: String,
    pub requests_per_minute: u32,
}

impl Default for LztConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.zelenka.guru".to_string(),
            requests_per_minute: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct G2gConfig {
    pub base_url: String,
    pub requests_per_minute: u32,
}

impl Default for G2gConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.g2g.com".to_string(),
            requests_per_minute: 60,
        }
    }
}

/// Cycle cadence and resource bounds. All durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub discovery_interval_secs: u64,
    pub sync_interval_secs: u64,
    pub lease_ttl_secs: u64,
    pub max_concurrent_users: usize,
    pub cycle_deadline_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            discovery_interval_secs: 600,
            sync_interval_secs: 300,
            lease_ttl_secs: 600,
            max_concurrent_users: 10,
            cycle_deadline_secs: 120,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    #[must_use]
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    #[must_use]
    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle_deadline_secs)
    }
}

/// Retry policy and offer lifetime. All durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry_base_secs: u64,
    pub retry_cap_secs: u64,
    pub max_attempts: u32,
    pub adapter_timeout_secs: u64,
    pub offer_ttl_secs: u64,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_base_secs: 2,
            retry_cap_secs: 60,
            max_attempts: 5,
            adapter_timeout_secs: 10,
            offer_ttl_secs: 7 * 24 * 60 * 60,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    #[must_use]
    pub fn offer_ttl(&self) -> Duration {
        Duration::from_secs(self.offer_ttl_secs)
    }
}
