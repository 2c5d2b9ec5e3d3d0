//! Configuration types for the engines
//!
//! The engine configuration is read from a TOML file. Every section falls
//! back to its defaults so an empty file is a valid configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Snapshot retention configuration
    pub retention: RetentionConfig,
    /// MDS defaults used when a vPool does not configure a value
    pub mds: MdsDefaults,
    /// Volume driver call policy
    pub volumedriver: VolumeDriverConfig,
}

impl EngineConfig {
    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration file, falling back to defaults when it is absent
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.retention.default_policy.validate()?;
        if self.mds.safety == 0 {
            return Err(Error::Configuration("mds.safety must be at least 1".into()));
        }
        if self.volumedriver.max_attempts == 0 {
            return Err(Error::Configuration(
                "volumedriver.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Snapshot retention configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Policy used when neither the vDisk nor its vPool override it
    pub default_policy: RetentionPolicy,
    /// How long a derived snapshot list stays cached
    pub snapshot_cache_ttl_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_policy: RetentionPolicy::default(),
            snapshot_cache_ttl_secs: 60,
        }
    }
}

/// One rule of a retention policy: keep `nr_of_snapshots` over `nr_of_days`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionRule {
    /// Number of snapshots (and thus buckets) over the rule's window
    pub nr_of_snapshots: u32,
    /// Width of the rule's window in days
    pub nr_of_days: u32,
    /// Prefer the newest consistent snapshot in every bucket of this rule
    #[serde(default)]
    pub consistency_first: bool,
    /// 1-based bucket numbers within this rule that prefer consistency
    #[serde(default)]
    pub consistency_first_on: Vec<u32>,
}

impl RetentionRule {
    #[must_use]
    pub const fn new(nr_of_snapshots: u32, nr_of_days: u32) -> Self {
        Self {
            nr_of_snapshots,
            nr_of_days,
            consistency_first: false,
            consistency_first_on: Vec::new(),
        }
    }

    /// Prefer consistent snapshots in every bucket of this rule
    #[must_use]
    pub const fn consistency_first(mut self) -> Self {
        self.consistency_first = true;
        self
    }

    /// Prefer consistent snapshots in the given (1-based) buckets only
    #[must_use]
    pub fn consistency_first_on(mut self, buckets: Vec<u32>) -> Self {
        self.consistency_first_on = buckets;
        self
    }

    /// Whether the `index`-th (0-based) bucket of this rule prefers consistency
    #[must_use]
    pub fn prefers_consistency(&self, index: u32) -> bool {
        self.consistency_first || self.consistency_first_on.contains(&(index + 1))
    }
}

/// Ordered list of retention rules, newest window first
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetentionPolicy(pub Vec<RetentionRule>);

impl RetentionPolicy {
    #[must_use]
    pub const fn new(rules: Vec<RetentionRule>) -> Self {
        Self(rules)
    }

    #[must_use]
    pub fn rules(&self) -> &[RetentionRule] {
        &self.0
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::InvalidPolicy("policy has no rules".into()));
        }
        for (i, rule) in self.0.iter().enumerate() {
            if rule.nr_of_snapshots == 0 {
                return Err(Error::InvalidPolicy(format!(
                    "rule {i}: nr_of_snapshots must be at least 1"
                )));
            }
            if rule.nr_of_days == 0 {
                return Err(Error::InvalidPolicy(format!(
                    "rule {i}: nr_of_days must be at least 1"
                )));
            }
            if let Some(bad) = rule
                .consistency_first_on
                .iter()
                .find(|&&n| n == 0 || n > rule.nr_of_snapshots)
            {
                return Err(Error::InvalidPolicy(format!(
                    "rule {i}: consistency_first_on entry {bad} outside 1..={}",
                    rule.nr_of_snapshots
                )));
            }
        }
        Ok(())
    }
}

impl Default for RetentionPolicy {
    /// Hourly for a day, daily for a week, weekly for three weeks
    fn default() -> Self {
        Self(vec![
            RetentionRule::new(24, 1),
            RetentionRule::new(6, 6),
            RetentionRule::new(3, 21),
        ])
    }
}

/// MDS defaults for vPools that do not set a value themselves
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MdsDefaults {
    /// Total number of MDS services per vDisk (master included)
    pub safety: u32,
    /// Maximum load in percent
    pub max_load: u64,
    /// Maximum tlogs a slave may lag behind before it can become master
    pub tlogs_behind: u64,
    /// Recompute once when an MDS service vanishes before the config write
    pub restart_on_vanished: bool,
}

impl Default for MdsDefaults {
    fn default() -> Self {
        Self {
            safety: 3,
            max_load: 75,
            tlogs_behind: 100,
            restart_on_vanished: true,
        }
    }
}

/// Volume driver call policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeDriverConfig {
    /// Timeout of a single call
    pub call_timeout_secs: u64,
    /// Attempts per call for transient failures
    pub max_attempts: u32,
    /// Pause between attempts
    pub retry_backoff_ms: u64,
}

impl Default for VolumeDriverConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 10,
            max_attempts: 3,
            retry_backoff_ms: 50,
        }
    }
}
