//! Reconciler configuration.

use crate::error::{OperatorError, OperatorResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix of environment variables read by [`ReconcilerConfig::from_env`].
pub const ENV_PREFIX: &str = "ETCD_OPERATOR_";

/// Configuration for membership reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Pod label carrying the owning cluster's name.
    pub cluster_label: String,

    /// Pod label carrying the etcd member name of a self-hosted member.
    pub node_label: String,

    /// Upper bound for a single etcd member-list request, in milliseconds.
    pub store_timeout_ms: u64,

    /// Consecutive passes a self-hosted cluster may spend waiting for its
    /// boot member to be removed before the wait is treated as fatal.
    /// `None` waits indefinitely.
    pub max_boot_member_deferrals: Option<u32>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            cluster_label: "etcd_cluster".to_string(),
            node_label: "etcd_node".to_string(),
            store_timeout_ms: 5_000,
            max_boot_member_deferrals: None,
        }
    }
}

impl ReconcilerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ReconcilerConfigBuilder {
        ReconcilerConfigBuilder::default()
    }

    /// The store request timeout as a Duration.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Label selector matching every pod of `cluster_name`.
    pub fn cluster_selector(&self, cluster_name: &str) -> String {
        format!("{}={}", self.cluster_label, cluster_name)
    }

    /// Defaults overridden by `ETCD_OPERATOR_*` environment variables.
    pub fn from_env() -> OperatorResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> OperatorResult<Self> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(v) = var("CLUSTER_LABEL") {
            config.cluster_label = v;
        }
        if let Some(v) = var("NODE_LABEL") {
            config.node_label = v;
        }
        if let Some(v) = var("STORE_TIMEOUT_MS") {
            config.store_timeout_ms = v.parse::<u64>().map_err(|e| {
                OperatorError::InvalidConfig(format!("{}STORE_TIMEOUT_MS ({}): {}", ENV_PREFIX, v, e))
            })?;
        }
        if let Some(v) = var("MAX_BOOT_MEMBER_DEFERRALS") {
            let n = v.parse::<u32>().map_err(|e| {
                OperatorError::InvalidConfig(format!(
                    "{}MAX_BOOT_MEMBER_DEFERRALS ({}): {}",
                    ENV_PREFIX, v, e
                ))
            })?;
            config.max_boot_member_deferrals = Some(n);
        }

        config.validate().map_err(OperatorError::InvalidConfig)?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cluster_label.is_empty() {
            return Err("cluster_label is required".to_string());
        }
        if self.node_label.is_empty() {
            return Err("node_label is required".to_string());
        }
        if self.store_timeout_ms == 0 {
            return Err("store_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

/// Builder for ReconcilerConfig.
#[derive(Debug, Default)]
pub struct ReconcilerConfigBuilder {
    config: ReconcilerConfig,
}

impl ReconcilerConfigBuilder {
    /// Set the cluster label key.
    pub fn cluster_label(mut self, label: impl Into<String>) -> Self {
        self.config.cluster_label = label.into();
        self
    }

    /// Set the node label key.
    pub fn node_label(mut self, label: impl Into<String>) -> Self {
        self.config.node_label = label.into();
        self
    }

    /// Set the store request timeout.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Bound the boot-member wait to `passes` consecutive passes.
    pub fn max_boot_member_deferrals(mut self, passes: u32) -> Self {
        self.config.max_boot_member_deferrals = Some(passes);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ReconcilerConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = ReconcilerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster_selector("foo"), "etcd_cluster=foo");
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert!(config.max_boot_member_deferrals.is_none());
    }

    #[test]
    fn builder_validates() {
        let config = ReconcilerConfig::builder()
            .max_boot_member_deferrals(3)
            .store_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(config.max_boot_member_deferrals, Some(3));
        assert_eq!(config.store_timeout_ms, 2_000);

        assert!(ReconcilerConfig::builder().node_label("").build().is_err());
        assert!(
            ReconcilerConfig::builder()
                .store_timeout(Duration::ZERO)
                .build()
                .is_err()
        );
    }

    #[test]
    fn huge_store_timeout_saturates() {
        let config = ReconcilerConfig::builder()
            .store_timeout(Duration::MAX)
            .build()
            .unwrap();
        assert_eq!(config.store_timeout_ms, u64::MAX);
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<String, String> = [
            ("ETCD_OPERATOR_NODE_LABEL", "member"),
            ("ETCD_OPERATOR_MAX_BOOT_MEMBER_DEFERRALS", "10"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = ReconcilerConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.node_label, "member");
        assert_eq!(config.cluster_label, "etcd_cluster");
        assert_eq!(config.max_boot_member_deferrals, Some(10));
    }

    #[test]
    fn env_rejects_garbage() {
        let err = ReconcilerConfig::from_lookup(|k| {
            (k == "ETCD_OPERATOR_STORE_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn deserializes_partial_yaml() {
        let config: ReconcilerConfig =
            serde_yaml::from_str("max_boot_member_deferrals: 4\n").unwrap();
        assert_eq!(config.max_boot_member_deferrals, Some(4));
    }
}
