//! Federation tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for a federation's background replication.
///
/// ```json
/// {"max_concurrent_replications": 4, "replication_timeout_ms": 30000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Upper bound on replica copies running at once.
    pub max_concurrent_replications: usize,
    /// Give up on a single replica copy after this long. No deadline when
    /// unset.
    pub replication_timeout_ms: Option<u64>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_replications: 16,
            replication_timeout_ms: None,
        }
    }
}

impl FederationConfig {
    pub fn replication_timeout(&self) -> Option<Duration> {
        self.replication_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = FederationConfig::default();
        assert_eq!(config.max_concurrent_replications, 16);
        assert_eq!(config.replication_timeout(), None);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: FederationConfig =
            serde_json::from_str(r#"{"replication_timeout_ms": 1500}"#).unwrap();
        assert_eq!(config.max_concurrent_replications, 16);
        assert_eq!(config.replication_timeout(), Some(Duration::from_millis(1500)));
    }
}
