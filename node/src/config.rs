//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use strand_consensus::ElectionsConfig;
use strand_types::Account;

use crate::NodeError;

/// Configuration for the node core.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or built
/// programmatically (e.g. for tests). The election wake-up intervals are
/// protocol constants and not exposed here; the caps and quorum are.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Confirmation threshold as basis points of online weight.
    #[serde(default = "default_quorum_bps")]
    pub quorum_bps: u32,

    /// Consecutive threshold-meeting rounds required to confirm an election.
    #[serde(default = "default_confirms_required")]
    pub confirms_required: u32,

    /// Round cap for non-forked elections.
    #[serde(default = "default_rounds_max")]
    pub rounds_max: u32,

    /// Round cap (from fork detection) for forked elections.
    #[serde(default = "default_rounds_fork_max")]
    pub rounds_fork_max: u32,

    /// Maximum number of simultaneous elections.
    #[serde(default = "default_max_elections")]
    pub max_elections: usize,

    /// The account this node votes as, when it is a representative.
    /// Set programmatically from the credential store, never from TOML.
    #[serde(skip)]
    pub local_representative: Option<Account>,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_quorum_bps() -> u32 {
    6700
}

fn default_confirms_required() -> u32 {
    2
}

fn default_rounds_max() -> u32 {
    300
}

fn default_rounds_fork_max() -> u32 {
    120
}

fn default_max_elections() -> usize {
    16_384
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("NodeConfig is always serializable to TOML")
    }

    /// The election engine tuning derived from this configuration.
    pub fn elections_config(&self) -> ElectionsConfig {
        ElectionsConfig {
            quorum_bps: self.quorum_bps,
            confirms_required: self.confirms_required,
            rounds_max: self.rounds_max,
            rounds_fork_max: self.rounds_fork_max,
            max_elections: self.max_elections,
            local_representative: self.local_representative,
            ..ElectionsConfig::default()
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
            quorum_bps: default_quorum_bps(),
            confirms_required: default_confirms_required(),
            rounds_max: default_rounds_max(),
            rounds_fork_max: default_rounds_fork_max(),
            max_elections: default_max_elections(),
            local_representative: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let toml_str = config.to_toml_string();
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.quorum_bps, config.quorum_bps);
        assert_eq!(parsed.rounds_max, config.rounds_max);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.quorum_bps, 6700);
        assert_eq!(config.confirms_required, 2);
        assert_eq!(config.log_format, "human");
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            quorum_bps = 7500
            rounds_max = 50
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.quorum_bps, 7500);
        assert_eq!(config.rounds_max, 50);
        assert_eq!(config.confirms_required, 2); // default
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/strand.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn elections_config_carries_tuning() {
        let config = NodeConfig {
            quorum_bps: 5000,
            confirms_required: 3,
            ..NodeConfig::default()
        };
        let elections = config.elections_config();
        assert_eq!(elections.quorum_bps, 5000);
        assert_eq!(elections.confirms_required, 3);
        // Interval constants are not configuration.
        assert_eq!(
            elections.non_fork_delay,
            strand_consensus::Elections::NON_FORK_ELECTION_DELAY
        );
    }
}
