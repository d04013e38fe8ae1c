//! Configuration file support for the switch agent.
//!
//! Loads and validates accounting knobs, per-switch hardware capacity and
//! probe timing from TOML.
//! Default location: /etc/swagent/swagent.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use swagent_types::SwitchId;
use tracing::warn;

use crate::error::{AgentError, Result};
use crate::resource::{AccountantConfig, HwCapacity, HwCapacityTable};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/swagent/swagent.toml";

/// Capacity of one switch, as a `[[switch]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchCapacityConfig {
    pub switch_id: SwitchId,

    #[serde(flatten)]
    pub capacity: HwCapacity,
}

/// Resolved next-hop probe timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Wait after the first probe of a next hop
    #[serde(default = "default_start_interval")]
    pub start_interval_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,

    /// How often the scheduler looks for due probes
    #[serde(default = "default_tick")]
    pub tick_ms: u64,
}

fn default_start_interval() -> u64 {
    1000
}

fn default_max_interval() -> u64 {
    30_000
}

fn default_tick() -> u64 {
    100
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            start_interval_ms: default_start_interval(),
            max_interval_ms: default_max_interval(),
            tick_ms: default_tick(),
        }
    }
}

impl ProbeConfig {
    pub fn start_interval(&self) -> Duration {
        Duration::from_millis(self.start_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Complete agent configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub accountant: AccountantConfig,

    /// Switches without an entry have no capacity limits.
    #[serde(default, rename = "switch")]
    pub switches: Vec<SwitchCapacityConfig>,

    #[serde(default)]
    pub probe: ProbeConfig,
}

impl AgentConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                AgentError::Configuration(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(AgentError::Io(e)),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            AgentError::Configuration(format!("Failed to serialize config: {}", e))
        })?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let pct = self.accountant.ecmp_resource_percentage;
        if !(1..=100).contains(&pct) {
            return Err(AgentError::Configuration(format!(
                "ecmp_resource_percentage must be 1-100, got {}",
                pct
            )));
        }

        if self.accountant.ucmp_width == 0 {
            return Err(AgentError::Configuration(
                "ucmp_width must be > 0".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for switch in &self.switches {
            if !seen.insert(switch.switch_id) {
                return Err(AgentError::Configuration(format!(
                    "duplicate capacity entry for switch {}",
                    switch.switch_id
                )));
            }
        }

        if self.probe.start_interval_ms == 0 || self.probe.tick_ms == 0 {
            return Err(AgentError::Configuration(
                "probe intervals must be > 0".to_string(),
            ));
        }

        if self.probe.max_interval_ms < self.probe.start_interval_ms {
            return Err(AgentError::Configuration(
                "probe max_interval_ms must be >= start_interval_ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Per-switch capacity table for the resource accountant.
    pub fn capacity_table(&self) -> HwCapacityTable {
        self.switches
            .iter()
            .map(|switch| (switch.switch_id, switch.capacity.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::AsicFamily;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.accountant.ecmp_resource_percentage, 75);
        assert!(config.switches.is_empty());
        assert_eq!(config.probe.start_interval(), Duration::from_secs(1));
        assert_eq!(config.probe.max_interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[accountant]
ecmp_resource_percentage = 80
ars_enabled = true

[[switch]]
switch_id = 0
asic = "tomahawk4"
max_ecmp_groups = 128
max_ecmp_members = 4096

[[switch]]
switch_id = 1
asic = "jericho2"
max_unified_neighbor_entries = 2048

[probe]
max_interval_ms = 8000
"#;
        let config: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.accountant.ecmp_resource_percentage, 80);
        assert!(config.accountant.ars_enabled);
        // Unspecified values should use defaults
        assert_eq!(config.accountant.ucmp_width, 64);
        assert_eq!(config.probe.start_interval_ms, 1000);
        assert_eq!(config.probe.max_interval_ms, 8000);

        let table = config.capacity_table();
        let first = &table[&SwitchId::new(0)];
        assert_eq!(first.asic, AsicFamily::Tomahawk4);
        assert_eq!(first.max_ecmp_groups, Some(128));
        assert_eq!(first.max_routes, None);
        assert_eq!(table[&SwitchId::new(1)].max_unified_neighbor_entries, Some(2048));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_percentage_range() {
        let mut config = AgentConfig::default();
        config.accountant.ecmp_resource_percentage = 0;
        assert!(config.validate().is_err());
        config.accountant.ecmp_resource_percentage = 101;
        assert!(config.validate().is_err());
        config.accountant.ecmp_resource_percentage = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_duplicate_switch() {
        let mut config = AgentConfig::default();
        let entry = SwitchCapacityConfig {
            switch_id: SwitchId::new(3),
            capacity: HwCapacity::new(AsicFamily::Trident2),
        };
        config.switches = vec![entry.clone(), entry];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate capacity entry"));
    }

    #[test]
    fn test_validate_probe_intervals() {
        let mut config = AgentConfig::default();
        config.probe.max_interval_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("swagent.toml");

        let mut config = AgentConfig::default();
        config.accountant.unified_neighbor_table = true;
        let mut capacity = HwCapacity::new(AsicFamily::Tomahawk);
        capacity.max_routes = Some(16384);
        config.switches.push(SwitchCapacityConfig {
            switch_id: SwitchId::new(0),
            capacity,
        });
        config.save(&path).unwrap();

        let loaded = AgentConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[accountant\nucmp_width = ").unwrap();
        let err = AgentConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = AgentConfig::load_or_default("/nonexistent/swagent.toml").unwrap();
        assert_eq!(config, AgentConfig::default());
    }
}
