use crate::keys::LocationId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub location_id: LocationId,
    #[serde(default = "default_range_length")]
    pub range_length: u32,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_saved_pulse_ms")]
    pub saved_pulse_ms: u64,
    #[serde(default)]
    pub coverage: CoverageConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_range_length() -> u32 {
    7
}

fn default_debounce_ms() -> u64 {
    550
}

fn default_saved_pulse_ms() -> u64 {
    650
}

/// Rule for the automatic full-coverage day label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageConfig {
    #[serde(default = "default_coverage_label")]
    pub label: String,
    /// Only the first `show_cap` shows of a date are considered
    #[serde(default = "default_show_cap")]
    pub show_cap: usize,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            label: default_coverage_label(),
            show_cap: default_show_cap(),
        }
    }
}

fn default_coverage_label() -> String {
    "SHOW".to_string()
}

fn default_show_cap() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_timeout_ms() -> u64 {
    10000
}

impl SessionConfig {
    /// Defaults for one location.
    pub fn new(location_id: LocationId) -> Self {
        Self {
            location_id,
            range_length: default_range_length(),
            debounce_ms: default_debounce_ms(),
            saved_pulse_ms: default_saved_pulse_ms(),
            coverage: CoverageConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }

    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn saved_pulse(&self) -> Duration {
        Duration::from_millis(self.saved_pulse_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let json = r#"{ "location_id": 4 }"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.location_id, 4);
        assert_eq!(config.range_length, 7);
        assert_eq!(config.debounce_ms, 550);
        assert_eq!(config.saved_pulse_ms, 650);
        assert_eq!(config.coverage.label, "SHOW");
        assert_eq!(config.coverage.show_cap, 3);
        assert_eq!(config.gateway.base_url, "http://localhost:3000");
        assert_eq!(config.gateway.api_key, None);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "location_id": 2,
            "range_length": 14,
            "debounce_ms": 800,
            "saved_pulse_ms": 1000,
            "coverage": { "label": "FULL", "show_cap": 2 },
            "gateway": { "base_url": "https://db.example.com/rest/v1", "api_key": "k", "timeout_ms": 5000 }
        }"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.range_length, 14);
        assert_eq!(config.debounce(), Duration::from_millis(800));
        assert_eq!(config.coverage.label, "FULL");
        assert_eq!(config.coverage.show_cap, 2);
        assert_eq!(config.gateway.api_key.as_deref(), Some("k"));
        assert_eq!(config.gateway.timeout_ms, 5000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "location_id": 9, "coverage": {{ "label": "SHOWCALL" }} }}"#).unwrap();
        let config = SessionConfig::load(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.location_id, 9);
        assert_eq!(config.coverage.label, "SHOWCALL");
        assert_eq!(config.coverage.show_cap, 3);
    }

    #[test]
    fn test_load_rejects_missing_location() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "range_length": 7 }}"#).unwrap();
        assert!(SessionConfig::load(&file.path().to_path_buf()).is_err());
    }
}
