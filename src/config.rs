//! Plug-in configuration.
//!
//! `PluginConfig` holds the two options the billing host exposes to merchants, and
//! `Environment` carries the per-request return URLs. `LedgerSettings` are
//! process-level knobs that never come from the host.

use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

/// Merchant-facing options. Each one changes which lifecycle transitions are reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default = "default_true")]
    pub enable_tokens: bool,
    #[serde(default, alias = "3dsecure")]
    pub enable_3dsecure: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enable_tokens: true,
            enable_3dsecure: false,
        }
    }
}

impl PluginConfig {
    /// Parses and checks a raw configuration object sent by the host.
    pub fn validate(raw: &serde_json::Value) -> Result<Self> {
        if !raw.is_object() {
            return Err(PaymentError::ValidationError(
                "Configuration must be an object".to_string(),
            ));
        }
        serde_json::from_value(raw.clone())
            .map_err(|e| PaymentError::ValidationError(format!("Invalid configuration: {}", e)))
    }
}

/// Return URLs and locale supplied by the host for the current request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub return_url_ok: String,
    #[serde(default)]
    pub return_url_failed: String,
    #[serde(default)]
    pub return_url_3dsecure: String,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub hosted_page_url: String,
    pub three_ds_url: String,
    /// Delay the host should wait before re-checking a pending transaction.
    pub pending_check_after_secs: u64,
    /// How many times a callback re-reads the record after losing a version race.
    pub callback_retries: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            hosted_page_url: "https://demo-payment-gateway.com".to_string(),
            three_ds_url: "https://demo-payment-gateway.com/3dsecure.php".to_string(),
            pending_check_after_secs: 300,
            callback_retries: 3,
        }
    }
}

/// Everything the binary needs, optionally loaded from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub plugin: PluginConfig,
    pub environment: Environment,
    pub ledger: LedgerSettings,
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigOption {
    pub key: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub friendly_name: &'static str,
    pub description: &'static str,
    pub default: bool,
}

/// Describes the plug-in's options to the host. Strings are localization keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigDescriptor {
    pub friendly_name: &'static str,
    pub options: Vec<ConfigOption>,
}

impl ConfigDescriptor {
    pub fn describe() -> Self {
        Self {
            friendly_name: "title_key",
            options: vec![
                ConfigOption {
                    key: "enable_tokens",
                    kind: "yesno",
                    friendly_name: "enable_tokens_key",
                    description: "enable_tokens_desc_key",
                    default: true,
                },
                ConfigOption {
                    key: "3dsecure",
                    kind: "yesno",
                    friendly_name: "enable_3dsecure_key",
                    description: "enable_3dsecure_desc_key",
                    default: false,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config: PluginConfig = serde_json::from_value(json!({})).unwrap();
        assert!(config.enable_tokens);
        assert!(!config.enable_3dsecure);
    }

    #[test]
    fn test_validate_config() {
        let config = PluginConfig::validate(&json!({"3dsecure": true})).unwrap();
        assert!(config.enable_3dsecure);

        assert!(PluginConfig::validate(&json!("yes")).is_err());
        assert!(PluginConfig::validate(&json!({"enable_tokens": "maybe"})).is_err());
    }

    #[test]
    fn test_descriptor_defaults_match_config_defaults() {
        let descriptor = ConfigDescriptor::describe();
        let defaults = PluginConfig::default();
        let tokens = descriptor
            .options
            .iter()
            .find(|o| o.key == "enable_tokens")
            .unwrap();
        let three_ds = descriptor.options.iter().find(|o| o.key == "3dsecure").unwrap();
        assert_eq!(tokens.default, defaults.enable_tokens);
        assert_eq!(three_ds.default, defaults.enable_3dsecure);
    }

    #[test]
    fn test_app_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"plugin": {"3dsecure": true}, "ledger": {"pending_check_after_secs": 60}}"#,
        )
        .unwrap();
        let config = AppConfig::from_file(file.path()).unwrap();
        assert!(config.plugin.enable_3dsecure);
        assert_eq!(config.ledger.pending_check_after_secs, 60);
        assert_eq!(config.ledger.callback_retries, 3);
    }
}
