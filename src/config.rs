//! Provider-level configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};

/// Configuration block of the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Accepted for compatibility; has no effect.
    pub dummy: Option<String>,
    /// Path to the wrapped `juicefs` binary. Defaults to `juicefs` on `PATH`.
    pub juicefs_binary: Option<String>,
}

impl ProviderConfig {
    /// Decode the host-supplied configuration. Null means all defaults.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| ProviderError::Configuration(e.to_string()))
    }

    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "dummy",
                Attribute::new(AttributeType::String, AttributeFlags::optional_computed()),
            )
            .with_attribute(
                "juicefs_binary",
                Attribute::optional_string()
                    .with_description("Path to the juicefs binary (default: juicefs on PATH)"),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_config_is_default() {
        assert_eq!(
            ProviderConfig::from_value(Value::Null).unwrap(),
            ProviderConfig::default()
        );
    }

    #[test]
    fn test_config_fields() {
        let config = ProviderConfig::from_value(json!({
            "dummy": null,
            "juicefs_binary": "/usr/local/bin/juicefs"
        }))
        .unwrap();
        assert_eq!(config.juicefs_binary.as_deref(), Some("/usr/local/bin/juicefs"));
        assert!(config.dummy.is_none());
    }

    #[test]
    fn test_config_wrong_type() {
        let err = ProviderConfig::from_value(json!({"juicefs_binary": 42})).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }
}
